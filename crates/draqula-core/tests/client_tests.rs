//! Tests for the query client against a scripted in-memory transport.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use draqula_core::{
    CacheEvent, CacheUpdate, Draqula, DraqulaError, FetchPolicy, GraphQLRequest, GraphQLResponse,
    MutateOptions, NetworkError, QueryOptions, ResponseError, RetryConfig, Transport,
};
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, join_all};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot};

const USER_QUERY: &str = "query GetUser($id: ID!) { user(id: $id) { id name } }";
const RENAME_USER: &str = "mutation Rename($id: ID!, $name: String!) { renameUser(id: $id, name: $name) { id name } }";

type Respond = dyn Fn(&GraphQLRequest, usize) -> Result<GraphQLResponse, NetworkError> + Send + Sync;

/// Transport that counts calls, records requests and can hold responses.
#[derive(Clone)]
struct MockTransport {
    calls: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<GraphQLRequest>>>,
    gates: Arc<Mutex<VecDeque<oneshot::Receiver<()>>>>,
    respond: Arc<Respond>,
}

impl MockTransport {
    fn new<F>(respond: F) -> Self
    where
        F: Fn(&GraphQLRequest, usize) -> Result<GraphQLResponse, NetworkError> + Send + Sync + 'static,
    {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
            requests: Arc::new(Mutex::new(Vec::new())),
            gates: Arc::new(Mutex::new(VecDeque::new())),
            respond: Arc::new(respond),
        }
    }

    /// Responds with `data` to every request.
    fn with_data(data: Value) -> Self {
        Self::new(move |_, _| Ok(GraphQLResponse::from_data(data.clone())))
    }

    /// Hold the next call's response until the returned sender fires.
    fn hold_next(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.gates.lock().push_back(rx);
        tx
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn mutation_calls(&self) -> usize {
        self.requests.lock().iter().filter(|r| r.is_mutation()).count()
    }

    fn query_calls(&self) -> usize {
        self.requests.lock().iter().filter(|r| !r.is_mutation()).count()
    }
}

impl Transport for MockTransport {
    fn send(&self, request: &GraphQLRequest) -> BoxFuture<'static, Result<GraphQLResponse, NetworkError>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.requests.lock().push(request.clone());
        let gate = self.gates.lock().pop_front();
        let response = (self.respond)(request, call);
        async move {
            if let Some(gate) = gate {
                let _ = gate.await;
            }
            response
        }
        .boxed()
    }
}

fn client(transport: &MockTransport) -> Draqula {
    Draqula::builder(transport.clone()).no_retry().build()
}

fn fast_retry(max_retries: u32) -> RetryConfig {
    RetryConfig {
        max_retries,
        initial_delay_ms: 1,
        max_delay_ms: 4,
        ..RetryConfig::default()
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("draqula_core=trace")
        .with_test_writer()
        .try_init();
}

#[tokio::test]
async fn test_concurrent_identical_queries_share_one_call() {
    init_tracing();
    let transport = MockTransport::with_data(json!({"user": {"id": 1, "name": "x"}}));
    let client = client(&transport);
    let release = transport.hold_next();

    let handles: Vec<_> = (0..10)
        .map(|_| client.query(USER_QUERY, &json!({"id": 1}), QueryOptions::default()))
        .collect();
    let ticket = handles[0].ticket();
    assert!(ticket.is_some());
    assert!(handles.iter().all(|h| h.ticket() == ticket));
    assert!(handles[1..].iter().all(|h| h.is_attached()));
    assert_eq!(client.in_flight_count(), 1);

    release.send(()).unwrap();
    let results = join_all(handles).await;
    assert_eq!(transport.calls(), 1);
    for result in results {
        assert_eq!(result.unwrap(), json!({"user": {"id": 1, "name": "x"}}));
    }
    assert_eq!(client.in_flight_count(), 0);
}

#[tokio::test]
async fn test_key_order_does_not_split_calls() {
    let transport = MockTransport::with_data(json!({"ok": true}));
    let client = client(&transport);
    let release = transport.hold_next();

    let a = client.query(USER_QUERY, &json!({"id": 1, "first": 10}), QueryOptions::default());
    let b = client.query(USER_QUERY, &json!({"first": 10, "id": 1}), QueryOptions::default());
    assert_eq!(a.ticket(), b.ticket());

    release.send(()).unwrap();
    let (a, b) = tokio::join!(a, b);
    assert_eq!(a.unwrap(), b.unwrap());
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn test_different_variables_are_separate_calls() {
    let transport = MockTransport::new(|request, _| {
        let id = request.variables.as_ref().map(|v| v["id"].clone()).unwrap_or_default();
        Ok(GraphQLResponse::from_data(json!({"user": {"id": id}})))
    });
    let client = client(&transport);

    let (a, b) = tokio::join!(
        client.query(USER_QUERY, &json!({"id": 1}), QueryOptions::default()),
        client.query(USER_QUERY, &json!({"id": 2}), QueryOptions::default()),
    );
    assert_eq!(a.unwrap(), json!({"user": {"id": 1}}));
    assert_eq!(b.unwrap(), json!({"user": {"id": 2}}));
    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn test_user_query_is_cached() {
    let transport = MockTransport::with_data(json!({"id": 1, "name": "x"}));
    let client = client(&transport);

    let first = client
        .query(USER_QUERY, &json!({"id": 1}), QueryOptions::default())
        .await
        .unwrap();
    assert_eq!(first, json!({"id": 1, "name": "x"}));
    assert_eq!(transport.calls(), 1);

    let entry = client.read_query(USER_QUERY, &json!({"id": 1})).unwrap().unwrap();
    assert_eq!(entry.data(), Some(&json!({"id": 1, "name": "x"})));
    assert!(entry.error().is_none());

    let second = client.query(USER_QUERY, &json!({"id": 1}), QueryOptions::default());
    assert!(second.is_cached());
    assert_eq!(second.await.unwrap(), first);
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn test_invalidate_forces_new_call() {
    let transport = MockTransport::new(|_, call| Ok(GraphQLResponse::from_data(json!({"call": call}))));
    let client = client(&transport);
    let fingerprint = client.fingerprint(USER_QUERY, &json!({"id": 1})).unwrap();

    let first = client.query(USER_QUERY, &json!({"id": 1}), QueryOptions::default()).await;
    assert_eq!(first.unwrap(), json!({"call": 1}));

    assert!(client.invalidate(&fingerprint));
    assert!(client.cache_entry(&fingerprint).is_none());
    assert!(!client.invalidate(&fingerprint));

    let second = client.query(USER_QUERY, &json!({"id": 1}), QueryOptions::default()).await;
    assert_eq!(second.unwrap(), json!({"call": 2}));
    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn test_mutation_invalidates_cached_queries() {
    let transport = MockTransport::new(|request, _| {
        if request.is_mutation() {
            Ok(GraphQLResponse::from_data(json!({"renameUser": {"id": 1, "name": "y"}})))
        } else {
            Ok(GraphQLResponse::from_data(json!({"user": {"id": 1, "name": "x"}})))
        }
    });
    let client = client(&transport);

    client
        .query(USER_QUERY, &json!({"id": 1}), QueryOptions::default())
        .await
        .unwrap();
    assert_eq!(client.cached_count(), 1);

    let result = client
        .mutate(RENAME_USER, &json!({"id": 1, "name": "y"}), MutateOptions::default())
        .await
        .unwrap();
    assert_eq!(result["renameUser"]["name"], "y");
    assert_eq!(client.cached_count(), 0);

    client
        .query(USER_QUERY, &json!({"id": 1}), QueryOptions::default())
        .await
        .unwrap();
    assert_eq!(transport.query_calls(), 2);
    assert_eq!(transport.mutation_calls(), 1);
}

#[tokio::test]
async fn test_mutation_invalidates_listed_queries_only() {
    let transport = MockTransport::with_data(json!({"ok": true}));
    let client = client(&transport);

    for id in [1, 2] {
        client
            .query(USER_QUERY, &json!({"id": id}), QueryOptions::default())
            .await
            .unwrap();
    }
    let one = client.fingerprint(USER_QUERY, &json!({"id": 1})).unwrap();
    let two = client.fingerprint(USER_QUERY, &json!({"id": 2})).unwrap();

    let options = MutateOptions::new().cache_update(CacheUpdate::Invalidate(vec![one]));
    client.mutate(RENAME_USER, &json!({"id": 1, "name": "y"}), options).await.unwrap();

    assert!(client.cache_entry(&one).is_none());
    assert!(client.cache_entry(&two).is_some());
}

#[tokio::test]
async fn test_mutation_merge_patches_cache() {
    let transport = MockTransport::new(|request, _| {
        if request.is_mutation() {
            Ok(GraphQLResponse::from_data(json!({"renameUser": {"id": 1, "name": "y"}})))
        } else {
            Ok(GraphQLResponse::from_data(json!({"user": {"id": 1, "name": "x"}})))
        }
    });
    let client = client(&transport);
    client
        .query(USER_QUERY, &json!({"id": 1}), QueryOptions::default())
        .await
        .unwrap();

    let options = MutateOptions::new().cache_update(CacheUpdate::merge(|_, cached, result| {
        let renamed = &result["renameUser"];
        if cached["user"]["id"] != renamed["id"] {
            return None;
        }
        let mut cached = cached.clone();
        cached["user"]["name"] = renamed["name"].clone();
        Some(cached)
    }));
    client.mutate(RENAME_USER, &json!({"id": 1, "name": "y"}), options).await.unwrap();

    let handle = client.query(USER_QUERY, &json!({"id": 1}), QueryOptions::default());
    assert!(handle.is_cached());
    assert_eq!(handle.await.unwrap(), json!({"user": {"id": 1, "name": "y"}}));
    assert_eq!(transport.query_calls(), 1);
}

#[tokio::test]
async fn test_failed_mutation_leaves_cache() {
    let transport = MockTransport::new(|request, _| {
        if request.is_mutation() {
            Ok(GraphQLResponse::from_errors(vec![ResponseError::new("forbidden")]))
        } else {
            Ok(GraphQLResponse::from_data(json!({"ok": true})))
        }
    });
    let client = client(&transport);
    client.query(USER_QUERY, &json!({"id": 1}), QueryOptions::default()).await.unwrap();

    let err = client
        .mutate(RENAME_USER, &json!({"id": 1, "name": "y"}), MutateOptions::default())
        .await
        .unwrap_err();
    assert!(err.is_graphql());
    assert_eq!(client.cached_count(), 1);
}

#[tokio::test]
async fn test_mutations_are_not_deduplicated() {
    let transport = MockTransport::with_data(json!({"ok": true}));
    let client = client(&transport);
    let vars = json!({"id": 1, "name": "y"});

    let (a, b) = tokio::join!(
        client.mutate(RENAME_USER, &vars, MutateOptions::new().cache_update(CacheUpdate::None)),
        client.mutate(RENAME_USER, &vars, MutateOptions::new().cache_update(CacheUpdate::None)),
    );
    assert!(a.is_ok() && b.is_ok());
    assert_eq!(transport.mutation_calls(), 2);
}

#[tokio::test]
async fn test_mutation_during_first_fetch_discards_its_result() {
    let server = Arc::new(Mutex::new("x"));
    let backend = server.clone();
    let transport = MockTransport::new(move |request, _| {
        if request.is_mutation() {
            *backend.lock() = "y";
            Ok(GraphQLResponse::from_data(json!({"renameUser": {"id": 1, "name": "y"}})))
        } else {
            Ok(GraphQLResponse::from_data(json!({"user": {"id": 1, "name": *backend.lock()}})))
        }
    });
    let client = client(&transport);
    let fingerprint = client.fingerprint(USER_QUERY, &json!({"id": 1})).unwrap();

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let _subscription = client.subscribe(fingerprint, move |event| sink.lock().push(event.clone()));

    // The first fetch reads "x" and is held until after the rename.
    let release = transport.hold_next();
    let mut pending = Box::pin(client.query(USER_QUERY, &json!({"id": 1}), QueryOptions::default()));
    assert!(futures_util::poll!(pending.as_mut()).is_pending());

    let removed = client
        .mutate(RENAME_USER, &json!({"id": 1, "name": "y"}), MutateOptions::default())
        .await
        .unwrap();
    assert_eq!(removed["renameUser"]["name"], "y");
    assert_eq!(*server.lock(), "y");
    assert!(!client.is_in_flight(&fingerprint));
    assert_eq!(events.lock().as_slice(), &[CacheEvent::Invalidated(fingerprint)]);

    release.send(()).unwrap();
    assert_eq!(pending.await.unwrap()["user"]["name"], "x");
    assert!(client.cache_entry(&fingerprint).is_none());

    let fresh = client
        .query(USER_QUERY, &json!({"id": 1}), QueryOptions::default())
        .await
        .unwrap();
    assert_eq!(fresh["user"]["name"], "y");
    assert_eq!(transport.query_calls(), 2);
}

#[tokio::test]
async fn test_invalidate_detaches_in_flight_call() {
    let transport = MockTransport::new(|_, call| Ok(GraphQLResponse::from_data(json!({ "call": call }))));
    let client = client(&transport);
    let fingerprint = client.fingerprint(USER_QUERY, &json!({"id": 1})).unwrap();
    let release = transport.hold_next();

    let mut old = Box::pin(client.query(USER_QUERY, &json!({"id": 1}), QueryOptions::default()));
    assert!(futures_util::poll!(old.as_mut()).is_pending());
    client.invalidate(&fingerprint);

    let new = client.query(USER_QUERY, &json!({"id": 1}), QueryOptions::default());
    assert!(!new.is_attached());
    assert_eq!(new.await.unwrap(), json!({"call": 2}));

    release.send(()).unwrap();
    assert_eq!(old.await.unwrap(), json!({"call": 1}));
    let entry = client.cache_entry(&fingerprint).unwrap();
    assert_eq!(entry.data(), Some(&json!({"call": 2})));
}

#[tokio::test]
async fn test_out_of_order_response_is_not_cached() {
    let transport = MockTransport::with_data(json!({"user": {"name": "A"}}));
    let client = client(&transport);
    let release = transport.hold_next();

    // The call for "A" starts first but settles after "B" was written.
    let mut pending = Box::pin(client.query(USER_QUERY, &json!({"id": 1}), QueryOptions::default()));
    assert!(futures_util::poll!(pending.as_mut()).is_pending());
    assert_eq!(transport.calls(), 1);

    client
        .write_query(USER_QUERY, &json!({"id": 1}), json!({"user": {"name": "B"}}))
        .unwrap();
    release.send(()).unwrap();

    assert_eq!(pending.await.unwrap(), json!({"user": {"name": "A"}}));
    let entry = client.read_query(USER_QUERY, &json!({"id": 1})).unwrap().unwrap();
    assert_eq!(entry.data(), Some(&json!({"user": {"name": "B"}})));
}

#[tokio::test]
async fn test_invalidated_in_flight_response_is_not_cached() {
    let transport = MockTransport::with_data(json!({"ok": true}));
    let client = client(&transport);
    let fingerprint = client.fingerprint(USER_QUERY, &json!({"id": 1})).unwrap();
    let release = transport.hold_next();

    let mut pending = Box::pin(client.query(USER_QUERY, &json!({"id": 1}), QueryOptions::default()));
    assert!(futures_util::poll!(pending.as_mut()).is_pending());
    client.invalidate(&fingerprint);
    release.send(()).unwrap();

    assert_eq!(pending.await.unwrap(), json!({"ok": true}));
    assert!(client.cache_entry(&fingerprint).is_none());
}

#[tokio::test]
async fn test_retries_transient_failures() {
    init_tracing();
    let transport = MockTransport::new(|_, call| {
        if call < 3 {
            Err(NetworkError::Timeout)
        } else {
            Ok(GraphQLResponse::from_data(json!({"ok": true})))
        }
    });
    let client = Draqula::builder(transport.clone()).retry(fast_retry(3)).build();

    let data = client.query(USER_QUERY, &json!({"id": 1}), QueryOptions::default()).await;
    assert_eq!(data.unwrap(), json!({"ok": true}));
    assert_eq!(transport.calls(), 3);
}

#[tokio::test]
async fn test_retries_are_bounded() {
    let transport = MockTransport::new(|_, _| Err(NetworkError::Connection("refused".into())));
    let client = Draqula::builder(transport.clone()).retry(fast_retry(2)).build();

    let err = client
        .query(USER_QUERY, &json!({"id": 1}), QueryOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err, DraqulaError::Network(NetworkError::Connection("refused".into())));
    assert_eq!(transport.calls(), 3);

    let entry = client.read_query(USER_QUERY, &json!({"id": 1})).unwrap().unwrap();
    assert!(entry.data().is_none());
    assert!(entry.error().is_some_and(DraqulaError::is_network));
}

#[tokio::test]
async fn test_non_transient_failures_are_not_retried() {
    let transport = MockTransport::new(|_, _| {
        Err(NetworkError::HttpStatus {
            status: 400,
            message: None,
        })
    });
    let client = Draqula::builder(transport.clone()).retry(fast_retry(3)).build();

    assert!(client.query("{ a }", &(), QueryOptions::default()).await.is_err());
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn test_graphql_errors_are_not_retried_by_default() {
    let transport = MockTransport::new(|_, _| {
        Ok(GraphQLResponse::from_errors(vec![ResponseError::new("User not found")]))
    });
    let client = Draqula::builder(transport.clone()).retry(fast_retry(3)).build();

    let err = client
        .query(USER_QUERY, &json!({"id": 1}), QueryOptions::default())
        .await
        .unwrap_err();
    let graphql = err.as_graphql().unwrap();
    assert_eq!(graphql.errors[0].message, "User not found");
    assert_eq!(transport.calls(), 1);

    let opted_in = Draqula::builder(transport.clone())
        .retry(RetryConfig {
            retry_graphql_errors: true,
            ..fast_retry(2)
        })
        .build();
    assert!(opted_in.query("{ a }", &(), QueryOptions::default()).await.is_err());
    assert_eq!(transport.calls(), 1 + 3);
}

#[tokio::test]
async fn test_mutations_retry_only_when_asked() {
    let transport = MockTransport::new(|_, call| {
        if call == 1 {
            Err(NetworkError::Timeout)
        } else {
            Ok(GraphQLResponse::from_data(json!({"ok": true})))
        }
    });
    let client = Draqula::builder(transport.clone()).retry(fast_retry(3)).build();

    let err = client
        .mutate(RENAME_USER, &json!({"id": 1, "name": "y"}), MutateOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err, DraqulaError::Network(NetworkError::Timeout));

    let transport = MockTransport::new(|_, call| {
        if call == 1 {
            Err(NetworkError::Timeout)
        } else {
            Ok(GraphQLResponse::from_data(json!({"ok": true})))
        }
    });
    let client = Draqula::builder(transport.clone()).retry(fast_retry(3)).build();
    let data = client
        .mutate(RENAME_USER, &json!({"id": 1, "name": "y"}), MutateOptions::new().retry(true))
        .await
        .unwrap();
    assert_eq!(data, json!({"ok": true}));
    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn test_cached_error_is_retried_by_next_query() {
    let transport = MockTransport::new(|_, call| {
        if call == 1 {
            Ok(GraphQLResponse::from_errors(vec![ResponseError::new("flaky")]))
        } else {
            Ok(GraphQLResponse::from_data(json!({"ok": true})))
        }
    });
    let client = client(&transport);

    assert!(client.query("{ a }", &(), QueryOptions::default()).await.is_err());
    assert_eq!(client.query("{ a }", &(), QueryOptions::default()).await.unwrap(), json!({"ok": true}));
    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn test_abandoned_query_cancels_call() {
    let transport = MockTransport::with_data(json!({"ok": true}));
    let client = client(&transport);
    let release = transport.hold_next();

    let mut pending = Box::pin(client.query(USER_QUERY, &json!({"id": 1}), QueryOptions::default()));
    assert!(futures_util::poll!(pending.as_mut()).is_pending());
    assert_eq!(client.in_flight_count(), 1);

    drop(pending);
    assert_eq!(client.in_flight_count(), 0);
    // The held transport future was dropped with the call.
    assert!(release.send(()).is_err());
    assert_eq!(client.cached_count(), 0);

    let data = client.query(USER_QUERY, &json!({"id": 1}), QueryOptions::default()).await;
    assert_eq!(data.unwrap(), json!({"ok": true}));
    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn test_remaining_caller_keeps_call_alive() {
    let transport = MockTransport::with_data(json!({"ok": true}));
    let client = client(&transport);
    let release = transport.hold_next();

    let mut first = Box::pin(client.query(USER_QUERY, &json!({"id": 1}), QueryOptions::default()));
    let second = client.query(USER_QUERY, &json!({"id": 1}), QueryOptions::default());
    assert!(futures_util::poll!(first.as_mut()).is_pending());
    drop(first);

    release.send(()).unwrap();
    assert_eq!(second.await.unwrap(), json!({"ok": true}));
    assert_eq!(transport.calls(), 1);
    assert_eq!(client.cached_count(), 1);
}

#[tokio::test]
async fn test_subscribers_see_data_errors_and_invalidation() {
    let transport = MockTransport::new(|_, call| {
        if call == 1 {
            Ok(GraphQLResponse::from_data(json!({"ok": true})))
        } else {
            Err(NetworkError::Timeout)
        }
    });
    let client = client(&transport);
    let fingerprint = client.fingerprint(USER_QUERY, &json!({"id": 1})).unwrap();

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let subscription = client.subscribe(fingerprint, move |event| sink.lock().push(event.clone()));
    assert_eq!(client.subscriber_count(&fingerprint), 1);

    client.query(USER_QUERY, &json!({"id": 1}), QueryOptions::default()).await.unwrap();
    client.invalidate(&fingerprint);
    client
        .query(USER_QUERY, &json!({"id": 1}), QueryOptions::default())
        .await
        .unwrap_err();

    {
        let events = events.lock();
        assert_eq!(events.len(), 3);
        assert!(matches!(&events[0], CacheEvent::Updated(e) if e.data() == Some(&json!({"ok": true}))));
        assert_eq!(events[1], CacheEvent::Invalidated(fingerprint));
        assert!(matches!(
            &events[2],
            CacheEvent::Updated(e) if e.error() == Some(&DraqulaError::Network(NetworkError::Timeout))
        ));
    }

    subscription.unsubscribe();
    assert_eq!(client.subscriber_count(&fingerprint), 0);
    client.invalidate(&fingerprint);
    client
        .query(USER_QUERY, &json!({"id": 1}), QueryOptions::default())
        .await
        .unwrap_err();
    assert_eq!(events.lock().len(), 3);
}

#[tokio::test]
async fn test_subscription_dropped_with_scope() {
    let transport = MockTransport::with_data(json!({"ok": true}));
    let client = client(&transport);
    let fingerprint = client.fingerprint("{ a }", &()).unwrap();
    let hits = Arc::new(AtomicUsize::new(0));

    {
        let hits = hits.clone();
        let _subscription = client.subscribe(fingerprint, move |_| {
            hits.fetch_add(1, Ordering::SeqCst);
        });
    }
    client.query("{ a }", &(), QueryOptions::default()).await.unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    assert_eq!(client.subscriber_count(&fingerprint), 0);
}

#[tokio::test]
async fn test_network_only_bypasses_cache() {
    let transport = MockTransport::new(|_, call| Ok(GraphQLResponse::from_data(json!({"call": call}))));
    let client = client(&transport);

    client.query("{ a }", &(), QueryOptions::default()).await.unwrap();
    let fresh = client.refetch_query("{ a }", &()).await.unwrap();
    assert_eq!(fresh, json!({"call": 2}));

    let handle = client.query("{ a }", &(), QueryOptions::new().fetch_policy(FetchPolicy::CacheFirst));
    assert!(handle.is_cached());
    assert_eq!(handle.await.unwrap(), json!({"call": 2}));
}

#[tokio::test]
async fn test_cache_and_network_revalidates_in_background() {
    let transport = MockTransport::new(|_, call| Ok(GraphQLResponse::from_data(json!({"call": call}))));
    let client = client(&transport);
    let fingerprint = client.fingerprint("{ a }", &()).unwrap();
    client.query("{ a }", &(), QueryOptions::default()).await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let _subscription = client.subscribe(fingerprint, move |event| {
        let _ = tx.send(event.clone());
    });

    let handle = client.query("{ a }", &(), QueryOptions::refetch());
    assert!(handle.is_cached());
    assert_eq!(handle.await.unwrap(), json!({"call": 1}));

    let event = rx.recv().await.unwrap();
    assert!(matches!(event, CacheEvent::Updated(e) if e.data() == Some(&json!({"call": 2}))));
    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn test_stale_data_is_served_while_revalidating() {
    let transport = MockTransport::new(|_, call| Ok(GraphQLResponse::from_data(json!({"call": call}))));
    let client = Draqula::builder(transport.clone())
        .no_retry()
        .stale_after(Duration::from_millis(50))
        .build();
    let fingerprint = client.fingerprint("{ a }", &()).unwrap();

    client.query("{ a }", &(), QueryOptions::default()).await.unwrap();
    let fresh = client.query("{ a }", &(), QueryOptions::default());
    assert!(fresh.is_cached());
    drop(fresh);
    assert_eq!(transport.calls(), 1);

    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(client.cache_entry(&fingerprint).unwrap().is_stale());

    let (tx, mut rx) = mpsc::unbounded_channel();
    let _subscription = client.subscribe(fingerprint, move |event| {
        let _ = tx.send(event.clone());
    });

    let stale = client.query("{ a }", &(), QueryOptions::default()).await.unwrap();
    assert_eq!(stale, json!({"call": 1}));

    let event = rx.recv().await.unwrap();
    assert!(matches!(event, CacheEvent::Updated(e) if e.data() == Some(&json!({"call": 2}))));
    let entry = client.cache_entry(&fingerprint).unwrap();
    assert!(!entry.is_stale());
}

#[tokio::test]
async fn test_collect_garbage_spares_observed_entries() {
    let transport = MockTransport::with_data(json!({"ok": true}));
    let client = Draqula::builder(transport.clone())
        .cache_time(Duration::from_millis(5))
        .build();

    client.query("{ a }", &(), QueryOptions::default()).await.unwrap();
    client.query("{ b }", &(), QueryOptions::default()).await.unwrap();
    let a = client.fingerprint("{ a }", &()).unwrap();
    let b = client.fingerprint("{ b }", &()).unwrap();
    let _watching_b = client.subscribe(b, |_| {});

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(client.collect_garbage(), vec![a]);
    assert!(client.cache_entry(&a).is_none());
    assert!(client.cache_entry(&b).is_some());
}

#[tokio::test]
async fn test_write_query_is_served_and_notified() {
    let transport = MockTransport::with_data(json!({"from": "network"}));
    let client = client(&transport);
    let fingerprint = client.fingerprint(USER_QUERY, &json!({"id": 7})).unwrap();

    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let _subscription = client.subscribe(fingerprint, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let written = client
        .write_query(USER_QUERY, &json!({"id": 7}), json!({"from": "local"}))
        .unwrap();
    assert_eq!(written, fingerprint);
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    let data = client.query(USER_QUERY, &json!({"id": 7}), QueryOptions::default()).await;
    assert_eq!(data.unwrap(), json!({"from": "local"}));
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn test_request_body_reaches_transport() {
    let transport = MockTransport::with_data(json!({"ok": true}));
    let client = client(&transport);

    let request = GraphQLRequest::query(USER_QUERY)
        .operation_name("GetUser")
        .variable("id", 3)
        .unwrap();
    client.query_request(request, QueryOptions::default()).await.unwrap();

    let sent = transport.requests.lock()[0].clone();
    assert_eq!(
        serde_json::to_value(&sent).unwrap(),
        json!({"query": USER_QUERY, "variables": {"id": 3}, "operationName": "GetUser"})
    );
}
