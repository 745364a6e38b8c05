//! The query hook.

use std::fmt;
use std::sync::Arc;

use draqula_core::{
    CacheEntry, CacheEvent, Draqula, DraqulaError, FetchPolicy, Fingerprint, GraphQLRequest,
    NetworkError, QueryOptions, Subscription, WeakDraqula,
};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;

const TARGET: &str = "draqula::hooks";

/// The observable state of a [`UseQuery`].
#[derive(Debug, Clone, PartialEq)]
pub enum QueryState {
    /// No result yet.
    Loading,
    /// The query returned data.
    Success {
        /// The data.
        data: Value,
        /// Whether the data is older than the client's freshness window.
        is_stale: bool,
    },
    /// The query failed.
    Error(DraqulaError),
}

impl QueryState {
    fn from_entry(entry: &CacheEntry) -> Self {
        match entry.result() {
            Ok(data) => Self::Success {
                data: data.clone(),
                is_stale: entry.is_stale(),
            },
            Err(err) => Self::Error(err.clone()),
        }
    }

    fn from_result(result: Result<Value, DraqulaError>) -> Self {
        match result {
            Ok(data) => Self::Success {
                data,
                is_stale: false,
            },
            Err(err) => Self::Error(err),
        }
    }

    /// The data, if the query succeeded.
    pub fn data(&self) -> Option<&Value> {
        match self {
            Self::Success { data, .. } => Some(data),
            _ => None,
        }
    }

    /// The error, if the query failed.
    pub fn error(&self) -> Option<&DraqulaError> {
        match self {
            Self::Error(err) => Some(err),
            _ => None,
        }
    }

    /// Check if no result has arrived yet.
    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Loading)
    }

    /// Check if the query succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Check if the query failed.
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Check if the data is stale.
    pub fn is_stale(&self) -> bool {
        matches!(self, Self::Success { is_stale: true, .. })
    }
}

struct Shared {
    client: WeakDraqula,
    request: GraphQLRequest,
    fingerprint: Fingerprint,
    runtime: Handle,
    state: watch::Sender<QueryState>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Shared {
    /// Start a fetch and publish its result.
    ///
    /// The new handle is created before the previous task is aborted, so an
    /// identical call that is still in flight stays attached.
    fn fetch(self: &Arc<Self>, options: QueryOptions) {
        let Some(client) = self.client.upgrade() else {
            return;
        };
        let handle = client.query_request(self.request.clone(), options);
        let shared = Arc::downgrade(self);
        let task = self.runtime.spawn(async move {
            let result = handle.await;
            if let Some(shared) = shared.upgrade() {
                shared.settle(&client, result);
            }
        });
        if let Some(previous) = self.task.lock().replace(task) {
            previous.abort();
        }
    }

    /// Publish a settled result.
    ///
    /// The cache holds the newest accepted result for the fingerprint, which
    /// may be newer than `result` if a later write overtook this call.
    fn settle(&self, client: &Draqula, result: Result<Value, DraqulaError>) {
        let state = match client.cache_entry(&self.fingerprint) {
            Some(entry) => QueryState::from_entry(&entry),
            None => QueryState::from_result(result),
        };
        self.state.send_replace(state);
    }

    fn on_cache_event(self: &Arc<Self>, event: &CacheEvent) {
        match event {
            CacheEvent::Updated(entry) => {
                self.state.send_replace(QueryState::from_entry(entry));
            }
            CacheEvent::Invalidated(fingerprint) => {
                tracing::debug!(target: TARGET, %fingerprint, "query invalidated, refetching");
                self.fetch(QueryOptions::default());
            }
        }
    }
}

/// A live query bound to a client.
///
/// Created by [`use_query`]. The state follows the cache: every write for the
/// query's fingerprint is published, and invalidation triggers a refetch.
/// Dropping the hook unsubscribes it and detaches it from any pending call.
pub struct UseQuery {
    state: watch::Receiver<QueryState>,
    shared: Option<Arc<Shared>>,
    subscription: Option<Subscription>,
}

impl UseQuery {
    fn failed(error: DraqulaError) -> Self {
        let (_, state) = watch::channel(QueryState::Error(error));
        Self {
            state,
            shared: None,
            subscription: None,
        }
    }

    /// The current state.
    pub fn state(&self) -> QueryState {
        self.state.borrow().clone()
    }

    /// The current data, if any.
    pub fn data(&self) -> Option<Value> {
        self.state.borrow().data().cloned()
    }

    /// The current error, if any.
    pub fn error(&self) -> Option<DraqulaError> {
        self.state.borrow().error().cloned()
    }

    /// Check if no result has arrived yet.
    pub fn is_loading(&self) -> bool {
        self.state.borrow().is_loading()
    }

    /// The query's fingerprint. `None` when the variables failed to
    /// serialize.
    pub fn fingerprint(&self) -> Option<Fingerprint> {
        self.shared.as_ref().map(|shared| shared.fingerprint)
    }

    /// A receiver that observes every state change.
    pub fn watch(&self) -> watch::Receiver<QueryState> {
        self.state.clone()
    }

    /// Wait for the next state change and return the new state.
    ///
    /// Returns the current state immediately if the hook can no longer
    /// change (for example after a serialization failure).
    pub async fn changed(&mut self) -> QueryState {
        let _ = self.state.changed().await;
        self.state.borrow_and_update().clone()
    }

    /// Wait until the state is no longer [`QueryState::Loading`].
    pub async fn settled(&mut self) -> QueryState {
        if let Ok(state) = self.state.wait_for(|state| !state.is_loading()).await {
            return state.clone();
        }
        self.state.borrow().clone()
    }

    /// Fetch the query again from the network.
    ///
    /// The current state is kept until the new result arrives.
    pub fn refetch(&self) {
        if let Some(shared) = &self.shared {
            tracing::debug!(target: TARGET, fingerprint = %shared.fingerprint, "refetch");
            shared.fetch(QueryOptions::network_only());
        }
    }
}

impl Drop for UseQuery {
    fn drop(&mut self) {
        if let Some(subscription) = &self.subscription {
            subscription.unsubscribe();
        }
        if let Some(shared) = &self.shared
            && let Some(task) = shared.task.lock().take()
        {
            task.abort();
        }
    }
}

impl fmt::Debug for UseQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UseQuery")
            .field("fingerprint", &self.fingerprint())
            .field("state", &*self.state.borrow())
            .finish()
    }
}

/// Run a query and keep its result up to date.
///
/// The returned hook starts in [`QueryState::Loading`], or directly in
/// [`QueryState::Success`] when the cache already holds data. It must be
/// created inside a Tokio runtime; fetches run as tasks on that runtime.
///
/// # Example
///
/// ```ignore
/// let mut user = use_query(&client, USER_QUERY, &json!({"id": 1}), QueryOptions::default());
/// match user.settled().await {
///     QueryState::Success { data, .. } => println!("{}", data["user"]["name"]),
///     QueryState::Error(err) => eprintln!("{err}"),
///     QueryState::Loading => unreachable!(),
/// }
/// ```
pub fn use_query<V>(client: &Draqula, document: &str, variables: &V, options: QueryOptions) -> UseQuery
where
    V: Serialize + ?Sized,
{
    let request = match GraphQLRequest::query(document).variables(variables) {
        Ok(request) => request,
        Err(err) => return UseQuery::failed(err.into()),
    };
    let Ok(runtime) = Handle::try_current() else {
        return UseQuery::failed(
            NetworkError::Request("use_query must be called within a Tokio runtime".into()).into(),
        );
    };

    let fingerprint = Fingerprint::of(&request);
    let initial = match client.cache_entry(&fingerprint) {
        Some(entry) if entry.data().is_some() && options.fetch_policy != FetchPolicy::NetworkOnly => {
            QueryState::from_entry(&entry)
        }
        _ => QueryState::Loading,
    };
    let (sender, state) = watch::channel(initial);

    let shared = Arc::new(Shared {
        client: client.downgrade(),
        request,
        fingerprint,
        runtime,
        state: sender,
        task: Mutex::new(None),
    });

    let weak = Arc::downgrade(&shared);
    let subscription = client.subscribe(fingerprint, move |event| {
        if let Some(shared) = weak.upgrade() {
            shared.on_cache_event(event);
        }
    });
    shared.fetch(options);

    UseQuery {
        state,
        shared: Some(shared),
        subscription: Some(subscription),
    }
}
