//! The query client.

use std::collections::HashSet;
use std::fmt;
use std::future::{Future, Ready};
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;
use tracing::Instrument;

use crate::cache::{CacheConfig, CacheEntry, ResponseCache};
use crate::config::{CacheUpdate, FetchPolicy, MutateOptions, QueryOptions, RetryConfig};
use crate::error::{DraqulaError, Result, SerializationError};
use crate::fingerprint::Fingerprint;
use crate::inflight::{InFlight, InFlightHandle};
use crate::logging::{span_names, targets};
use crate::request::{GraphQLRequest, OperationType};
use crate::subscription::{CacheEvent, Subscription, SubscriptionRegistry};
use crate::transport::Transport;

/// Builder for creating a [`Draqula`] client.
pub struct DraqulaBuilder {
    transport: Arc<dyn Transport>,
    retry: RetryConfig,
    cache: CacheConfig,
}

impl DraqulaBuilder {
    /// Create a new builder around `transport`.
    pub fn new(transport: impl Transport) -> Self {
        Self {
            transport: Arc::new(transport),
            retry: RetryConfig::default(),
            cache: CacheConfig::default(),
        }
    }

    /// Set the retry policy for queries (and for mutations that opt in).
    pub fn retry(mut self, config: RetryConfig) -> Self {
        self.retry = config;
        self
    }

    /// Disable retries.
    pub fn no_retry(mut self) -> Self {
        self.retry = RetryConfig::none();
        self
    }

    /// Set the maximum number of retries, keeping the other retry settings.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.retry.max_retries = max_retries;
        self
    }

    /// Mark cached data stale after `duration`.
    ///
    /// Stale data is still served, and revalidated in the background.
    pub fn stale_after(mut self, duration: Duration) -> Self {
        self.cache.stale_after = Some(duration);
        self
    }

    /// Let [`Draqula::collect_garbage`] drop unobserved entries older than
    /// `duration`.
    pub fn cache_time(mut self, duration: Duration) -> Self {
        self.cache.cache_time = Some(duration);
        self
    }

    /// Build the client.
    pub fn build(self) -> Draqula {
        Draqula {
            inner: Arc::new(Inner {
                transport: self.transport,
                retry: self.retry,
                cache: ResponseCache::new(self.cache),
                inflight: InFlight::new(),
                subscribers: Arc::new(SubscriptionRegistry::new()),
            }),
        }
    }
}

struct Inner {
    transport: Arc<dyn Transport>,
    retry: RetryConfig,
    cache: ResponseCache,
    inflight: InFlight,
    subscribers: Arc<SubscriptionRegistry>,
}

impl Inner {
    /// One deduplicated transport call: send, cache, notify.
    async fn execute(
        self: Arc<Self>,
        fingerprint: Fingerprint,
        generation: u64,
        request: GraphQLRequest,
    ) -> Result<Value> {
        let span = tracing::info_span!(
            target: targets::TRANSPORT,
            span_names::TRANSPORT,
            %fingerprint,
            generation
        );
        let result = self.send(&request, &self.retry).instrument(span).await;

        match self.cache.set_if_newer(fingerprint, generation, result.clone()) {
            Some(entry) => {
                self.subscribers.notify(&CacheEvent::Updated(entry));
            }
            None => {
                tracing::debug!(
                    target: targets::CLIENT,
                    %fingerprint,
                    generation,
                    "response superseded; not cached"
                );
            }
        }
        result
    }

    /// Send `request`, retrying per `retry`.
    async fn send(&self, request: &GraphQLRequest, retry: &RetryConfig) -> Result<Value> {
        let mut attempts = 0;
        let mut delay = retry.initial_delay();

        loop {
            let result = self
                .transport
                .send(request)
                .await
                .map_err(DraqulaError::from)
                .and_then(|response| response.into_result());

            match result {
                Ok(data) => return Ok(data),
                Err(err) if attempts < retry.max_retries && retry.should_retry(&err) => {
                    // Backoff needs a Tokio timer.
                    if tokio::runtime::Handle::try_current().is_err() {
                        tracing::debug!(
                            target: targets::TRANSPORT,
                            attempts,
                            error = %err,
                            "no runtime; not retrying"
                        );
                        return Err(err);
                    }
                    attempts += 1;
                    tracing::warn!(
                        target: targets::TRANSPORT,
                        attempt = attempts,
                        max_retries = retry.max_retries,
                        ?delay,
                        error = %err,
                        "request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay = retry.next_delay(delay);
                }
                Err(err) => {
                    tracing::debug!(target: targets::TRANSPORT, attempts, error = %err, "request failed");
                    return Err(err);
                }
            }
        }
    }

    /// Pending calls are detached first, so observers refetching on the
    /// notification start a new call instead of joining the outdated one.
    fn invalidate(&self, fingerprint: &Fingerprint) -> bool {
        self.inflight.forget(fingerprint);
        let removed = self.cache.invalidate(fingerprint);
        self.subscribers.notify(&CacheEvent::Invalidated(*fingerprint));
        removed
    }

    /// Notifies every removed fingerprint and every observed one, including
    /// observers whose first fetch has not settled yet.
    fn invalidate_all(&self) -> Vec<Fingerprint> {
        self.inflight.forget_all();
        let removed = self.cache.invalidate_all();
        let mut notify: HashSet<Fingerprint> = removed.iter().copied().collect();
        notify.extend(self.subscribers.fingerprints());
        for fingerprint in notify {
            self.subscribers.notify(&CacheEvent::Invalidated(fingerprint));
        }
        removed
    }
}

/// A caching, deduplicating GraphQL client.
///
/// Cloning is cheap; every clone shares the same cache, in-flight table and
/// subscribers.
///
/// # Example
///
/// ```
/// use draqula_core::{Draqula, GraphQLRequest, GraphQLResponse, NetworkError, QueryOptions};
/// use serde_json::json;
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let client = Draqula::builder(|_: &GraphQLRequest| async {
///     Ok::<_, NetworkError>(GraphQLResponse::from_data(json!({"user": {"id": 1}})))
/// })
/// .build();
///
/// let data = client
///     .query("query U($id: ID!) { user(id: $id) { id } }", &json!({"id": 1}), QueryOptions::default())
///     .await
///     .unwrap();
/// assert_eq!(data["user"]["id"], 1);
/// # });
/// ```
#[derive(Clone)]
pub struct Draqula {
    inner: Arc<Inner>,
}

impl Draqula {
    /// Create a client with default settings.
    pub fn new(transport: impl Transport) -> Self {
        DraqulaBuilder::new(transport).build()
    }

    /// Create a new builder for configuring a client.
    pub fn builder(transport: impl Transport) -> DraqulaBuilder {
        DraqulaBuilder::new(transport)
    }

    /// The retry policy.
    pub fn retry_config(&self) -> &RetryConfig {
        &self.inner.retry
    }

    /// The cache configuration.
    pub fn cache_config(&self) -> &CacheConfig {
        self.inner.cache.config()
    }

    /// Fingerprint a query the same way [`query`](Self::query) does.
    pub fn fingerprint<V>(
        &self,
        document: &str,
        variables: &V,
    ) -> std::result::Result<Fingerprint, SerializationError>
    where
        V: Serialize + ?Sized,
    {
        build_request(OperationType::Query, document, variables).map(|r| Fingerprint::of(&r))
    }

    /// Run a query.
    ///
    /// Returns a handle that resolves to the data or the error. Cached data is
    /// returned without touching the transport; otherwise the request joins
    /// any identical call already in flight, or starts a new one.
    ///
    /// Variables that cannot be serialized resolve to
    /// [`DraqulaError::Serialization`] without any transport work.
    ///
    /// The handle may be polled outside a Tokio runtime, in which case
    /// failed calls are not retried and stale data is not revalidated.
    pub fn query<V>(&self, document: &str, variables: &V, options: QueryOptions) -> QueryHandle
    where
        V: Serialize + ?Sized,
    {
        match build_request(OperationType::Query, document, variables) {
            Ok(request) => self.query_request(request, options),
            Err(err) => QueryHandle::failed(err.into()),
        }
    }

    /// Run a prepared query request.
    pub fn query_request(&self, request: GraphQLRequest, options: QueryOptions) -> QueryHandle {
        let fingerprint = Fingerprint::of(&request);

        if options.fetch_policy != FetchPolicy::NetworkOnly
            && let Some(entry) = self.inner.cache.get(&fingerprint)
            && let Ok(data) = entry.result()
        {
            let stale = entry.is_stale();
            tracing::debug!(target: targets::CLIENT, %fingerprint, stale, "cache hit");
            if stale || options.fetch_policy == FetchPolicy::CacheAndNetwork {
                self.revalidate(fingerprint, request);
            }
            return QueryHandle::cached(fingerprint, data.clone());
        }

        tracing::debug!(target: targets::CLIENT, %fingerprint, "cache miss");
        QueryHandle::network(self.fetch(fingerprint, request))
    }

    /// Re-run a query against the network, bypassing the cached data.
    pub fn refetch_query<V>(&self, document: &str, variables: &V) -> QueryHandle
    where
        V: Serialize + ?Sized,
    {
        self.query(document, variables, QueryOptions::network_only())
    }

    fn fetch(&self, fingerprint: Fingerprint, request: GraphQLRequest) -> InFlightHandle {
        let inner = self.inner.clone();
        self.inner.inflight.dedupe(fingerprint, move || {
            let generation = inner.cache.next_generation();
            inner.execute(fingerprint, generation, request)
        })
    }

    /// Refresh an entry in the background, keeping the call alive until it
    /// settles.
    fn revalidate(&self, fingerprint: Fingerprint, request: GraphQLRequest) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!(
                target: targets::CLIENT,
                %fingerprint,
                "no runtime; skipping background revalidation"
            );
            return;
        };
        let handle = self.fetch(fingerprint, request);
        tracing::debug!(target: targets::CLIENT, %fingerprint, ticket = handle.ticket(), "revalidating");
        runtime.spawn(async move {
            let _ = handle.await;
        });
    }

    /// Run a mutation.
    ///
    /// Mutations never read the cache and are never deduplicated. On success
    /// the cache is updated per [`MutateOptions::cache_update`]; on failure
    /// the cache is left untouched.
    pub fn mutate<V>(
        &self,
        document: &str,
        variables: &V,
        options: MutateOptions,
    ) -> BoxFuture<'static, Result<Value>>
    where
        V: Serialize + ?Sized,
    {
        let request = build_request(OperationType::Mutation, document, variables);
        let client = self.clone();
        async move { client.mutate_request(request?, options).await }.boxed()
    }

    /// Run a prepared mutation request.
    pub async fn mutate_request(
        &self,
        request: GraphQLRequest,
        options: MutateOptions,
    ) -> Result<Value> {
        let retry = if options.retry {
            self.inner.retry.clone()
        } else {
            RetryConfig::none()
        };
        let span = tracing::info_span!(
            target: targets::CLIENT,
            span_names::MUTATION,
            operation_name = request.operation_name.as_deref().unwrap_or_default()
        );
        let data = self.inner.send(&request, &retry).instrument(span).await?;
        self.apply_cache_update(&options.cache_update, &data);
        Ok(data)
    }

    fn apply_cache_update(&self, update: &CacheUpdate, data: &Value) {
        match update {
            CacheUpdate::InvalidateAll => {
                self.invalidate_all();
            }
            CacheUpdate::Invalidate(fingerprints) => {
                for fingerprint in fingerprints {
                    self.invalidate(fingerprint);
                }
            }
            CacheUpdate::Merge(merge) => {
                for fingerprint in self.inner.cache.fingerprints() {
                    let patched = self
                        .inner
                        .cache
                        .update(&fingerprint, |cached| merge(fingerprint, cached, data));
                    if let Some(entry) = patched {
                        tracing::debug!(target: targets::CLIENT, %fingerprint, "merged mutation result");
                        self.inner.subscribers.notify(&CacheEvent::Updated(entry));
                    }
                }
            }
            CacheUpdate::None => {}
        }
    }

    /// Observe changes to the cache entry for `fingerprint`.
    ///
    /// `callback` runs after every write (data or error) and every
    /// invalidation of that entry. It must not block.
    pub fn subscribe<F>(&self, fingerprint: Fingerprint, callback: F) -> Subscription
    where
        F: Fn(&CacheEvent) + Send + Sync + 'static,
    {
        self.inner.subscribers.subscribe(fingerprint, callback)
    }

    /// Drop the cached entry for `fingerprint` and notify its subscribers.
    ///
    /// Returns `true` if an entry was cached. A call already in flight still
    /// resolves for its callers, but its result is not cached, and later
    /// queries start a new call instead of joining it.
    pub fn invalidate(&self, fingerprint: &Fingerprint) -> bool {
        self.inner.invalidate(fingerprint)
    }

    /// Drop every cached entry, returning the fingerprints removed.
    ///
    /// Every observed fingerprint is notified, cached or not. Calls already
    /// in flight behave as with [`invalidate`](Self::invalidate).
    pub fn invalidate_all(&self) -> Vec<Fingerprint> {
        self.inner.invalidate_all()
    }

    /// The cached entry for `fingerprint`, if any.
    pub fn cache_entry(&self, fingerprint: &Fingerprint) -> Option<CacheEntry> {
        self.inner.cache.get(fingerprint)
    }

    /// The cached entry for a query, if any. Never touches the transport.
    pub fn read_query<V>(&self, document: &str, variables: &V) -> Result<Option<CacheEntry>>
    where
        V: Serialize + ?Sized,
    {
        let fingerprint = self.fingerprint(document, variables)?;
        Ok(self.cache_entry(&fingerprint))
    }

    /// Write data for a query directly into the cache and notify subscribers.
    ///
    /// Calls already in flight for the same query will not overwrite it.
    pub fn write_query<V>(&self, document: &str, variables: &V, data: Value) -> Result<Fingerprint>
    where
        V: Serialize + ?Sized,
    {
        let fingerprint = self.fingerprint(document, variables)?;
        let entry = self.inner.cache.set(fingerprint, Ok(data));
        self.inner.subscribers.notify(&CacheEvent::Updated(entry));
        Ok(fingerprint)
    }

    /// Drop entries older than the configured cache time that nobody is
    /// subscribed to. Returns the fingerprints removed.
    pub fn collect_garbage(&self) -> Vec<Fingerprint> {
        let subscribers = &self.inner.subscribers;
        self.inner
            .cache
            .collect_garbage(|fingerprint| subscribers.subscriber_count(fingerprint) > 0)
    }

    /// Check whether a call for `fingerprint` is in flight.
    pub fn is_in_flight(&self, fingerprint: &Fingerprint) -> bool {
        self.inner.inflight.is_pending(fingerprint)
    }

    /// Number of calls currently in flight.
    pub fn in_flight_count(&self) -> usize {
        self.inner.inflight.len()
    }

    /// Number of cached entries.
    pub fn cached_count(&self) -> usize {
        self.inner.cache.len()
    }

    /// Number of subscribers for `fingerprint`.
    pub fn subscriber_count(&self, fingerprint: &Fingerprint) -> usize {
        self.inner.subscribers.subscriber_count(fingerprint)
    }

    /// Create a weak reference that does not keep the client alive.
    pub fn downgrade(&self) -> WeakDraqula {
        WeakDraqula {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Check whether two handles share the same client.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Draqula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Draqula")
            .field("retry", &self.inner.retry)
            .field("cache", &self.inner.cache)
            .field("inflight", &self.inner.inflight)
            .field("subscribers", &self.inner.subscribers)
            .finish()
    }
}

/// A weak reference to a [`Draqula`] client.
#[derive(Clone, Default)]
pub struct WeakDraqula {
    inner: Weak<Inner>,
}

impl WeakDraqula {
    /// Upgrade to a client, if it is still alive.
    pub fn upgrade(&self) -> Option<Draqula> {
        self.inner.upgrade().map(|inner| Draqula { inner })
    }
}

impl fmt::Debug for WeakDraqula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakDraqula")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

fn build_request<V>(
    operation_type: OperationType,
    document: &str,
    variables: &V,
) -> std::result::Result<GraphQLRequest, SerializationError>
where
    V: Serialize + ?Sized,
{
    let request = match operation_type {
        OperationType::Query => GraphQLRequest::query(document),
        OperationType::Mutation => GraphQLRequest::mutation(document),
    };
    request.variables(variables)
}

enum Source {
    Ready(Ready<Result<Value>>),
    Network(InFlightHandle),
}

/// The pending result of [`Draqula::query`].
///
/// Resolves immediately for cached data, otherwise when the transport call
/// settles. Dropping the handle detaches this caller; the call is cancelled
/// once no caller remains.
#[must_use = "queries do nothing unless awaited"]
pub struct QueryHandle {
    fingerprint: Option<Fingerprint>,
    cached: bool,
    source: Source,
}

impl QueryHandle {
    fn cached(fingerprint: Fingerprint, data: Value) -> Self {
        Self {
            fingerprint: Some(fingerprint),
            cached: true,
            source: Source::Ready(std::future::ready(Ok(data))),
        }
    }

    fn failed(error: DraqulaError) -> Self {
        Self {
            fingerprint: None,
            cached: false,
            source: Source::Ready(std::future::ready(Err(error))),
        }
    }

    fn network(handle: InFlightHandle) -> Self {
        Self {
            fingerprint: Some(handle.fingerprint()),
            cached: false,
            source: Source::Network(handle),
        }
    }

    /// The request's fingerprint. `None` when the variables failed to
    /// serialize.
    pub fn fingerprint(&self) -> Option<Fingerprint> {
        self.fingerprint
    }

    /// The transport call this handle waits on, if any.
    ///
    /// Handles with equal tickets share one call.
    pub fn ticket(&self) -> Option<u64> {
        match &self.source {
            Source::Network(handle) => Some(handle.ticket()),
            Source::Ready(_) => None,
        }
    }

    /// Whether the result came from the cache.
    pub fn is_cached(&self) -> bool {
        self.cached
    }

    /// Whether this handle joined a call that was already in flight.
    pub fn is_attached(&self) -> bool {
        match &self.source {
            Source::Network(handle) => handle.is_attached(),
            Source::Ready(_) => false,
        }
    }
}

impl Future for QueryHandle {
    type Output = Result<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.source {
            Source::Ready(ready) => Pin::new(ready).poll(cx),
            Source::Network(handle) => Pin::new(handle).poll(cx),
        }
    }
}

impl fmt::Debug for QueryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryHandle")
            .field("fingerprint", &self.fingerprint)
            .field("cached", &self.cached)
            .field("ticket", &self.ticket())
            .finish()
    }
}
