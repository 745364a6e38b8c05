//! Client and per-call configuration.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::error::DraqulaError;
use crate::fingerprint::Fingerprint;

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of retry attempts.
    pub max_retries: u32,
    /// Initial delay between retries in milliseconds.
    pub initial_delay_ms: u64,
    /// Maximum delay between retries in milliseconds.
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Also retry when the server reports GraphQL errors.
    pub retry_graphql_errors: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 30000,
            backoff_multiplier: 2.0,
            retry_graphql_errors: false,
        }
    }
}

impl RetryConfig {
    /// A configuration that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before the first retry.
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    /// Calculate the next delay with exponential backoff.
    ///
    /// A multiplier below 1.0 or not finite is treated as 1.0.
    pub fn next_delay(&self, current: Duration) -> Duration {
        let multiplier = if self.backoff_multiplier.is_finite() {
            self.backoff_multiplier.max(1.0)
        } else {
            1.0
        };
        let max = Duration::from_millis(self.max_delay_ms);
        if current.as_secs_f64() * multiplier >= max.as_secs_f64() {
            return max;
        }
        current.mul_f64(multiplier)
    }

    /// Whether `error` is worth another attempt under this policy.
    pub fn should_retry(&self, error: &DraqulaError) -> bool {
        match error {
            DraqulaError::Network(err) => err.is_transient(),
            DraqulaError::GraphQL(_) => self.retry_graphql_errors,
            DraqulaError::Serialization(_) => false,
        }
    }
}

/// Where a query looks for its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchPolicy {
    /// Serve cached data when present, otherwise go to the network.
    #[default]
    CacheFirst,
    /// Serve cached data when present and revalidate in the background.
    CacheAndNetwork,
    /// Always go to the network. The result is still cached.
    NetworkOnly,
}

/// Per-call query options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryOptions {
    /// Cache lookup policy.
    pub fetch_policy: FetchPolicy,
}

impl QueryOptions {
    /// Default options (cache-first).
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve cached data and revalidate it in the background.
    pub fn refetch() -> Self {
        Self {
            fetch_policy: FetchPolicy::CacheAndNetwork,
        }
    }

    /// Bypass the cache lookup.
    pub fn network_only() -> Self {
        Self {
            fetch_policy: FetchPolicy::NetworkOnly,
        }
    }

    /// Set the fetch policy.
    pub fn fetch_policy(mut self, policy: FetchPolicy) -> Self {
        self.fetch_policy = policy;
        self
    }
}

/// Merge function for [`CacheUpdate::Merge`].
///
/// Called once per cached successful entry with the entry's fingerprint, its
/// data and the mutation result. Returns the replacement data, or `None` to
/// leave the entry untouched.
pub type MergeFn = Arc<dyn Fn(Fingerprint, &Value, &Value) -> Option<Value> + Send + Sync>;

/// How a successful mutation changes the cache.
#[derive(Clone, Default)]
pub enum CacheUpdate {
    /// Invalidate every cached query.
    #[default]
    InvalidateAll,
    /// Invalidate only the listed queries.
    Invalidate(Vec<Fingerprint>),
    /// Patch cached queries in place with the mutation result.
    Merge(MergeFn),
    /// Leave the cache alone.
    None,
}

impl CacheUpdate {
    /// Build a [`CacheUpdate::Merge`] from a closure.
    pub fn merge<F>(f: F) -> Self
    where
        F: Fn(Fingerprint, &Value, &Value) -> Option<Value> + Send + Sync + 'static,
    {
        Self::Merge(Arc::new(f))
    }
}

impl fmt::Debug for CacheUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidateAll => f.write_str("InvalidateAll"),
            Self::Invalidate(fps) => f.debug_tuple("Invalidate").field(fps).finish(),
            Self::Merge(_) => f.write_str("Merge(..)"),
            Self::None => f.write_str("None"),
        }
    }
}

/// Per-call mutation options.
#[derive(Debug, Clone, Default)]
pub struct MutateOptions {
    /// Cache update applied after the mutation succeeds.
    pub cache_update: CacheUpdate,
    /// Apply the client's retry policy. Mutations are not retried otherwise.
    pub retry: bool,
}

impl MutateOptions {
    /// Default options (invalidate everything, no retries).
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the cache update policy.
    pub fn cache_update(mut self, update: CacheUpdate) -> Self {
        self.cache_update = update;
        self
    }

    /// Opt in to retries.
    pub fn retry(mut self, retry: bool) -> Self {
        self.retry = retry;
        self
    }
}
