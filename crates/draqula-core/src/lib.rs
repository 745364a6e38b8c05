//! Core engine for Draqula, a caching GraphQL client.
//!
//! This crate provides:
//!
//! - **Fingerprinting**: a deterministic identity for (document, variables)
//! - **Response cache**: the latest data or error per fingerprint
//! - **In-flight deduplication**: at most one transport call per fingerprint
//! - **Query client**: [`Draqula`], tying the above to a pluggable [`Transport`]
//!
//! # Queries
//!
//! ```ignore
//! use draqula_core::{Draqula, QueryOptions};
//!
//! let client = Draqula::builder(my_transport)
//!     .stale_after(Duration::from_secs(30))
//!     .build();
//!
//! // Concurrent identical queries share one transport call.
//! let (a, b) = tokio::join!(
//!     client.query(USER_QUERY, &json!({"id": 1}), QueryOptions::default()),
//!     client.query(USER_QUERY, &json!({"id": 1}), QueryOptions::default()),
//! );
//!
//! // A later identical query is served from the cache.
//! let cached = client.query(USER_QUERY, &json!({"id": 1}), QueryOptions::default()).await?;
//! ```
//!
//! # Mutations
//!
//! ```ignore
//! use draqula_core::{CacheUpdate, MutateOptions};
//!
//! // By default a successful mutation invalidates every cached query.
//! client.mutate(RENAME_USER, &json!({"id": 1, "name": "y"}), MutateOptions::default()).await?;
//!
//! // Or patch cached data in place.
//! let options = MutateOptions::new().cache_update(CacheUpdate::merge(|_, cached, result| {
//!     let mut cached = cached.clone();
//!     cached["user"]["name"] = result["renameUser"]["name"].clone();
//!     Some(cached)
//! }));
//! client.mutate(RENAME_USER, &json!({"id": 1, "name": "z"}), options).await?;
//! ```
//!
//! # Subscribing to cache changes
//!
//! ```ignore
//! let fingerprint = client.fingerprint(USER_QUERY, &json!({"id": 1}))?;
//! let subscription = client.subscribe(fingerprint, |event| match event {
//!     CacheEvent::Updated(entry) => println!("new result: {:?}", entry.result()),
//!     CacheEvent::Invalidated(_) => println!("invalidated"),
//! });
//!
//! // Explicit, or implicit on drop.
//! subscription.unsubscribe();
//! ```

mod cache;
mod client;
mod config;
mod error;
mod fingerprint;
mod inflight;
pub mod logging;
mod request;
mod response;
mod subscription;
mod transport;

pub use cache::{CacheConfig, CacheEntry, ResponseCache};
pub use client::{Draqula, DraqulaBuilder, QueryHandle, WeakDraqula};
pub use config::{CacheUpdate, FetchPolicy, MergeFn, MutateOptions, QueryOptions, RetryConfig};
pub use error::{
    DraqulaError, GraphQLError, Location, NetworkError, PathSegment, ResponseError, Result,
    SerializationError,
};
pub use fingerprint::{Fingerprint, fingerprint};
pub use inflight::{InFlight, InFlightHandle};
pub use request::{GraphQLRequest, OperationType};
pub use response::GraphQLResponse;
pub use subscription::{CacheEvent, Subscription, SubscriptionId, SubscriptionRegistry};
pub use transport::Transport;
