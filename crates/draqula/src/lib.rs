//! Draqula: a caching, deduplicating GraphQL client.
//!
//! Queries are fingerprinted by document and variables. Identical queries
//! that overlap in time share one transport call, and results are cached
//! until invalidated. Mutations invalidate (or patch) cached queries, and
//! live query hooks refetch automatically.
//!
//! ```ignore
//! use draqula::prelude::*;
//!
//! let client = Draqula::builder(my_transport).build();
//!
//! let mut user = use_query(&client, USER_QUERY, &json!({"id": 1}), QueryOptions::default());
//! let state = user.settled().await;
//!
//! let rename = use_mutation(&client);
//! rename.mutate(RENAME_USER, &json!({"id": 1, "name": "y"}), MutateOptions::default()).await?;
//!
//! // The cached query was invalidated; `user` refetches on its own.
//! let state = user.changed().await;
//! ```
//!
//! The engine lives in [`draqula_core`] and is re-exported here.

pub mod hooks;
pub mod prelude;

pub use draqula_core::*;
pub use hooks::{
    MutationState, QueryState, UseMutation, UseQuery, use_draqula_client, use_mutation, use_query,
};
