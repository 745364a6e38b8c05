//! Hooks: stateful handles over a [`Draqula`] client.
//!
//! Every hook takes the client explicitly. Share one client across the parts
//! of an application that should share a cache; clones are cheap.

mod mutation;
mod query;

pub use mutation::{MutationState, UseMutation, use_mutation};
pub use query::{QueryState, UseQuery, use_query};

use draqula_core::Draqula;

/// Get a handle to `client` for direct cache access.
///
/// Equivalent to cloning the client.
pub fn use_draqula_client(client: &Draqula) -> Draqula {
    client.clone()
}
