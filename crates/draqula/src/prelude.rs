//! Prelude module for Draqula.
//!
//! ```ignore
//! use draqula::prelude::*;
//! ```

// ============================================================================
// Client
// ============================================================================

pub use crate::{Draqula, DraqulaBuilder, QueryHandle, Transport};

// ============================================================================
// Options
// ============================================================================

pub use crate::{CacheUpdate, FetchPolicy, MutateOptions, QueryOptions, RetryConfig};

// ============================================================================
// Errors
// ============================================================================

pub use crate::{DraqulaError, GraphQLError, NetworkError};

// ============================================================================
// Hooks
// ============================================================================

pub use crate::hooks::{
    MutationState, QueryState, UseMutation, UseQuery, use_draqula_client, use_mutation, use_query,
};
