//! The mutation hook.

use std::sync::Arc;

use draqula_core::{Draqula, DraqulaError, MutateOptions};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;

/// The observable state of a [`UseMutation`].
#[derive(Debug, Clone, Default, PartialEq)]
pub enum MutationState {
    /// No mutation has run yet.
    #[default]
    Idle,
    /// A mutation is in progress.
    Loading,
    /// The last mutation succeeded.
    Success(Value),
    /// The last mutation failed.
    Error(DraqulaError),
}

impl MutationState {
    /// The result data, if the last mutation succeeded.
    pub fn data(&self) -> Option<&Value> {
        match self {
            Self::Success(data) => Some(data),
            _ => None,
        }
    }

    /// The error, if the last mutation failed.
    pub fn error(&self) -> Option<&DraqulaError> {
        match self {
            Self::Error(err) => Some(err),
            _ => None,
        }
    }

    /// Check if no mutation has run yet.
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Check if a mutation is in progress.
    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Loading)
    }

    /// Check if the last mutation succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Check if the last mutation failed.
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

/// A mutation trigger bound to a client.
///
/// Created by [`use_mutation`]. Tracks the state of the most recent call.
#[derive(Debug)]
pub struct UseMutation {
    client: Draqula,
    state: Arc<watch::Sender<MutationState>>,
}

impl UseMutation {
    /// Run a mutation.
    ///
    /// The state switches to [`MutationState::Loading`] immediately and to
    /// the outcome once the returned future completes.
    pub fn mutate<V>(
        &self,
        document: &str,
        variables: &V,
        options: MutateOptions,
    ) -> BoxFuture<'static, Result<Value, DraqulaError>>
    where
        V: Serialize + ?Sized,
    {
        self.state.send_replace(MutationState::Loading);
        let pending = self.client.mutate(document, variables, options);
        let state = self.state.clone();
        async move {
            let result = pending.await;
            state.send_replace(match &result {
                Ok(data) => MutationState::Success(data.clone()),
                Err(err) => MutationState::Error(err.clone()),
            });
            result
        }
        .boxed()
    }

    /// The current state.
    pub fn state(&self) -> MutationState {
        self.state.borrow().clone()
    }

    /// A receiver that observes every state change.
    pub fn watch(&self) -> watch::Receiver<MutationState> {
        self.state.subscribe()
    }

    /// Return to [`MutationState::Idle`].
    pub fn reset(&self) {
        self.state.send_replace(MutationState::Idle);
    }
}

/// Create a mutation trigger for `client`.
pub fn use_mutation(client: &Draqula) -> UseMutation {
    let (state, _) = watch::channel(MutationState::Idle);
    UseMutation {
        client: client.clone(),
        state: Arc::new(state),
    }
}
