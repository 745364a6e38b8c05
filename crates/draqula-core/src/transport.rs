//! The transport seam.
//!
//! Draqula never talks to the network itself. A [`Transport`] takes a
//! serialized [`GraphQLRequest`] and resolves to the server's
//! [`GraphQLResponse`] or a [`NetworkError`]. Anything that can POST JSON
//! (an HTTP client, a WebSocket multiplexer, an in-process executor) can be
//! plugged in.
//!
//! Closures implement the trait directly:
//!
//! ```
//! use draqula_core::{GraphQLRequest, GraphQLResponse, NetworkError, Transport};
//! use serde_json::json;
//!
//! let transport = |_request: &GraphQLRequest| async {
//!     Ok::<_, NetworkError>(GraphQLResponse::from_data(json!({"ok": true})))
//! };
//! let _ = transport.send(&GraphQLRequest::query("{ ok }"));
//! ```

use std::future::Future;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;

use crate::error::NetworkError;
use crate::request::GraphQLRequest;
use crate::response::GraphQLResponse;

/// Sends a request and resolves to the server's response.
///
/// The returned future must own everything it needs; the client may retry
/// the same request by calling `send` again.
pub trait Transport: Send + Sync + 'static {
    /// Send `request` to the server.
    fn send(&self, request: &GraphQLRequest)
    -> BoxFuture<'static, Result<GraphQLResponse, NetworkError>>;
}

impl<F, Fut> Transport for F
where
    F: Fn(&GraphQLRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<GraphQLResponse, NetworkError>> + Send + 'static,
{
    fn send(
        &self,
        request: &GraphQLRequest,
    ) -> BoxFuture<'static, Result<GraphQLResponse, NetworkError>> {
        self(request).boxed()
    }
}
