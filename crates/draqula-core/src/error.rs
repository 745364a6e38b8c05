//! Error types for Draqula.
//!
//! Consumers match on [`DraqulaError`] to tell a transport failure
//! ([`NetworkError`]) apart from a failure the server reported for the
//! operation itself ([`GraphQLError`]). All errors are `Clone` because a
//! single settled request is delivered to every attached caller and stored
//! in the cache.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Transport-level failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    /// The request could not be sent.
    Request(String),
    /// Request timed out.
    Timeout,
    /// Connection refused or failed.
    Connection(String),
    /// Non-success status reported by the transport (4xx or 5xx).
    HttpStatus {
        /// The status code.
        status: u16,
        /// Optional error message from the response body.
        message: Option<String>,
    },
    /// The response body was not a GraphQL response.
    InvalidBody(String),
    /// JSON serialization/deserialization error.
    Json(String),
    /// Request was cancelled.
    Cancelled,
}

impl NetworkError {
    /// Whether a retry has a chance of succeeding.
    ///
    /// Connection failures, timeouts, rate limiting (429) and server errors
    /// (5xx) are transient; everything else will fail the same way again.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout | Self::Connection(_) => true,
            Self::HttpStatus { status, .. } => *status == 429 || (500..600).contains(status),
            _ => false,
        }
    }
}

impl fmt::Display for NetworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Request(msg) => write!(f, "Request error: {msg}"),
            Self::Timeout => write!(f, "Request timed out"),
            Self::Connection(msg) => write!(f, "Connection error: {msg}"),
            Self::HttpStatus { status, message } => {
                if let Some(msg) = message {
                    write!(f, "HTTP {status}: {msg}")
                } else {
                    write!(f, "HTTP {status}")
                }
            }
            Self::InvalidBody(msg) => write!(f, "Invalid response body: {msg}"),
            Self::Json(msg) => write!(f, "JSON error: {msg}"),
            Self::Cancelled => write!(f, "Request was cancelled"),
        }
    }
}

impl std::error::Error for NetworkError {}

impl From<serde_json::Error> for NetworkError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

/// A single error entry from a GraphQL response's `errors` array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseError {
    /// The error message.
    pub message: String,

    /// Locations in the document where the error occurred.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub locations: Vec<Location>,

    /// Path to the field that caused the error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<PathSegment>>,

    /// Additional error metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
}

impl ResponseError {
    /// Create an error entry with only a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            locations: Vec::new(),
            path: None,
            extensions: None,
        }
    }

    /// Attach a field path.
    pub fn with_path(mut self, path: impl IntoIterator<Item = PathSegment>) -> Self {
        self.path = Some(path.into_iter().collect());
        self
    }
}

impl fmt::Display for ResponseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(ref path) = self.path {
            write!(f, " (at ")?;
            for (i, segment) in path.iter().enumerate() {
                if i > 0 {
                    write!(f, ".")?;
                }
                match segment {
                    PathSegment::Field(name) => write!(f, "{name}")?,
                    PathSegment::Index(idx) => write!(f, "[{idx}]")?,
                }
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

/// A location in a GraphQL document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    /// Line number (1-indexed).
    pub line: u32,
    /// Column number (1-indexed).
    pub column: u32,
}

/// A segment in an error path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    /// A field name.
    Field(String),
    /// An array index.
    Index(usize),
}

impl From<&str> for PathSegment {
    fn from(name: &str) -> Self {
        Self::Field(name.to_string())
    }
}

impl From<usize> for PathSegment {
    fn from(idx: usize) -> Self {
        Self::Index(idx)
    }
}

/// The server answered, but reported errors for the operation.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphQLError {
    /// Every error the server reported, in response order.
    pub errors: Vec<ResponseError>,
}

impl GraphQLError {
    /// Wrap the `errors` array of a response.
    pub fn new(errors: Vec<ResponseError>) -> Self {
        Self { errors }
    }

    /// The first reported error, if any.
    pub fn first(&self) -> Option<&ResponseError> {
        self.errors.first()
    }
}

impl fmt::Display for GraphQLError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GraphQL error: ")?;
        if self.errors.is_empty() {
            return write!(f, "unknown error");
        }
        for (i, err) in self.errors.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for GraphQLError {}

/// Variables (or another request part) could not be represented as JSON.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializationError {
    message: String,
}

impl SerializationError {
    /// Create a serialization error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The underlying serializer's message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for SerializationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Failed to serialize variables: {}", self.message)
    }
}

impl std::error::Error for SerializationError {}

impl From<serde_json::Error> for SerializationError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(err.to_string())
    }
}

/// The error type for every Draqula operation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DraqulaError {
    /// Request variables were not serializable. Never retried.
    #[error(transparent)]
    Serialization(#[from] SerializationError),

    /// The transport failed. Retried when transient.
    #[error(transparent)]
    Network(#[from] NetworkError),

    /// The server reported operation-level errors. Not retried by default.
    #[error(transparent)]
    GraphQL(#[from] GraphQLError),
}

impl DraqulaError {
    /// Returns the network error, if this is one.
    pub fn as_network(&self) -> Option<&NetworkError> {
        match self {
            Self::Network(err) => Some(err),
            _ => None,
        }
    }

    /// Returns the GraphQL error, if this is one.
    pub fn as_graphql(&self) -> Option<&GraphQLError> {
        match self {
            Self::GraphQL(err) => Some(err),
            _ => None,
        }
    }

    /// Check if this is a transport failure.
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network(_))
    }

    /// Check if the server reported the failure.
    pub fn is_graphql(&self) -> bool {
        matches!(self, Self::GraphQL(_))
    }
}

/// A specialized Result type for Draqula operations.
pub type Result<T> = std::result::Result<T, DraqulaError>;
