//! Logging facilities for Draqula.
//!
//! Draqula uses the `tracing` crate for instrumentation. To see logs,
//! install a tracing subscriber in your application:
//!
//! ```ignore
//! tracing_subscriber::fmt()
//!     .with_env_filter("draqula_core=debug")
//!     .init();
//! ```
//!
//! Every event carries the request [`Fingerprint`](crate::Fingerprint) as a
//! `fingerprint` field, so a single request can be followed through cache
//! lookup, deduplication, transport and notification.

/// Span names used throughout Draqula for tracing.
pub mod span_names {
    /// A single transport round-trip (including retries).
    pub const TRANSPORT: &str = "draqula::transport";
    /// A mutation round-trip.
    pub const MUTATION: &str = "draqula::mutation";
}

/// Target names for log filtering.
///
/// Use these with `tracing` directives to filter logs by subsystem.
pub mod targets {
    /// Query client target.
    pub const CLIENT: &str = "draqula_core::client";
    /// Response cache target.
    pub const CACHE: &str = "draqula_core::cache";
    /// In-flight deduplication target.
    pub const INFLIGHT: &str = "draqula_core::inflight";
    /// Subscription registry target.
    pub const SUBSCRIPTION: &str = "draqula_core::subscription";
    /// Transport and retry target.
    pub const TRANSPORT: &str = "draqula_core::transport";
}
