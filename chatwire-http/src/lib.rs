//! REST engine for the chatwire ecosystem.
//!
//! Combines route-template derivation (§3's synthetic bucket keys), a
//! request/response/error middleware pipeline, retry with backoff and
//! jitter, a per-route circuit breaker, and feedback into the
//! [`chatwire_ratelimiting`] bucket manager.

pub mod circuit;
pub mod client;
pub mod error;
pub mod middleware;
pub mod routing;

pub use circuit::{CircuitBreakers, CircuitSettings};
pub use client::{Client, OutboundRequest, RestOptions, RetrySettings};
pub use error::{Error, ErrorType, Result};
pub use middleware::{Body, ErrorOutcome, Registry, RequestOutcome, Stage};
pub use routing::{MajorParams, RouteTemplate, Segment};
