//! Prometheus metrics and structured logging for tickstream.
//!
//! - Structured logging with tracing (pretty in development, JSON in production)
//! - Prometheus collectors for the session: connection state, reconnects,
//!   inbound frames, heartbeats

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
pub use metrics::Metrics;
