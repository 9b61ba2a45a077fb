//! Sightline Telemetry
//!
//! Metrics for local classification and model lifecycle operations.
//!
//! Every recorded event is kept in process-local counters (readable through
//! [`MetricsCollector::snapshot`]) and forwarded to the `metrics` facade, so an
//! application that installs a recorder gets the same numbers exported.

pub mod metrics;

pub use crate::metrics::{FetchOutcome, MetricsCollector, MetricsSnapshot};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::metrics::{FetchOutcome, MetricsCollector, MetricsSnapshot};
}
