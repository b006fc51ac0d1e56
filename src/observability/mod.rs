//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! pool / topology / session produce:
//!     → logging.rs (structured tracing events)
//!     → metrics.rs (counters, gauges, histograms via the `metrics` facade)
//!
//! Consumers:
//!     → stdout (fmt layer, filtered by RUST_LOG or the configured level)
//!     → Prometheus scrape endpoint (when enabled)
//! ```
//!
//! # Design Decisions
//! - Structured fields (`tier`, `endpoint`, `connection_id`) on every pool event
//! - Metric updates are fire-and-forget; without an installed recorder they are no-ops
//! - Gauges are republished by pool maintenance rather than on every borrow

pub mod logging;
pub mod metrics;

pub use logging::init_logging;
pub use metrics::init_metrics;
