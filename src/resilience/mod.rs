//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Backend connect / liveness probe:
//!     → timeouts.rs (bound by connect timeout AND the caller's borrow deadline)
//!     → On warm-up failure: backoff.rs (exponential delay with jitter, then retry)
//!
//! Discovery feed disconnect:
//!     → backoff.rs (reconnect delay)
//! ```
//!
//! # Design Decisions
//! - Every backend call has a deadline; a slow backend never holds a borrower past it
//! - Jittered backoff prevents reconnect storms against a recovering backend

pub mod backoff;
pub mod timeouts;

pub use backoff::{calculate_backoff, BackoffPolicy};
pub use timeouts::{within_deadline, Expired};
