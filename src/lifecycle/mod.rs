//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → wait_for_termination() returns
//!
//! Shutdown (shutdown.rs):
//!     trigger() → every subscribed task leaves its select loop
//!     → PoolManager::shutdown(grace) drains the pools
//! ```
//!
//! # Design Decisions
//! - Startup is ordered in `main`: config, observability, pools, background tasks
//! - One broadcast channel fans the stop signal out to every background task
//! - Pool shutdown has a grace period; links still borrowed after it are
//!   closed when they come back

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
pub use signals::wait_for_termination;
