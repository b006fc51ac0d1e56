//! Backend connection pooling.
//!
//! # Data Flow
//! ```text
//! Session needs a backend (tier chosen by routing)
//!     → manager.rs (pick the tier's pool)
//!     → tier_pool.rs borrow:
//!         - fresh idle link          → hand out
//!         - below max_alive          → selector.rs picks endpoint, open link
//!         - stale idle link          → ping, hand out or replace
//!         - at capacity              → wait for a release until the deadline
//!     → connection.rs (PooledConnection, returned exactly once)
//!
//! Topology event → manager.rs (serialized per tier)
//!     → add: register + warm | remove/drain: drain or keep stale
//! ```
//!
//! # Design Decisions
//! - One mutex per tier guards all counters; I/O never happens under it
//! - Waiters are woken through `tokio::sync::Notify`, bounded by the caller's deadline
//! - Dropping a borrowed connection returns it as unhealthy
//! - Endpoint choice for new links is least-recently-created, so load spreads
//!   across replicas instead of piling onto the first one

pub mod connection;
pub mod manager;
pub mod selector;
pub mod tier_pool;

#[cfg(test)]
pub(crate) mod testing;

pub use connection::{ConnectionId, ConnectionState, PooledConnection};
pub use manager::{EndpointStatus, PoolManager, ShutdownReport};
pub use selector::{EndpointSelector, LeastRecentlyCreated};
pub use tier_pool::{DrainOutcome, Pool, PoolConfig, PoolStats};

use std::time::Duration;
use thiserror::Error;

use crate::backend::Tier;

/// Errors surfaced to borrowers.
#[derive(Debug, Error)]
pub enum PoolError {
    /// No link became available before the borrow deadline.
    #[error("{tier} pool exhausted after waiting {}ms", waited.as_millis())]
    PoolExhausted { tier: Tier, waited: Duration },

    /// Every Active endpoint of the tier failed to connect (or there are none).
    #[error("{tier} tier unavailable after {attempts} attempts: {reason}")]
    BackendUnavailable {
        tier: Tier,
        attempts: usize,
        reason: String,
    },

    /// Pool bounds rejected at construction.
    #[error("invalid pool configuration: {0}")]
    InvalidConfiguration(String),

    /// The pool is closing and refuses new borrows.
    #[error("{0} pool is shutting down")]
    ShuttingDown(Tier),
}

impl PoolError {
    /// Whether the client may simply retry later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PoolError::PoolExhausted { .. } | PoolError::BackendUnavailable { .. }
        )
    }

    pub fn tier(&self) -> Option<Tier> {
        match self {
            PoolError::PoolExhausted { tier, .. } | PoolError::BackendUnavailable { tier, .. } => Some(*tier),
            PoolError::ShuttingDown(tier) => Some(*tier),
            PoolError::InvalidConfiguration(_) => None,
        }
    }
}
