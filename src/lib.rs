//! Tiered database proxy core.
//!
//! Per-tier backend connection pools (admin and readonly), statement
//! classification with transaction affinity, and a topology coordinator that
//! keeps the pools in step with endpoint changes.

pub mod admin;
pub mod auth;
pub mod backend;
pub mod config;
pub mod lifecycle;
pub mod observability;
pub mod pool;
pub mod resilience;
pub mod routing;
pub mod session;
pub mod topology;

pub use backend::{Connector, Tier};
pub use config::schema::ProxyConfig;
pub use lifecycle::Shutdown;
pub use pool::{PoolError, PoolManager};
pub use session::Session;
pub use topology::{Coordinator, TopologyEvent};
