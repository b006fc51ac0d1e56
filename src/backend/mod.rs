//! Backend subsystem.
//!
//! # Data Flow
//! ```text
//! Topology event (add / remove / drain)
//!     → pool::manager (serialized per tier)
//!     → registry.rs (swap in a new endpoint list for the tier)
//!     → endpoint.rs (Active → Draining → Removed)
//!
//! Borrow:
//!     → registry.rs (snapshot of the tier's endpoints)
//!     → Connector::connect / Connector::ping (physical link)
//! ```
//!
//! # Design Decisions
//! - Endpoint records are shared as `Arc<Endpoint>`; the pool owns the links
//! - Registry readers take an immutable snapshot per call (no iteration under mutation)
//! - The physical link is abstracted behind [`Connector`], the protocol codec lives above it

pub mod endpoint;
pub mod registry;
pub mod tcp;

pub use endpoint::{Endpoint, EndpointState};
pub use registry::EndpointRegistry;
pub use tcp::TcpConnector;

use std::fmt;
use std::future::Future;
use std::io;
use serde::{Deserialize, Serialize};

/// Backend role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Read-write primary tier.
    Admin,
    /// Replica tier.
    Readonly,
}

impl Tier {
    pub const ALL: [Tier; 2] = [Tier::Admin, Tier::Readonly];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Admin => "admin",
            Tier::Readonly => "readonly",
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Tier::Admin => 0,
            Tier::Readonly => 1,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "admin" => Ok(Tier::Admin),
            "readonly" => Ok(Tier::Readonly),
            other => Err(format!("unknown tier '{}' (expected admin or readonly)", other)),
        }
    }
}

/// Opens and probes physical links to backend endpoints.
///
/// Implementations must be cheap to share; the pool keeps one behind an `Arc`
/// and calls it from warm-up tasks as well as from borrowing sessions.
pub trait Connector: Send + Sync + 'static {
    /// The physical link handed to sessions.
    type Connection: Send + 'static;

    /// Open a new link to `addr` (`host:port`).
    fn connect(&self, addr: &str) -> impl Future<Output = io::Result<Self::Connection>> + Send;

    /// Lightweight liveness probe for a link that has sat idle.
    fn ping(&self, conn: &mut Self::Connection) -> impl Future<Output = io::Result<()>> + Send;
}
