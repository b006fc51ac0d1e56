//! Client sessions.
//!
//! # Data Flow
//! ```text
//! Codec yields statement text
//!     → client.rs Session::dispatch
//!         → routing (classify + route, affinity updated)
//!         → reuse the pinned connection, or borrow from the chosen tier
//!     → dispatch.rs Dispatch (codec runs the statement on the connection)
//!     → Dispatch::finish(healthy)
//!         - pinned + healthy   → keep holding the connection
//!         - unpinned + healthy → return it to the pool
//!         - unhealthy          → close it, reset affinity
//! ```
//!
//! # Design Decisions
//! - A session holds a connection across statements only while pinned
//! - Dropping a Dispatch (cancelled I/O) counts as an unhealthy finish
//! - Sessions only borrow and return; they never touch topology

pub mod client;
pub mod context;
pub mod dispatch;
pub mod registry;

pub use client::Session;
pub use context::{SessionContext, SessionId};
pub use dispatch::Dispatch;
pub use registry::{SessionInfo, SessionRegistry};

use thiserror::Error;

use crate::auth::AuthError;
use crate::pool::PoolError;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    /// The session is not holding a connection.
    #[error("session holds no backend connection")]
    NoConnection,
}

impl SessionError {
    /// Whether the client may retry the statement later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SessionError::Pool(e) if e.is_retryable())
    }
}
