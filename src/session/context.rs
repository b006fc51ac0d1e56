//! Per-session routing state.

use std::fmt;
use std::time::Instant;

use serde::Serialize;
use uuid::Uuid;

use crate::auth::TenantIdentity;
use crate::routing::Affinity;

/// Unique identifier for a client session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Tenant plus transaction affinity for one session.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub id: SessionId,
    pub tenant: TenantIdentity,
    pub affinity: Affinity,
    pub started_at: Instant,
}

impl SessionContext {
    pub fn new(tenant: TenantIdentity) -> Self {
        Self {
            id: SessionId::new(),
            tenant,
            affinity: Affinity::Unpinned,
            started_at: Instant::now(),
        }
    }
}
