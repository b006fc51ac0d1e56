//! Live session tracking.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use serde::Serialize;

use crate::backend::Tier;
use crate::routing::Affinity;
use super::context::SessionId;

/// What the admin view shows about a session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: SessionId,
    pub tenant: String,
    pub affinity: Affinity,
    /// Tier of the connection the session is holding across statements, if any.
    pub holding: Option<Tier>,
    pub statements: u64,
    /// Seconds since epoch.
    pub started_at: u64,
}

/// A thread-safe map of live sessions, cheap to clone.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<DashMap<SessionId, SessionInfo>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&self, id: SessionId, tenant: &str) {
        let started_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        self.inner.insert(
            id,
            SessionInfo {
                id,
                tenant: tenant.to_string(),
                affinity: Affinity::Unpinned,
                holding: None,
                statements: 0,
                started_at,
            },
        );
    }

    pub(crate) fn record_statement(&self, id: SessionId) {
        if let Some(mut info) = self.inner.get_mut(&id) {
            info.statements += 1;
        }
    }

    pub(crate) fn update(&self, id: SessionId, affinity: Affinity, holding: Option<Tier>) {
        if let Some(mut info) = self.inner.get_mut(&id) {
            info.affinity = affinity;
            info.holding = holding;
        }
    }

    pub(crate) fn remove(&self, id: SessionId) {
        self.inner.remove(&id);
    }

    pub fn get(&self, id: SessionId) -> Option<SessionInfo> {
        self.inner.get(&id).map(|r| r.value().clone())
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Sessions currently inside a transaction.
    pub fn pinned(&self) -> usize {
        self.inner.iter().filter(|r| r.value().affinity.is_pinned()).count()
    }

    /// All live sessions, oldest first.
    pub fn list(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<SessionInfo> = self.inner.iter().map(|r| r.value().clone()).collect();
        sessions.sort_by_key(|s| s.started_at);
        sessions
    }
}
