//! Pooled connection handle and lifecycle tracking.
//!
//! # Responsibilities
//! - Give every physical link a unique ID for tracing
//! - Carry creation / last-use timestamps for staleness and LRU eviction
//! - Guarantee the link goes back to its pool exactly once
//!
//! A [`PooledConnection`] that is dropped without an explicit
//! [`release`](PooledConnection::release) is returned as unhealthy: a session
//! cancelled mid-I/O must not leak its link as permanently InUse, and the
//! link's protocol state is unknown so it is closed rather than reused.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::backend::{Connector, Endpoint, Tier};
use super::tier_pool::PoolShared;

/// Only uniqueness matters, so relaxed ordering is enough.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a backend connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub(crate) fn next() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Connection state as seen by its holder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Parked in the pool.
    Idle,
    /// Borrowed by exactly one session.
    InUse,
    /// Failed a liveness probe or an I/O operation; will be closed.
    Unhealthy,
    /// Link dropped.
    Closed,
}

/// A physical link plus the bookkeeping the pool needs about it.
pub(crate) struct Slot<T> {
    pub(crate) id: ConnectionId,
    pub(crate) conn: T,
    pub(crate) endpoint: Arc<Endpoint>,
    pub(crate) created_at: Instant,
    pub(crate) last_used: Instant,
    pub(crate) use_count: u64,
}

impl<T> Slot<T> {
    pub(crate) fn new(conn: T, endpoint: Arc<Endpoint>) -> Self {
        let now = Instant::now();
        Self {
            id: ConnectionId::next(),
            conn,
            endpoint,
            created_at: now,
            last_used: now,
            use_count: 0,
        }
    }
}

/// A borrowed backend connection.
///
/// Dereferences to the connector's link type.
pub struct PooledConnection<C: Connector> {
    slot: Option<Slot<C::Connection>>,
    pool: Arc<PoolShared<C>>,
    state: ConnectionState,
}

impl<C: Connector> PooledConnection<C> {
    pub(crate) fn new(mut slot: Slot<C::Connection>, pool: Arc<PoolShared<C>>) -> Self {
        slot.use_count += 1;
        Self {
            slot: Some(slot),
            pool,
            state: ConnectionState::InUse,
        }
    }

    fn slot(&self) -> &Slot<C::Connection> {
        self.slot.as_ref().expect("pooled connection used after release")
    }

    pub fn id(&self) -> ConnectionId {
        self.slot().id
    }

    pub fn endpoint(&self) -> &Arc<Endpoint> {
        &self.slot().endpoint
    }

    pub fn tier(&self) -> Tier {
        self.slot().endpoint.tier()
    }

    pub fn created_at(&self) -> Instant {
        self.slot().created_at
    }

    pub fn last_used(&self) -> Instant {
        self.slot().last_used
    }

    /// How many times this link has been handed out, including this borrow.
    pub fn use_count(&self) -> u64 {
        self.slot().use_count
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Flag the link as unusable; it will be closed on release regardless of the
    /// `healthy` argument.
    pub fn mark_unhealthy(&mut self) {
        self.state = ConnectionState::Unhealthy;
    }

    /// Whether the pool has told holders to give their links up.
    pub fn is_severed(&self) -> bool {
        self.pool.is_severed()
    }

    /// Resolves once the pool is severed at the end of shutdown's grace period.
    /// Holders waiting on client or backend I/O should select on this and drop
    /// the link when it fires.
    pub async fn severed(&self) {
        self.pool.wait_severed().await
    }

    /// Hand the link back to its pool.
    ///
    /// Healthy links on Active endpoints go back to Idle; everything else is closed.
    pub fn release(mut self, healthy: bool) {
        if let Some(slot) = self.slot.take() {
            let healthy = healthy && self.state != ConnectionState::Unhealthy;
            self.pool.release(slot, healthy);
        }
    }
}

impl<C: Connector> Deref for PooledConnection<C> {
    type Target = C::Connection;

    fn deref(&self) -> &Self::Target {
        &self.slot().conn
    }
}

impl<C: Connector> DerefMut for PooledConnection<C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self
            .slot
            .as_mut()
            .expect("pooled connection used after release")
            .conn
    }
}

impl<C: Connector> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            tracing::debug!(
                connection_id = %slot.id,
                endpoint = %slot.endpoint.addr(),
                "Connection dropped without release, closing"
            );
            self.pool.release(slot, false);
        }
    }
}

impl<C: Connector> fmt::Debug for PooledConnection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.slot {
            Some(slot) => f
                .debug_struct("PooledConnection")
                .field("id", &slot.id)
                .field("endpoint", &slot.endpoint.addr())
                .field("tier", &slot.endpoint.tier())
                .field("state", &self.state)
                .finish(),
            None => f
                .debug_struct("PooledConnection")
                .field("state", &ConnectionState::Closed)
                .finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_id_unique() {
        let id1 = ConnectionId::next();
        let id2 = ConnectionId::next();
        assert_ne!(id1, id2);
        assert!(id2.as_u64() > id1.as_u64());
    }

    #[test]
    fn connection_id_display() {
        let id = ConnectionId(42);
        assert_eq!(id.to_string(), "conn-42");
    }
}
