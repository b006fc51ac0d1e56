//! One statement's hold on a backend connection.

use std::fmt;

use crate::backend::{Connector, Tier};
use crate::pool::{ConnectionId, PooledConnection};
use crate::routing::{Affinity, StatementClass};
use super::client::Session;

/// A routed statement with its connection.
///
/// Call [`finish`](Dispatch::finish) once the statement's I/O is done. Dropping
/// it unfinished (the session was cancelled mid-I/O) closes the connection and
/// unpins the session.
pub struct Dispatch<'s, C: Connector> {
    session: &'s mut Session<C>,
    conn: Option<PooledConnection<C>>,
    class: StatementClass,
    tier: Tier,
}

impl<'s, C: Connector> Dispatch<'s, C> {
    pub(super) fn new(
        session: &'s mut Session<C>,
        conn: PooledConnection<C>,
        class: StatementClass,
        tier: Tier,
    ) -> Self {
        Self {
            session,
            conn: Some(conn),
            class,
            tier,
        }
    }

    pub fn class(&self) -> StatementClass {
        self.class
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.conn.as_ref().map(|c| c.id())
    }

    /// The backend link to run the statement on.
    pub fn connection(&mut self) -> &mut C::Connection {
        self.conn
            .as_mut()
            .expect("dispatch holds its connection until finished")
    }

    /// Done with the statement. `healthy == false` reports an I/O failure.
    pub fn finish(mut self, healthy: bool) {
        self.complete(healthy);
    }

    fn complete(&mut self, healthy: bool) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        let session = &mut *self.session;

        if !healthy {
            if session.context.affinity.is_pinned() {
                tracing::warn!(
                    session_id = %session.context.id,
                    connection_id = %conn.id(),
                    "Backend I/O failed inside a transaction, unpinning session"
                );
            }
            session.context.affinity = Affinity::Unpinned;
            conn.release(false);
        } else if session.context.affinity.is_pinned() {
            session.held = Some(conn);
        } else {
            conn.release(true);
        }
        session.sync_registry();
    }
}

impl<C: Connector> Drop for Dispatch<'_, C> {
    fn drop(&mut self) {
        if self.conn.is_some() {
            tracing::debug!(
                session_id = %self.session.context.id,
                "Statement abandoned before completion"
            );
            self.complete(false);
        }
    }
}

impl<C: Connector> fmt::Debug for Dispatch<'_, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatch")
            .field("session_id", &self.session.context.id)
            .field("class", &self.class)
            .field("tier", &self.tier)
            .field("connection_id", &self.connection_id())
            .finish()
    }
}
