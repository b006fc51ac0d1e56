//! Session state machine.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::auth::{Authenticator, TenantIdentity};
use crate::backend::{Connector, Tier};
use crate::pool::{ConnectionId, PoolError, PoolManager, PooledConnection};
use crate::routing::{Affinity, Router, StatementClass};
use super::context::{SessionContext, SessionId};
use super::dispatch::Dispatch;
use super::registry::SessionRegistry;
use super::SessionError;

/// One client session: routing context plus the connection it holds while pinned.
pub struct Session<C: Connector> {
    pub(super) context: SessionContext,
    manager: Arc<PoolManager<C>>,
    router: Router,
    borrow_timeout: Duration,
    pub(super) held: Option<PooledConnection<C>>,
    registry: Option<SessionRegistry>,
}

impl<C: Connector> Session<C> {
    pub fn new(tenant: TenantIdentity, manager: Arc<PoolManager<C>>, borrow_timeout: Duration) -> Self {
        Self {
            context: SessionContext::new(tenant),
            manager,
            router: Router::new(),
            borrow_timeout,
            held: None,
            registry: None,
        }
    }

    /// Authenticate, then open a session. Runs before the first borrow.
    pub fn authenticate(
        authenticator: &dyn Authenticator,
        user: &str,
        proof: &[u8],
        manager: Arc<PoolManager<C>>,
        borrow_timeout: Duration,
    ) -> Result<Self, SessionError> {
        let tenant = authenticator.authenticate(user, proof)?;
        let session = Self::new(tenant, manager, borrow_timeout);
        tracing::debug!(session_id = %session.id(), tenant = %session.tenant(), "Session authenticated");
        Ok(session)
    }

    /// Track this session in `registry` until it is dropped.
    pub fn with_registry(mut self, registry: SessionRegistry) -> Self {
        registry.register(self.context.id, &self.context.tenant.user);
        self.registry = Some(registry);
        self
    }

    pub fn id(&self) -> SessionId {
        self.context.id
    }

    pub fn tenant(&self) -> &TenantIdentity {
        &self.context.tenant
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    pub fn affinity(&self) -> Affinity {
        self.context.affinity
    }

    pub fn held_connection_id(&self) -> Option<ConnectionId> {
        self.held.as_ref().map(|c| c.id())
    }

    /// The connection held across statements of the current transaction.
    pub fn pinned_connection(&mut self) -> Result<&mut PooledConnection<C>, SessionError> {
        self.held.as_mut().ok_or(SessionError::NoConnection)
    }

    /// Route `sql` and make a connection ready for it.
    ///
    /// A failed borrow for a transaction-opening statement leaves the session
    /// unpinned, as if the statement had never been issued.
    pub async fn dispatch(&mut self, sql: &str) -> Result<Dispatch<'_, C>, SessionError> {
        let (class, tier) = self.router.route_statement(&mut self.context.affinity, sql);
        if let Some(registry) = &self.registry {
            registry.record_statement(self.context.id);
        }

        let conn = match self.held.take() {
            Some(conn) if conn.is_severed() => {
                tracing::warn!(
                    session_id = %self.context.id,
                    connection_id = %conn.id(),
                    "Pinned connection severed by shutdown, closing it"
                );
                conn.release(false);
                self.context.affinity = Affinity::Unpinned;
                self.sync_registry();
                return Err(PoolError::ShuttingDown(tier).into());
            }
            Some(conn) => conn,
            None => {
                let deadline = Instant::now() + self.borrow_timeout;
                match self.manager.borrow(tier, deadline).await {
                    Ok(conn) => conn,
                    Err(e) => {
                        if class == StatementClass::TransactionStart {
                            self.context.affinity = Affinity::Unpinned;
                        }
                        tracing::warn!(
                            session_id = %self.context.id,
                            tier = %tier,
                            class = class.as_str(),
                            error = %e,
                            "Borrow failed for statement"
                        );
                        self.sync_registry();
                        return Err(e.into());
                    }
                }
            }
        };

        tracing::trace!(
            session_id = %self.context.id,
            connection_id = %conn.id(),
            tier = %tier,
            class = class.as_str(),
            "Statement dispatched"
        );
        Ok(Dispatch::new(self, conn, class, tier))
    }

    /// Resolves once the connection pinned to this session is severed by
    /// shutdown. Never resolves while nothing is pinned.
    pub async fn severed(&self) {
        match &self.held {
            Some(conn) => conn.severed().await,
            None => std::future::pending().await,
        }
    }

    /// Drop the pinned connection if shutdown severed it. Returns whether one was dropped.
    pub fn release_if_severed(&mut self) -> bool {
        if !self.held.as_ref().is_some_and(|c| c.is_severed()) {
            return false;
        }
        self.abandon();
        self.sync_registry();
        true
    }

    /// End the session. A transaction still open is abandoned and its
    /// connection closed.
    pub fn close(mut self) {
        self.abandon();
    }

    fn abandon(&mut self) {
        if let Some(conn) = self.held.take() {
            tracing::warn!(
                session_id = %self.context.id,
                connection_id = %conn.id(),
                "Session ended inside a transaction, closing its connection"
            );
            conn.release(false);
        }
        self.context.affinity = Affinity::Unpinned;
    }

    pub(super) fn sync_registry(&self) {
        if let Some(registry) = &self.registry {
            let holding: Option<Tier> = self.held.as_ref().map(|c| c.tier());
            registry.update(self.context.id, self.context.affinity, holding);
        }
    }
}

impl<C: Connector> Drop for Session<C> {
    fn drop(&mut self) {
        self.abandon();
        if let Some(registry) = &self.registry {
            registry.remove(self.context.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::testing::MockConnector;
    use crate::pool::PoolConfig;
    use crate::topology::TopologyEvent;

    async fn manager(connector: MockConnector) -> Arc<PoolManager<MockConnector>> {
        let config = PoolConfig {
            min_alive: 0,
            max_alive: 4,
            max_idle: 4,
            ..PoolConfig::default()
        };
        let manager = PoolManager::new(connector, config.clone(), config).unwrap();
        manager.apply_topology(&TopologyEvent::added(Tier::Admin, "primary:5432")).await.unwrap();
        manager.apply_topology(&TopologyEvent::added(Tier::Readonly, "replica:5432")).await.unwrap();
        Arc::new(manager)
    }

    fn session(manager: &Arc<PoolManager<MockConnector>>) -> Session<MockConnector> {
        let tenant = TenantIdentity { user: "tenant_a".into() };
        Session::new(tenant, manager.clone(), Duration::from_millis(300))
    }

    #[tokio::test]
    async fn transaction_uses_one_admin_connection() {
        let manager = manager(MockConnector::new()).await;
        let mut session = session(&manager);

        let mut ids = Vec::new();
        for sql in ["BEGIN", "SELECT * FROM t", "UPDATE t SET x = 1", "COMMIT"] {
            let mut dispatch = session.dispatch(sql).await.unwrap();
            assert_eq!(dispatch.tier(), Tier::Admin);
            assert_eq!(dispatch.connection().addr, "primary:5432");
            ids.push(dispatch.connection_id().unwrap());
            dispatch.finish(true);
        }
        assert!(ids.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(session.affinity(), Affinity::Unpinned);
        assert!(session.held_connection_id().is_none());
        assert_eq!(manager.pool(Tier::Admin).stats().idle, 1);
    }

    #[tokio::test]
    async fn reads_outside_transactions_use_readonly() {
        let manager = manager(MockConnector::new()).await;
        let mut session = session(&manager);

        let mut dispatch = session.dispatch("SELECT 1").await.unwrap();
        assert_eq!(dispatch.tier(), Tier::Readonly);
        assert_eq!(dispatch.connection().addr, "replica:5432");
        dispatch.finish(true);

        let dispatch = session.dispatch("ANALYZE orders").await.unwrap();
        assert_eq!(dispatch.tier(), Tier::Admin);
        dispatch.finish(true);
    }

    #[tokio::test]
    async fn io_failure_mid_transaction_unpins_and_closes() {
        let manager = manager(MockConnector::new()).await;
        let mut session = session(&manager);

        session.dispatch("BEGIN").await.unwrap().finish(true);
        let failed = session.held_connection_id().unwrap();
        session.dispatch("UPDATE t SET x = 1").await.unwrap().finish(false);

        assert_eq!(session.affinity(), Affinity::Unpinned);
        assert!(matches!(session.pinned_connection(), Err(SessionError::NoConnection)));
        assert_eq!(manager.pool(Tier::Admin).stats().alive, 0);

        let dispatch = session.dispatch("DELETE FROM t").await.unwrap();
        assert_ne!(dispatch.connection_id().unwrap(), failed);
    }

    #[tokio::test]
    async fn abandoned_dispatch_counts_as_failure() {
        let manager = manager(MockConnector::new()).await;
        let mut session = session(&manager);

        session.dispatch("BEGIN").await.unwrap().finish(true);
        drop(session.dispatch("SELECT 1").await.unwrap());

        assert_eq!(session.affinity(), Affinity::Unpinned);
        assert_eq!(manager.pool(Tier::Admin).stats().in_use, 0);
        assert_eq!(manager.pool(Tier::Admin).stats().alive, 0);
    }

    #[tokio::test]
    async fn failed_begin_leaves_session_unpinned() {
        let connector = MockConnector::new();
        connector.refuse("primary:5432");
        let manager = manager(connector).await;
        let mut session = session(&manager);

        let err = session.dispatch("BEGIN").await.unwrap_err();
        assert!(matches!(err, SessionError::Pool(PoolError::BackendUnavailable { .. })));
        assert_eq!(session.affinity(), Affinity::Unpinned);
    }

    #[tokio::test]
    async fn closing_inside_transaction_closes_connection() {
        let manager = manager(MockConnector::new()).await;
        let registry = SessionRegistry::new();
        let mut session = session(&manager).with_registry(registry.clone());

        session.dispatch("BEGIN").await.unwrap().finish(true);
        let info = registry.get(session.id()).unwrap();
        assert_eq!(info.affinity, Affinity::PinnedAdmin);
        assert_eq!(info.holding, Some(Tier::Admin));

        session.close();
        assert!(registry.is_empty());
        assert_eq!(manager.pool(Tier::Admin).stats().alive, 0);
    }

    #[tokio::test]
    async fn severed_pin_is_dropped_and_reported() {
        let manager = manager(MockConnector::new()).await;
        let mut session = session(&manager);

        session.dispatch("BEGIN").await.unwrap().finish(true);
        assert!(!session.release_if_severed());
        manager.pool(Tier::Admin).sever();
        tokio::time::timeout(Duration::from_secs(1), session.severed()).await.unwrap();

        let err = session.dispatch("UPDATE t SET x = 1").await.unwrap_err();
        assert!(matches!(err, SessionError::Pool(PoolError::ShuttingDown(Tier::Admin))));
        assert_eq!(session.affinity(), Affinity::Unpinned);
        assert!(session.held_connection_id().is_none());
        assert_eq!(manager.pool(Tier::Admin).stats().alive, 0);
    }

    #[tokio::test]
    async fn dispatch_debug_names_statement_and_tier() {
        let manager = manager(MockConnector::new()).await;
        let mut session = session(&manager);

        let dispatch = session.dispatch("SELECT 1").await.unwrap();
        let rendered = format!("{dispatch:?}");
        assert!(rendered.contains("ReadOnly"), "{rendered}");
        assert!(rendered.contains("Readonly"), "{rendered}");
        assert!(rendered.contains("connection_id"), "{rendered}");
        dispatch.finish(true);
    }
}
