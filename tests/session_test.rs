//! End-to-end session routing over both tiers.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{manager_with, pool_config, MemoryConnector};
use tier_proxy::auth::{AuthError, UserList};
use tier_proxy::config::UserConfig;
use tier_proxy::routing::{Affinity, StatementClass};
use tier_proxy::session::{SessionError, SessionRegistry};
use tier_proxy::{PoolError, PoolManager, Session, Tier};

const BORROW_TIMEOUT: Duration = Duration::from_millis(300);

async fn setup(connector: MemoryConnector) -> Arc<PoolManager<MemoryConnector>> {
    manager_with(connector, pool_config(0, 4), &["primary:5432"], &["replica:5432"]).await
}

fn users() -> UserList {
    UserList::from_config(&[UserConfig {
        user: "tenant_a".into(),
        password: "alpha".into(),
    }])
}

#[tokio::test]
async fn transaction_statements_share_one_admin_connection() {
    let manager = setup(MemoryConnector::new()).await;
    let mut session = Session::authenticate(&users(), "tenant_a", b"alpha", manager.clone(), BORROW_TIMEOUT).unwrap();

    let mut seen = Vec::new();
    for sql in ["BEGIN", "SELECT * FROM orders", "UPDATE orders SET paid = true", "COMMIT"] {
        let mut dispatch = session.dispatch(sql).await.unwrap();
        assert_eq!(dispatch.tier(), Tier::Admin, "{sql}");
        seen.push((dispatch.connection_id().unwrap(), dispatch.connection().addr.clone()));
        dispatch.finish(true);
    }

    assert!(seen.iter().all(|s| *s == seen[0]));
    assert_eq!(seen[0].1, "primary:5432");
    assert_eq!(session.affinity(), Affinity::Unpinned);

    let dispatch = session.dispatch("SELECT 1").await.unwrap();
    assert_eq!(dispatch.tier(), Tier::Readonly);
    assert_eq!(dispatch.class(), StatementClass::ReadOnly);
    dispatch.finish(true);
}

#[tokio::test]
async fn unknown_statements_go_to_admin() {
    let manager = setup(MemoryConnector::new()).await;
    let mut session = Session::authenticate(&users(), "tenant_a", b"alpha", manager, BORROW_TIMEOUT).unwrap();

    for sql in ["CALL refresh_totals()", "", "GRANT SELECT ON t TO bob"] {
        let dispatch = session.dispatch(sql).await.unwrap();
        assert_eq!(dispatch.class(), StatementClass::ReadWrite);
        assert_eq!(dispatch.tier(), Tier::Admin);
        dispatch.finish(true);
    }
}

#[tokio::test]
async fn cancelled_statement_in_transaction_unpins() {
    let manager = setup(MemoryConnector::new()).await;
    let mut session = Session::authenticate(&users(), "tenant_a", b"alpha", manager.clone(), BORROW_TIMEOUT).unwrap();

    session.dispatch("START TRANSACTION").await.unwrap().finish(true);
    assert!(session.affinity().is_pinned());

    // The statement future is dropped before completion.
    drop(session.dispatch("UPDATE t SET x = 1").await.unwrap());

    assert_eq!(session.affinity(), Affinity::Unpinned);
    let stats = manager.pool(Tier::Admin).stats();
    assert_eq!((stats.alive, stats.in_use), (0, 0));
}

#[tokio::test]
async fn begin_with_no_admin_backend_stays_unpinned() {
    let connector = MemoryConnector::new();
    connector.refuse("primary:5432");
    let manager = setup(connector).await;
    let mut session = Session::authenticate(&users(), "tenant_a", b"alpha", manager, BORROW_TIMEOUT).unwrap();

    let err = session.dispatch("BEGIN").await.unwrap_err();
    assert!(matches!(err, SessionError::Pool(PoolError::BackendUnavailable { .. })));
    assert!(err.is_retryable());
    assert_eq!(session.affinity(), Affinity::Unpinned);

    // Reads still work.
    let dispatch = session.dispatch("SELECT 1").await.unwrap();
    assert_eq!(dispatch.tier(), Tier::Readonly);
    dispatch.finish(true);
}

#[tokio::test]
async fn bad_credentials_never_borrow() {
    let connector = MemoryConnector::new();
    let manager = setup(connector.clone()).await;

    let err = Session::authenticate(&users(), "tenant_a", b"wrong", manager.clone(), BORROW_TIMEOUT)
        .err()
        .unwrap();
    assert!(matches!(err, SessionError::Auth(AuthError::BadCredentials(_))));

    let err = Session::authenticate(&users(), "nobody", b"alpha", manager, BORROW_TIMEOUT)
        .err()
        .unwrap();
    assert!(matches!(err, SessionError::Auth(AuthError::UnknownUser(_))));
    assert_eq!(connector.connects(), 0);
}

#[tokio::test]
async fn registry_follows_session_lifetime() {
    let manager = setup(MemoryConnector::new()).await;
    let registry = SessionRegistry::new();

    {
        let mut session = Session::authenticate(&users(), "tenant_a", b"alpha", manager.clone(), BORROW_TIMEOUT)
            .unwrap()
            .with_registry(registry.clone());
        session.dispatch("BEGIN").await.unwrap().finish(true);
        session.dispatch("SELECT 1").await.unwrap().finish(true);

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.pinned(), 1);
        let info = registry.get(session.id()).unwrap();
        assert_eq!(info.tenant, "tenant_a");
        assert_eq!(info.statements, 2);
    }

    // Dropped mid-transaction: the held admin link is closed, not pooled.
    assert!(registry.is_empty());
    assert_eq!(manager.pool(Tier::Admin).stats().alive, 0);
}
