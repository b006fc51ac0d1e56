//! Admin HTTP API.
//!
//! # Data Flow
//! ```text
//! GET  /admin/{status,pools,endpoints,sessions}
//!     → bearer check (auth.rs) → handlers.rs → PoolOverview / SessionRegistry snapshot
//! POST /admin/topology
//!     → bearer check → handlers.rs → topology channel (same path as discovery)
//! ```
//!
//! # Design Decisions
//! - Read-only views never take a pool lock for longer than a stats snapshot
//! - Topology commands are queued, not applied inline; the response is 202
//! - State is object-safe so the router does not depend on the connector type

pub mod auth;
pub mod handlers;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::backend::{Connector, Tier};
use crate::pool::{EndpointStatus, PoolManager, PoolStats};
use crate::session::SessionRegistry;
use crate::topology::TopologySender;
use self::auth::admin_auth_middleware;
use self::handlers::*;

/// Read access to the pools, independent of the connector type.
pub trait PoolOverview: Send + Sync {
    fn pool_stats(&self) -> Vec<PoolStats>;
    fn endpoint_status(&self, tier: Tier) -> Vec<EndpointStatus>;
    fn degraded(&self, tier: Tier) -> bool;
}

impl<C: Connector> PoolOverview for PoolManager<C> {
    fn pool_stats(&self) -> Vec<PoolStats> {
        self.stats()
    }

    fn endpoint_status(&self, tier: Tier) -> Vec<EndpointStatus> {
        self.endpoints(tier)
    }

    fn degraded(&self, tier: Tier) -> bool {
        self.is_degraded(tier)
    }
}

#[derive(Clone)]
pub struct AdminState {
    pub pools: Arc<dyn PoolOverview>,
    pub sessions: SessionRegistry,
    pub topology: TopologySender,
    pub api_key: Arc<str>,
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/pools", get(get_pools))
        .route("/admin/endpoints", get(get_endpoints))
        .route("/admin/sessions", get(get_sessions))
        .route("/admin/topology", post(post_topology))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
