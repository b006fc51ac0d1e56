use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use tokio::sync::mpsc::error::TrySendError;

use crate::backend::Tier;
use crate::config::validation::is_host_port;
use crate::pool::{EndpointStatus, PoolStats};
use crate::session::SessionInfo;
use crate::topology::TopologyEvent;
use super::AdminState;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub sessions: usize,
    pub pinned_sessions: usize,
    pub degraded_tiers: Vec<Tier>,
}

#[derive(Serialize)]
pub struct PoolView {
    #[serde(flatten)]
    pub stats: PoolStats,
    pub degraded: bool,
}

#[derive(Serialize)]
pub struct CommandError {
    pub error: String,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let degraded_tiers: Vec<Tier> = Tier::ALL
        .into_iter()
        .filter(|t| state.pools.degraded(*t))
        .collect();
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: if degraded_tiers.is_empty() { "operational" } else { "degraded" },
        sessions: state.sessions.len(),
        pinned_sessions: state.sessions.pinned(),
        degraded_tiers,
    })
}

pub async fn get_pools(State(state): State<AdminState>) -> Json<Vec<PoolView>> {
    let views = state
        .pools
        .pool_stats()
        .into_iter()
        .map(|stats| PoolView {
            degraded: state.pools.degraded(stats.tier),
            stats,
        })
        .collect();
    Json(views)
}

pub async fn get_endpoints(State(state): State<AdminState>) -> Json<Vec<EndpointStatus>> {
    let mut endpoints = Vec::new();
    for tier in Tier::ALL {
        endpoints.extend(state.pools.endpoint_status(tier));
    }
    Json(endpoints)
}

pub async fn get_sessions(State(state): State<AdminState>) -> Json<Vec<SessionInfo>> {
    Json(state.sessions.list())
}

/// Queue a topology event behind whatever discovery has already sent.
pub async fn post_topology(
    State(state): State<AdminState>,
    Json(event): Json<TopologyEvent>,
) -> Result<(StatusCode, Json<TopologyEvent>), (StatusCode, Json<CommandError>)> {
    if !is_host_port(&event.address) {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(CommandError {
                error: format!("'{}' is not a host:port address", event.address),
            }),
        ));
    }

    match state.topology.try_send(event.clone()) {
        Ok(()) => {
            tracing::info!(event = %event, "Topology command queued from admin API");
            Ok((StatusCode::ACCEPTED, Json(event)))
        }
        Err(TrySendError::Full(_)) => Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(CommandError {
                error: "topology channel is full, retry later".to_string(),
            }),
        )),
        Err(TrySendError::Closed(_)) => Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(CommandError {
                error: "topology coordinator is not running".to_string(),
            }),
        )),
    }
}
