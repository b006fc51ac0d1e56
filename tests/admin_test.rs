//! Admin API, exercised in-process.

mod common;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::Value;
use tokio::sync::mpsc;
use tower::ServiceExt;

use common::{manager_with, pool_config, MemoryConnector};
use tier_proxy::admin::{setup_admin_router, AdminState};
use tier_proxy::session::SessionRegistry;
use tier_proxy::{Tier, TopologyEvent};

const KEY: &str = "test-key";

async fn router() -> (Router, mpsc::Receiver<TopologyEvent>) {
    let manager = manager_with(MemoryConnector::new(), pool_config(0, 4), &["p1:5432"], &["r1:5432"]).await;
    let (tx, rx) = mpsc::channel(4);
    let state = AdminState {
        pools: manager,
        sessions: SessionRegistry::new(),
        topology: tx,
        api_key: Arc::from(KEY),
    };
    (setup_admin_router(state), rx)
}

fn get(path: &str) -> Request<Body> {
    Request::builder()
        .uri(path)
        .header(header::AUTHORIZATION, format!("Bearer {KEY}"))
        .body(Body::empty())
        .unwrap()
}

fn post_topology(body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/admin/topology")
        .header(header::AUTHORIZATION, format!("Bearer {KEY}"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn requests_without_token_are_rejected() {
    let (app, _rx) = router().await;
    let response = app
        .oneshot(Request::builder().uri("/admin/status").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let (app, _rx) = router().await;
    let wrong = Request::builder()
        .uri("/admin/pools")
        .header(header::AUTHORIZATION, "Bearer nope")
        .body(Body::empty())
        .unwrap();
    assert_eq!(app.oneshot(wrong).await.unwrap().status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn status_and_pools_report_both_tiers() {
    let (app, _rx) = router().await;
    let response = app.clone().oneshot(get("/admin/status")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let status = json(response).await;
    assert_eq!(status["status"], "operational");
    assert_eq!(status["sessions"], 0);

    let pools = json(app.oneshot(get("/admin/pools")).await.unwrap()).await;
    let pools = pools.as_array().unwrap();
    assert_eq!(pools.len(), 2);
    assert_eq!(pools[0]["tier"], "admin");
    assert_eq!(pools[0]["max_alive"], 4);
    assert_eq!(pools[1]["tier"], "readonly");
    assert_eq!(pools[1]["degraded"], false);
}

#[tokio::test]
async fn endpoints_lists_registry() {
    let (app, _rx) = router().await;
    let endpoints = json(app.oneshot(get("/admin/endpoints")).await.unwrap()).await;
    let addresses: Vec<&str> = endpoints
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["address"].as_str().unwrap())
        .collect();
    assert_eq!(addresses, vec!["p1:5432", "r1:5432"]);
    assert_eq!(endpoints[0]["state"], "active");
}

#[tokio::test]
async fn topology_command_is_queued() {
    let (app, mut rx) = router().await;
    let response = app
        .oneshot(post_topology(
            r#"{"kind":"node_draining","tier":"readonly","address":"r1:5432"}"#,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(rx.recv().await.unwrap(), TopologyEvent::draining(Tier::Readonly, "r1:5432"));
}

#[tokio::test]
async fn malformed_topology_command_is_refused() {
    let (app, mut rx) = router().await;
    let response = app
        .clone()
        .oneshot(post_topology(r#"{"kind":"endpoint_added","tier":"admin","address":"nohost"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .oneshot(post_topology(r#"{"kind":"reboot","tier":"admin","address":"p1:5432"}"#))
        .await
        .unwrap();
    assert!(response.status().is_client_error());
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn stopped_coordinator_yields_unavailable() {
    let (app, rx) = router().await;
    drop(rx);
    let response = app
        .oneshot(post_topology(r#"{"kind":"endpoint_added","tier":"admin","address":"p2:5432"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}
