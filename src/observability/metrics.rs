//! Metrics collection and exposition.
//!
//! # Metrics
//! - `tierproxy_pool_alive` / `_idle` / `_in_use` (gauge, `tier`)
//! - `tierproxy_tier_degraded` (gauge, `tier`): 1 while a tier runs on a stale endpoint
//! - `tierproxy_pool_exhausted_total` (counter, `tier`)
//! - `tierproxy_backend_unavailable_total` (counter, `tier`)
//! - `tierproxy_connections_opened_total` (counter, `tier`)
//! - `tierproxy_connections_closed_total` (counter, `tier`, `reason`)
//! - `tierproxy_topology_events_total` (counter, `kind`, `tier`, `outcome`)
//! - `tierproxy_statements_total` (counter, `class`, `tier`)
//! - `tierproxy_borrow_wait_seconds` (histogram, `tier`)

use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::backend::Tier;
use crate::pool::PoolStats;

/// Install the Prometheus recorder with its own HTTP listener on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Prometheus metrics listener started");
    Ok(())
}

pub fn record_pool_stats(stats: &PoolStats) {
    let tier = stats.tier.as_str();
    ::metrics::gauge!("tierproxy_pool_alive", "tier" => tier).set(stats.alive as f64);
    ::metrics::gauge!("tierproxy_pool_idle", "tier" => tier).set(stats.idle as f64);
    ::metrics::gauge!("tierproxy_pool_in_use", "tier" => tier).set(stats.in_use as f64);
}

pub fn record_tier_degraded(tier: Tier, degraded: bool) {
    ::metrics::gauge!("tierproxy_tier_degraded", "tier" => tier.as_str())
        .set(if degraded { 1.0 } else { 0.0 });
}

pub fn record_pool_exhausted(tier: Tier) {
    ::metrics::counter!("tierproxy_pool_exhausted_total", "tier" => tier.as_str()).increment(1);
}

pub fn record_backend_unavailable(tier: Tier) {
    ::metrics::counter!("tierproxy_backend_unavailable_total", "tier" => tier.as_str()).increment(1);
}

pub fn record_connection_opened(tier: Tier) {
    ::metrics::counter!("tierproxy_connections_opened_total", "tier" => tier.as_str()).increment(1);
}

pub fn record_connection_closed(tier: Tier, reason: &'static str) {
    ::metrics::counter!(
        "tierproxy_connections_closed_total",
        "tier" => tier.as_str(),
        "reason" => reason
    )
    .increment(1);
}

pub fn record_borrow_wait(tier: Tier, waited: Duration) {
    ::metrics::histogram!("tierproxy_borrow_wait_seconds", "tier" => tier.as_str())
        .record(waited.as_secs_f64());
}

pub fn record_topology_event(kind: &'static str, tier: Tier, outcome: &'static str) {
    ::metrics::counter!(
        "tierproxy_topology_events_total",
        "kind" => kind,
        "tier" => tier.as_str(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_statement(class: &'static str, tier: Tier) {
    ::metrics::counter!(
        "tierproxy_statements_total",
        "class" => class,
        "tier" => tier.as_str()
    )
    .increment(1);
}
