//! Pool manager: one pool per tier plus the serialized topology path.
//!
//! # Responsibilities
//! - Route borrows to the matching tier's pool
//! - Apply topology events one at a time per tier
//! - Keep a tier's last Active endpoint instead of leaving it empty (stale, degraded)
//! - Run periodic maintenance (shrink, re-warm, prune)
//! - Shut the pools down with a grace period

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use serde::Serialize;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::backend::{Connector, Endpoint, EndpointRegistry, EndpointState, Tier};
use crate::observability::metrics;
use crate::topology::{TopologyError, TopologyEvent, TopologyEventKind, TopologyOutcome};
use super::connection::PooledConnection;
use super::tier_pool::{DrainOutcome, Pool, PoolConfig, PoolStats};
use super::PoolError;

struct TierHandle<C: Connector> {
    pool: Pool<C>,
    /// Serializes topology application for the tier.
    apply: Mutex<()>,
    /// Endpoint whose removal was refused because it was the last Active one.
    /// Written only under `apply`; read without it.
    stale: ArcSwapOption<Endpoint>,
    degraded: AtomicBool,
}

impl<C: Connector> TierHandle<C> {
    fn set_degraded(&self, degraded: bool) {
        if self.degraded.swap(degraded, Ordering::SeqCst) != degraded {
            metrics::record_tier_degraded(self.pool.tier(), degraded);
        }
    }
}

/// Snapshot of one endpoint for the admin API.
#[derive(Debug, Clone, Serialize)]
pub struct EndpointStatus {
    pub address: String,
    pub tier: Tier,
    pub state: &'static str,
    pub in_use: usize,
    pub idle: usize,
    pub opening: usize,
    pub stale: bool,
}

/// What shutdown did with the remaining links.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    /// Idle links closed immediately.
    pub idle_closed: usize,
    /// Borrowed links returned within the grace period.
    pub returned: usize,
    /// Borrowed links still out when the grace period ended. Their holders are
    /// severed and each link closes as soon as it is given up.
    pub forced: usize,
}

/// Supervises the admin and readonly pools.
pub struct PoolManager<C: Connector> {
    registry: Arc<EndpointRegistry>,
    tiers: [TierHandle<C>; 2],
}

impl<C: Connector> PoolManager<C> {
    /// Build both pools (empty). Fails fast on invalid bounds.
    pub fn new(connector: C, admin: PoolConfig, readonly: PoolConfig) -> Result<Self, PoolError> {
        let connector = Arc::new(connector);
        let registry = Arc::new(EndpointRegistry::new());
        let handle = |tier, config| -> Result<TierHandle<C>, PoolError> {
            Ok(TierHandle {
                pool: Pool::new(tier, config, connector.clone(), registry.clone())?,
                apply: Mutex::new(()),
                stale: ArcSwapOption::empty(),
                degraded: AtomicBool::new(false),
            })
        };
        let tiers = [handle(Tier::Admin, admin)?, handle(Tier::Readonly, readonly)?];
        Ok(Self { registry, tiers })
    }

    fn handle(&self, tier: Tier) -> &TierHandle<C> {
        &self.tiers[tier.index()]
    }

    pub fn pool(&self, tier: Tier) -> &Pool<C> {
        &self.handle(tier).pool
    }

    pub fn registry(&self) -> &Arc<EndpointRegistry> {
        &self.registry
    }

    /// Borrow a link from `tier`'s pool.
    pub async fn borrow(&self, tier: Tier, deadline: Instant) -> Result<PooledConnection<C>, PoolError> {
        self.pool(tier).borrow(deadline).await
    }

    /// Return a link. The tier is the one the link was borrowed from.
    pub fn release(&self, conn: PooledConnection<C>, healthy: bool) {
        conn.release(healthy);
    }

    pub fn is_degraded(&self, tier: Tier) -> bool {
        self.handle(tier).degraded.load(Ordering::SeqCst)
    }

    /// Apply one topology event. Events for the same tier never interleave.
    pub async fn apply_topology(&self, event: &TopologyEvent) -> Result<TopologyOutcome, TopologyError> {
        let handle = self.handle(event.tier);
        let result = {
            let _apply = handle.apply.lock().await;
            match event.kind {
                TopologyEventKind::EndpointAdded => self.add_endpoint(handle, event),
                TopologyEventKind::EndpointRemoved | TopologyEventKind::NodeDraining => {
                    Ok(self.retire_endpoint(handle, event))
                }
            }
        };

        match &result {
            Ok(outcome) => {
                metrics::record_topology_event(event.kind.as_str(), event.tier, outcome.as_str());
                tracing::info!(
                    kind = event.kind.as_str(),
                    tier = %event.tier,
                    endpoint = %event.address,
                    outcome = outcome.as_str(),
                    "Topology event applied"
                );
            }
            Err(e) => {
                metrics::record_topology_event(event.kind.as_str(), event.tier, "conflict");
                tracing::warn!(
                    kind = event.kind.as_str(),
                    tier = %event.tier,
                    endpoint = %event.address,
                    error = %e,
                    "Topology event conflicted"
                );
            }
        }
        result
    }

    fn add_endpoint(&self, handle: &TierHandle<C>, event: &TopologyEvent) -> Result<TopologyOutcome, TopologyError> {
        let (endpoint, outcome) = match self.registry.get(event.tier, &event.address) {
            Some(existing) if existing.state() == EndpointState::Active => {
                // Re-announcing the stale endpoint means it is healthy again.
                if handle.stale.load_full().is_some_and(|s| Arc::ptr_eq(&s, &existing)) {
                    handle.stale.store(None);
                    handle.set_degraded(false);
                }
                return Ok(TopologyOutcome::Unchanged);
            }
            Some(existing) if existing.state() == EndpointState::Draining => {
                if !handle.pool.reactivate(&existing) {
                    return Err(TopologyError::TopologyApplyConflict {
                        tier: event.tier,
                        address: event.address.clone(),
                    });
                }
                (existing, TopologyOutcome::Reactivated)
            }
            _ => {
                let endpoint = Arc::new(Endpoint::new(event.address.clone(), event.tier));
                self.registry.insert(endpoint.clone());
                (endpoint, TopologyOutcome::Added)
            }
        };
        handle.pool.warm(endpoint.clone());

        if let Some(stale) = handle.stale.swap(None) {
            if !Arc::ptr_eq(&stale, &endpoint) {
                handle.pool.drain(&stale);
                tracing::info!(
                    tier = %event.tier,
                    endpoint = %stale.addr(),
                    replacement = %endpoint.addr(),
                    "Stale endpoint retired after replacement arrived"
                );
            }
            handle.set_degraded(false);
        }
        Ok(outcome)
    }

    fn retire_endpoint(&self, handle: &TierHandle<C>, event: &TopologyEvent) -> TopologyOutcome {
        let endpoint = match self.registry.get(event.tier, &event.address) {
            Some(endpoint) if endpoint.is_active() => endpoint,
            _ => return TopologyOutcome::Unchanged,
        };

        if self.registry.active_count(event.tier) <= 1 {
            tracing::warn!(
                tier = %event.tier,
                endpoint = %endpoint.addr(),
                "Refusing to remove the last active endpoint, keeping it stale; tier degraded"
            );
            handle.stale.store(Some(endpoint));
            handle.set_degraded(true);
            return TopologyOutcome::KeptStale;
        }

        match handle.pool.drain(&endpoint) {
            DrainOutcome::Draining { in_flight } => TopologyOutcome::Draining { in_flight },
            DrainOutcome::Removed => TopologyOutcome::Removed,
            DrainOutcome::AlreadyRemoved => TopologyOutcome::Unchanged,
        }
    }

    /// One maintenance pass: shrink idle links, top the tier back up to
    /// `min_alive` links on Active endpoints, prune Removed records, publish gauges.
    pub async fn maintain(&self) {
        for handle in &self.tiers {
            let tier = handle.pool.tier();
            handle.pool.shrink();

            let snapshot = self.registry.snapshot(tier);
            let held: usize = snapshot.iter().filter(|e| e.is_active()).map(|e| e.references()).sum();
            if held < handle.pool.config().min_alive {
                for endpoint in snapshot.iter().filter(|e| e.is_active() && !e.is_warming()) {
                    handle.pool.warm(endpoint.clone());
                }
            }

            {
                let _apply = handle.apply.lock().await;
                let pruned = self.registry.prune_removed(tier);
                if pruned > 0 {
                    tracing::debug!(tier = %tier, pruned, "Pruned removed endpoints");
                }
            }

            metrics::record_pool_stats(&handle.pool.stats());
            metrics::record_tier_degraded(tier, self.is_degraded(tier));
        }
    }

    /// Run [`maintain`](Self::maintain) every `interval` until shutdown.
    pub fn spawn_maintenance(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => self.maintain().await,
                    _ = shutdown.recv() => {
                        tracing::debug!("Pool maintenance stopped");
                        break;
                    }
                }
            }
        })
    }

    pub fn stats(&self) -> Vec<PoolStats> {
        self.tiers.iter().map(|h| h.pool.stats()).collect()
    }

    pub fn endpoints(&self, tier: Tier) -> Vec<EndpointStatus> {
        let stale = self.handle(tier).stale.load_full();
        self.registry
            .snapshot(tier)
            .iter()
            .map(|e| EndpointStatus {
                address: e.addr().to_string(),
                tier,
                state: e.state().as_str(),
                in_use: e.in_use(),
                idle: e.idle(),
                opening: e.opening(),
                stale: stale.as_ref().is_some_and(|s| Arc::ptr_eq(s, e)),
            })
            .collect()
    }

    /// Stop both pools: refuse new borrows, close idle links, wait up to `grace`
    /// for borrowed links to come back. Links still out afterwards are severed:
    /// their holders are signalled to drop them, which closes them.
    pub async fn shutdown(&self, grace: Duration) -> ShutdownReport {
        let mut report = ShutdownReport::default();
        for handle in &self.tiers {
            report.idle_closed += handle.pool.close();
        }

        let outstanding = |tiers: &[TierHandle<C>; 2]| tiers.iter().map(|h| h.pool.in_use()).sum::<usize>();
        let initially_out = outstanding(&self.tiers);
        let deadline = Instant::now() + grace;
        tracing::info!(
            idle_closed = report.idle_closed,
            in_use = initially_out,
            grace_secs = grace.as_secs(),
            "Pools closed, waiting for borrowed connections"
        );

        let mut remaining = initially_out;
        while remaining > 0 && Instant::now() < deadline {
            let nap = Duration::from_millis(50).min(deadline.saturating_duration_since(Instant::now()));
            tokio::time::sleep(nap).await;
            remaining = outstanding(&self.tiers);
        }

        report.forced = remaining;
        report.returned = initially_out.saturating_sub(remaining);
        if report.forced > 0 {
            tracing::warn!(forced = report.forced, "Grace period elapsed with connections still borrowed");
            for handle in &self.tiers {
                handle.pool.sever();
            }
        } else {
            tracing::info!(returned = report.returned, "All borrowed connections returned");
        }
        report
    }
}
