//! Per-tier connection pool.
//!
//! # Responsibilities
//! - Hand out live links to Active endpoints of one tier (borrow)
//! - Take links back, recycling or closing them (release)
//! - Open links ahead of demand for new endpoints (warm)
//! - Trim idle links beyond policy (shrink)
//! - Retire endpoints without interrupting in-flight work (drain)
//! - Tell holders of borrowed links to give them up once shutdown's grace ends (sever)
//!
//! # Invariants
//! - `idle + in_use == alive <= max_alive` (reservations for links still being
//!   opened count against `max_alive` too)
//! - A link is borrowed by at most one session at a time
//! - Links on Draining/Removed endpoints, or returned unhealthy, are closed, never idled
//!
//! All counters live behind one `Mutex` per tier. The critical section is pure
//! bookkeeping: connecting, probing and closing happen outside of it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant as StdInstant};

use serde::Serialize;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::backend::{Connector, Endpoint, EndpointRegistry, EndpointState, Tier};
use crate::observability::metrics;
use crate::resilience::{within_deadline, BackoffPolicy, Expired};
use super::connection::{PooledConnection, Slot};
use super::selector::{EndpointSelector, LeastRecentlyCreated};
use super::PoolError;

/// Bounds and timings for one tier's pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Links kept open tier-wide on Active endpoints: the warm-up target and the
    /// eviction floor.
    pub min_alive: usize,
    /// Hard cap on established plus in-progress links.
    pub max_alive: usize,
    /// Idle links beyond this are closed by maintenance, oldest first.
    pub max_idle: usize,
    /// Idle links unused for longer are probed before being handed out.
    pub stale_after: Duration,
    /// Idle links unused for longer are closed by maintenance.
    pub idle_timeout: Duration,
    /// Upper bound for a single connect or probe.
    pub connect_timeout: Duration,
    /// Retry schedule for warm-up.
    pub warm_backoff: BackoffPolicy,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_alive: 2,
            max_alive: 32,
            max_idle: 8,
            stale_after: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(300),
            connect_timeout: Duration::from_secs(3),
            warm_backoff: BackoffPolicy::default(),
        }
    }
}

impl PoolConfig {
    /// Reject bounds the pool cannot honor. `max_alive == 0` is never treated as unlimited.
    pub fn validate(&self, tier: Tier) -> Result<(), PoolError> {
        if self.max_alive == 0 {
            return Err(PoolError::InvalidConfiguration(format!(
                "{} tier: max_alive must be at least 1",
                tier
            )));
        }
        if self.min_alive > self.max_alive {
            return Err(PoolError::InvalidConfiguration(format!(
                "{} tier: min_alive ({}) exceeds max_alive ({})",
                tier, self.min_alive, self.max_alive
            )));
        }
        if self.max_idle > self.max_alive {
            return Err(PoolError::InvalidConfiguration(format!(
                "{} tier: max_idle ({}) exceeds max_alive ({})",
                tier, self.max_idle, self.max_alive
            )));
        }
        if self.connect_timeout.is_zero() {
            return Err(PoolError::InvalidConfiguration(format!(
                "{} tier: connect timeout must be non-zero",
                tier
            )));
        }
        Ok(())
    }
}

/// Point-in-time counters for one tier.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub tier: Tier,
    pub alive: usize,
    pub idle: usize,
    pub in_use: usize,
    pub opening: usize,
    pub min_alive: usize,
    pub max_alive: usize,
    pub max_idle: usize,
    pub created_total: u64,
    pub closed_total: u64,
    pub exhausted_total: u64,
    pub shutting_down: bool,
}

/// Result of draining an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Still referenced by borrowed (or opening) links.
    Draining { in_flight: usize },
    /// No links left; the endpoint is gone.
    Removed,
    /// Nothing to do.
    AlreadyRemoved,
}

struct PoolState<T> {
    /// Ordered by `last_used`, oldest at the front.
    idle: VecDeque<Slot<T>>,
    in_use: usize,
    opening: usize,
    creation_clock: u64,
    closed: bool,
}

impl<T> PoolState<T> {
    fn alive(&self) -> usize {
        self.idle.len() + self.in_use
    }

    fn has_capacity(&self, max_alive: usize) -> bool {
        self.alive() + self.opening < max_alive
    }
}

enum Step<C: Connector> {
    /// A fresh idle link.
    Ready(PooledConnection<C>),
    /// A stale idle link that must pass a probe first.
    Verify(PooledConnection<C>),
    /// Capacity reserved for a new link.
    Open(Reservation<C>),
    /// At capacity, nothing idle.
    Wait,
    /// Capacity available but no endpoint left to try.
    Unavailable,
}

pub(crate) struct PoolShared<C: Connector> {
    tier: Tier,
    config: PoolConfig,
    connector: Arc<C>,
    registry: Arc<EndpointRegistry>,
    selector: Box<dyn EndpointSelector>,
    state: Mutex<PoolState<C::Connection>>,
    available: Notify,
    /// Flips to `true` once, when borrowed links must be given up.
    severed: watch::Sender<bool>,
    created_total: AtomicU64,
    closed_total: AtomicU64,
    exhausted_total: AtomicU64,
}

impl<C: Connector> PoolShared<C> {
    fn lock(&self) -> MutexGuard<'_, PoolState<C::Connection>> {
        self.state.lock().expect("pool state mutex poisoned")
    }

    pub(crate) fn is_severed(&self) -> bool {
        *self.severed.borrow()
    }

    /// Resolves once the pool has been severed.
    pub(crate) async fn wait_severed(&self) {
        let mut rx = self.severed.subscribe();
        // The sender lives as long as `self`, so this only returns once severed.
        let _ = rx.wait_for(|severed| *severed).await;
    }

    /// Decide how to serve a borrow. Never blocks.
    fn plan(self: &Arc<Self>, failed: &[Arc<Endpoint>]) -> Result<Step<C>, PoolError> {
        let snapshot = self.registry.snapshot(self.tier);
        let mut doomed = Vec::new();

        let step = {
            let mut state = self.lock();
            if state.closed {
                return Err(PoolError::ShuttingDown(self.tier));
            }
            self.purge_inactive(&mut state, &mut doomed);

            let now = StdInstant::now();
            let stale_after = self.config.stale_after;
            let fresh = |slot: &Slot<C::Connection>| now.duration_since(slot.last_used) < stale_after;

            if let Some(slot) = self.take_idle(&mut state, fresh) {
                Step::Ready(self.lend(&mut state, slot))
            } else {
                let candidates: Vec<Arc<Endpoint>> = snapshot
                    .iter()
                    .filter(|e| e.is_active() && !failed.iter().any(|f| Arc::ptr_eq(f, e)))
                    .cloned()
                    .collect();
                let chosen = if state.has_capacity(self.config.max_alive) {
                    self.selector.select(&candidates)
                } else {
                    None
                };

                match chosen {
                    Some(endpoint) => Step::Open(self.reserve(&mut state, endpoint)),
                    None => match self.take_idle(&mut state, |_| true) {
                        Some(slot) => Step::Verify(self.lend(&mut state, slot)),
                        None if !state.has_capacity(self.config.max_alive) => Step::Wait,
                        None => Step::Unavailable,
                    },
                }
            }
        };

        self.close_all(doomed);
        Ok(step)
    }

    /// Close idle links whose endpoint left Active.
    fn purge_inactive(
        &self,
        state: &mut PoolState<C::Connection>,
        doomed: &mut Vec<(Slot<C::Connection>, &'static str)>,
    ) {
        if state.idle.iter().all(|s| s.endpoint.is_active()) {
            return;
        }
        let mut kept = VecDeque::with_capacity(state.idle.len());
        for slot in state.idle.drain(..) {
            if slot.endpoint.is_active() {
                kept.push_back(slot);
            } else {
                slot.endpoint.add_idle(-1);
                doomed.push((slot, "endpoint_draining"));
            }
        }
        state.idle = kept;
    }

    /// Remove the most recently returned eligible idle link from the endpoint the
    /// selector prefers.
    fn take_idle<F>(&self, state: &mut PoolState<C::Connection>, eligible: F) -> Option<Slot<C::Connection>>
    where
        F: Fn(&Slot<C::Connection>) -> bool,
    {
        let mut candidates: Vec<Arc<Endpoint>> = Vec::new();
        for slot in state.idle.iter().filter(|s| eligible(*s)) {
            if !candidates.iter().any(|e| Arc::ptr_eq(e, &slot.endpoint)) {
                candidates.push(slot.endpoint.clone());
            }
        }
        let chosen = self.selector.select(&candidates)?;
        let pos = state
            .idle
            .iter()
            .rposition(|s| Arc::ptr_eq(&s.endpoint, &chosen) && eligible(s))?;
        let slot = state.idle.remove(pos)?;
        slot.endpoint.add_idle(-1);
        Some(slot)
    }

    fn lend(self: &Arc<Self>, state: &mut PoolState<C::Connection>, slot: Slot<C::Connection>) -> PooledConnection<C> {
        state.in_use += 1;
        slot.endpoint.add_in_use(1);
        PooledConnection::new(slot, self.clone())
    }

    fn reserve(self: &Arc<Self>, state: &mut PoolState<C::Connection>, endpoint: Arc<Endpoint>) -> Reservation<C> {
        state.opening += 1;
        state.creation_clock += 1;
        endpoint.add_opening(1);
        endpoint.stamp_created(state.creation_clock);
        Reservation {
            pool: self.clone(),
            endpoint,
            settled: false,
        }
    }

    /// Capacity for warm-up, while the tier holds fewer than `min_alive` links
    /// (open or opening) on Active endpoints. Shrink uses the same floor, so a
    /// warmed link is never one that maintenance would close again.
    fn reserve_warm(self: &Arc<Self>, endpoint: &Arc<Endpoint>) -> Option<Reservation<C>> {
        let snapshot = self.registry.snapshot(self.tier);
        let mut state = self.lock();
        if state.closed || !endpoint.is_active() || !state.has_capacity(self.config.max_alive) {
            return None;
        }
        let mut held: usize = snapshot
            .iter()
            .filter(|e| e.is_active())
            .map(|e| e.references())
            .sum();
        if !snapshot.iter().any(|e| Arc::ptr_eq(e, endpoint)) {
            held += endpoint.references();
        }
        if held >= self.config.min_alive {
            return None;
        }
        Some(self.reserve(&mut state, endpoint.clone()))
    }

    /// Move a Draining endpoint with no remaining links to Removed. Caller holds the lock.
    fn retire_if_drained(&self, endpoint: &Endpoint) {
        if endpoint.state() == EndpointState::Draining
            && endpoint.references() == 0
            && endpoint.transition(EndpointState::Draining, EndpointState::Removed)
        {
            tracing::info!(
                tier = %self.tier,
                endpoint = %endpoint.addr(),
                "Endpoint drained, marked removed"
            );
        }
    }

    pub(crate) fn release(&self, mut slot: Slot<C::Connection>, healthy: bool) {
        let endpoint = slot.endpoint.clone();
        let closing = {
            let mut state = self.lock();
            state.in_use -= 1;
            endpoint.add_in_use(-1);

            if healthy && !state.closed && endpoint.is_active() {
                slot.last_used = StdInstant::now();
                endpoint.add_idle(1);
                state.idle.push_back(slot);
                None
            } else {
                let reason = if !healthy {
                    "unhealthy"
                } else if state.closed {
                    "shutdown"
                } else {
                    "endpoint_draining"
                };
                self.retire_if_drained(&endpoint);
                Some((slot, reason))
            }
        };

        self.available.notify_waiters();
        if let Some((slot, reason)) = closing {
            tracing::debug!(
                tier = %self.tier,
                connection_id = %slot.id,
                endpoint = %endpoint.addr(),
                reason,
                "Closing returned connection"
            );
            self.close_all(vec![(slot, reason)]);
        }
    }

    /// Drop links outside the critical section and account for them.
    fn close_all(&self, doomed: Vec<(Slot<C::Connection>, &'static str)>) {
        for (slot, reason) in doomed {
            drop(slot);
            self.closed_total.fetch_add(1, Ordering::Relaxed);
            metrics::record_connection_closed(self.tier, reason);
        }
    }
}

/// Capacity reserved while a link is being opened.
///
/// Dropping it unsettled (connect failed or the borrower was cancelled) gives
/// the capacity back.
pub(crate) struct Reservation<C: Connector> {
    pool: Arc<PoolShared<C>>,
    endpoint: Arc<Endpoint>,
    settled: bool,
}

impl<C: Connector> Reservation<C> {
    fn endpoint(&self) -> &Arc<Endpoint> {
        &self.endpoint
    }

    /// Turn the new link into a borrowed connection, unless the endpoint stopped
    /// being Active while connecting.
    fn into_lease(mut self, conn: C::Connection) -> Option<PooledConnection<C>> {
        self.settled = true;
        let pool = self.pool.clone();
        let slot = Slot::new(conn, self.endpoint.clone());
        pool.created_total.fetch_add(1, Ordering::Relaxed);
        metrics::record_connection_opened(pool.tier);

        let outcome = {
            let mut state = pool.lock();
            state.opening -= 1;
            self.endpoint.add_opening(-1);
            if state.closed || !self.endpoint.is_active() {
                pool.retire_if_drained(&self.endpoint);
                Err(slot)
            } else {
                Ok(pool.lend(&mut state, slot))
            }
        };

        match outcome {
            Ok(lease) => Some(lease),
            Err(slot) => {
                pool.available.notify_waiters();
                pool.close_all(vec![(slot, "endpoint_draining")]);
                None
            }
        }
    }

    /// Park the new link as Idle. Returns false if it had to be closed instead.
    fn into_idle(mut self, conn: C::Connection) -> bool {
        self.settled = true;
        let pool = self.pool.clone();
        let slot = Slot::new(conn, self.endpoint.clone());
        pool.created_total.fetch_add(1, Ordering::Relaxed);
        metrics::record_connection_opened(pool.tier);

        let rejected = {
            let mut state = pool.lock();
            state.opening -= 1;
            self.endpoint.add_opening(-1);
            if state.closed || !self.endpoint.is_active() {
                pool.retire_if_drained(&self.endpoint);
                Some(slot)
            } else {
                self.endpoint.add_idle(1);
                state.idle.push_back(slot);
                None
            }
        };

        pool.available.notify_waiters();
        match rejected {
            Some(slot) => {
                pool.close_all(vec![(slot, "endpoint_draining")]);
                false
            }
            None => true,
        }
    }
}

impl<C: Connector> Drop for Reservation<C> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        {
            let mut state = self.pool.lock();
            state.opening -= 1;
            self.endpoint.add_opening(-1);
            self.pool.retire_if_drained(&self.endpoint);
        }
        self.pool.available.notify_waiters();
    }
}

/// Connection pool for a single tier.
pub struct Pool<C: Connector> {
    shared: Arc<PoolShared<C>>,
}

impl<C: Connector> Clone for Pool<C> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<C: Connector> Pool<C> {
    /// Build an empty pool. Fails fast on invalid bounds.
    pub fn new(
        tier: Tier,
        config: PoolConfig,
        connector: Arc<C>,
        registry: Arc<EndpointRegistry>,
    ) -> Result<Self, PoolError> {
        config.validate(tier)?;
        Ok(Self {
            shared: Arc::new(PoolShared {
                tier,
                config,
                connector,
                registry,
                selector: Box::new(LeastRecentlyCreated::new()),
                state: Mutex::new(PoolState {
                    idle: VecDeque::new(),
                    in_use: 0,
                    opening: 0,
                    creation_clock: 0,
                    closed: false,
                }),
                available: Notify::new(),
                severed: watch::channel(false).0,
                created_total: AtomicU64::new(0),
                closed_total: AtomicU64::new(0),
                exhausted_total: AtomicU64::new(0),
            }),
        })
    }

    pub fn tier(&self) -> Tier {
        self.shared.tier
    }

    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// Borrow a link, waiting until `deadline` at most.
    ///
    /// Fresh idle links are handed out directly. Otherwise a new link is opened
    /// while below `max_alive`; stale idle links are probed first and replaced if
    /// the probe fails. At capacity the call waits for a release. Connect
    /// failures are retried once per Active endpoint before giving up with
    /// `BackendUnavailable`.
    pub async fn borrow(&self, deadline: Instant) -> Result<PooledConnection<C>, PoolError> {
        let shared = &self.shared;
        let started = Instant::now();
        let mut failed: Vec<Arc<Endpoint>> = Vec::new();
        let mut probes_failed = 0usize;
        let mut last_error: Option<String> = None;

        loop {
            // Register for wake-ups before inspecting state so a release between
            // the inspection and the wait is not missed.
            let notified = shared.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match shared.plan(&failed)? {
                Step::Ready(conn) => return Ok(self.handed_out(conn, started)),
                Step::Verify(mut conn) => {
                    let probe = shared.connector.ping(&mut *conn);
                    match within_deadline(deadline, shared.config.connect_timeout, probe).await {
                        Ok(Ok(())) => return Ok(self.handed_out(conn, started)),
                        Ok(Err(e)) => {
                            tracing::warn!(
                                tier = %shared.tier,
                                connection_id = %conn.id(),
                                endpoint = %conn.endpoint().addr(),
                                error = %e,
                                "Idle connection failed liveness probe, replacing"
                            );
                            last_error = Some(format!("{}: {}", conn.endpoint().addr(), e));
                            probes_failed += 1;
                            conn.mark_unhealthy();
                            conn.release(false);
                        }
                        Err(Expired::Operation) => {
                            tracing::warn!(
                                tier = %shared.tier,
                                connection_id = %conn.id(),
                                "Liveness probe timed out, replacing"
                            );
                            last_error = Some(format!("{}: probe timed out", conn.endpoint().addr()));
                            probes_failed += 1;
                            conn.mark_unhealthy();
                            conn.release(false);
                        }
                        Err(Expired::Deadline) => {
                            conn.release(false);
                            return Err(self.exhausted(started));
                        }
                    }
                }
                Step::Open(reservation) => {
                    let endpoint = reservation.endpoint().clone();
                    let connect = shared.connector.connect(endpoint.addr());
                    match within_deadline(deadline, shared.config.connect_timeout, connect).await {
                        Ok(Ok(conn)) => {
                            if let Some(lease) = reservation.into_lease(conn) {
                                tracing::debug!(
                                    tier = %shared.tier,
                                    connection_id = %lease.id(),
                                    endpoint = %endpoint.addr(),
                                    "Opened backend connection"
                                );
                                return Ok(self.handed_out(lease, started));
                            }
                        }
                        Ok(Err(e)) => {
                            tracing::warn!(
                                tier = %shared.tier,
                                endpoint = %endpoint.addr(),
                                error = %e,
                                "Backend connect failed"
                            );
                            last_error = Some(format!("{}: {}", endpoint.addr(), e));
                            failed.push(endpoint);
                        }
                        Err(Expired::Operation) => {
                            tracing::warn!(
                                tier = %shared.tier,
                                endpoint = %endpoint.addr(),
                                "Backend connect timed out"
                            );
                            last_error = Some(format!("{}: connect timed out", endpoint.addr()));
                            failed.push(endpoint);
                        }
                        Err(Expired::Deadline) => return Err(self.exhausted(started)),
                    }
                }
                Step::Wait => {
                    if tokio::time::timeout_at(deadline, notified.as_mut()).await.is_err() {
                        return Err(self.exhausted(started));
                    }
                }
                Step::Unavailable => {
                    metrics::record_backend_unavailable(shared.tier);
                    return Err(PoolError::BackendUnavailable {
                        tier: shared.tier,
                        attempts: failed.len() + probes_failed,
                        reason: last_error.unwrap_or_else(|| "no active endpoints".to_string()),
                    });
                }
            }
        }
    }

    /// Borrow with a relative timeout.
    pub async fn borrow_within(&self, timeout: Duration) -> Result<PooledConnection<C>, PoolError> {
        self.borrow(Instant::now() + timeout).await
    }

    /// Return a borrowed link.
    pub fn release(&self, conn: PooledConnection<C>, healthy: bool) {
        conn.release(healthy);
    }

    fn handed_out(&self, conn: PooledConnection<C>, started: Instant) -> PooledConnection<C> {
        metrics::record_borrow_wait(self.shared.tier, started.elapsed());
        tracing::trace!(
            tier = %self.shared.tier,
            connection_id = %conn.id(),
            endpoint = %conn.endpoint().addr(),
            "Connection borrowed"
        );
        conn
    }

    fn exhausted(&self, started: Instant) -> PoolError {
        self.shared.exhausted_total.fetch_add(1, Ordering::Relaxed);
        metrics::record_pool_exhausted(self.shared.tier);
        let waited = started.elapsed();
        tracing::warn!(
            tier = %self.shared.tier,
            waited_ms = waited.as_millis() as u64,
            "Pool exhausted, borrow deadline elapsed"
        );
        PoolError::PoolExhausted {
            tier: self.shared.tier,
            waited,
        }
    }

    /// Open links to `endpoint` in the background until the tier holds
    /// `min_alive` links on Active endpoints.
    pub fn warm(&self, endpoint: Arc<Endpoint>) -> JoinHandle<usize> {
        let pool = self.clone();
        tokio::spawn(async move { pool.warm_endpoint(endpoint).await })
    }

    /// Warm-up loop. Failures are logged and retried with backoff; returns the
    /// number of links opened. At most one loop runs per endpoint; a second call
    /// while one is in flight returns 0 immediately.
    pub async fn warm_endpoint(&self, endpoint: Arc<Endpoint>) -> usize {
        let shared = &self.shared;
        let Some(_warming) = endpoint.begin_warm() else {
            tracing::debug!(
                tier = %shared.tier,
                endpoint = %endpoint.addr(),
                "Warm-up already running"
            );
            return 0;
        };
        let policy = shared.config.warm_backoff;
        let mut opened = 0usize;
        let mut failures = 0u32;

        while let Some(reservation) = shared.reserve_warm(&endpoint) {
            let connect = shared.connector.connect(endpoint.addr());
            let error = match tokio::time::timeout(shared.config.connect_timeout, connect).await {
                Ok(Ok(conn)) => {
                    failures = 0;
                    if !reservation.into_idle(conn) {
                        break;
                    }
                    opened += 1;
                    continue;
                }
                Ok(Err(e)) => e.to_string(),
                Err(_) => "connect timed out".to_string(),
            };
            drop(reservation);

            failures += 1;
            if !policy.allows(failures) {
                tracing::warn!(
                    tier = %shared.tier,
                    endpoint = %endpoint.addr(),
                    failures,
                    error = %error,
                    "Warm-up giving up"
                );
                break;
            }
            let delay = policy.delay(failures);
            tracing::warn!(
                tier = %shared.tier,
                endpoint = %endpoint.addr(),
                error = %error,
                retry_in_ms = delay.as_millis() as u64,
                "Warm-up connect failed"
            );
            tokio::time::sleep(delay).await;
        }

        if opened > 0 {
            tracing::info!(
                tier = %shared.tier,
                endpoint = %endpoint.addr(),
                opened,
                "Endpoint warmed"
            );
        }
        opened
    }

    /// Maintenance: close idle links beyond `max_idle` and those past the idle
    /// timeout, least recently used first, never going below `min_alive` links on
    /// Active endpoints. Returns the number closed.
    pub fn shrink(&self) -> usize {
        let shared = &self.shared;
        let snapshot = shared.registry.snapshot(shared.tier);
        let doomed = {
            let mut state = shared.lock();
            let mut doomed = Vec::new();
            let mut alive_active: usize = snapshot
                .iter()
                .filter(|e| e.is_active())
                .map(|e| e.in_use() + e.idle())
                .sum();
            let floor = shared.config.min_alive;

            while state.idle.len() > shared.config.max_idle && alive_active > floor {
                match state.idle.pop_front() {
                    Some(slot) => {
                        slot.endpoint.add_idle(-1);
                        alive_active = alive_active.saturating_sub(1);
                        doomed.push((slot, "max_idle"));
                    }
                    None => break,
                }
            }

            let now = StdInstant::now();
            while alive_active > floor {
                let expired = state
                    .idle
                    .front()
                    .map(|slot| now.duration_since(slot.last_used) >= shared.config.idle_timeout)
                    .unwrap_or(false);
                if !expired {
                    break;
                }
                if let Some(slot) = state.idle.pop_front() {
                    slot.endpoint.add_idle(-1);
                    alive_active = alive_active.saturating_sub(1);
                    doomed.push((slot, "idle_timeout"));
                }
            }
            doomed
        };

        let closed = doomed.len();
        if closed > 0 {
            tracing::debug!(tier = %shared.tier, closed, "Shrunk idle connections");
            shared.close_all(doomed);
            shared.available.notify_waiters();
        }
        closed
    }

    /// Stop issuing `endpoint`. Idle links to it close now; borrowed ones close on
    /// release, and the last one moves the endpoint to Removed.
    pub fn drain(&self, endpoint: &Arc<Endpoint>) -> DrainOutcome {
        let shared = &self.shared;
        let (outcome, doomed) = {
            let mut state = shared.lock();
            if endpoint.state() == EndpointState::Removed {
                return DrainOutcome::AlreadyRemoved;
            }
            endpoint.transition(EndpointState::Active, EndpointState::Draining);

            let mut doomed = Vec::new();
            let mut kept = VecDeque::with_capacity(state.idle.len());
            for slot in state.idle.drain(..) {
                if Arc::ptr_eq(&slot.endpoint, endpoint) {
                    slot.endpoint.add_idle(-1);
                    doomed.push((slot, "endpoint_draining"));
                } else {
                    kept.push_back(slot);
                }
            }
            state.idle = kept;

            shared.retire_if_drained(endpoint);
            let outcome = if endpoint.state() == EndpointState::Removed {
                DrainOutcome::Removed
            } else {
                DrainOutcome::Draining {
                    in_flight: endpoint.in_use() + endpoint.opening(),
                }
            };
            (outcome, doomed)
        };

        shared.close_all(doomed);
        shared.available.notify_waiters();
        outcome
    }

    /// Put a Draining endpoint back into rotation. Fails if it already reached Removed.
    pub fn reactivate(&self, endpoint: &Arc<Endpoint>) -> bool {
        let _state = self.shared.lock();
        endpoint.transition(EndpointState::Draining, EndpointState::Active)
    }

    /// Refuse new borrows and close every idle link. Borrowed links close on release.
    pub fn close(&self) -> usize {
        let doomed: Vec<_> = {
            let mut state = self.shared.lock();
            state.closed = true;
            state
                .idle
                .drain(..)
                .map(|slot| {
                    slot.endpoint.add_idle(-1);
                    (slot, "shutdown")
                })
                .collect()
        };
        let closed = doomed.len();
        self.shared.close_all(doomed);
        self.shared.available.notify_waiters();
        closed
    }

    /// Close the pool and signal every holder of a borrowed link to give it up.
    /// Returns how many links were still borrowed.
    pub fn sever(&self) -> usize {
        self.close();
        let in_use = self.in_use();
        self.shared.severed.send_replace(true);
        if in_use > 0 {
            tracing::warn!(tier = %self.shared.tier, in_use, "Severing borrowed connections");
        }
        in_use
    }

    pub fn is_severed(&self) -> bool {
        self.shared.is_severed()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    pub fn in_use(&self) -> usize {
        self.shared.lock().in_use
    }

    pub fn stats(&self) -> PoolStats {
        let shared = &self.shared;
        let state = shared.lock();
        PoolStats {
            tier: shared.tier,
            alive: state.alive(),
            idle: state.idle.len(),
            in_use: state.in_use,
            opening: state.opening,
            min_alive: shared.config.min_alive,
            max_alive: shared.config.max_alive,
            max_idle: shared.config.max_idle,
            created_total: shared.created_total.load(Ordering::Relaxed),
            closed_total: shared.closed_total.load(Ordering::Relaxed),
            exhausted_total: shared.exhausted_total.load(Ordering::Relaxed),
            shutting_down: state.closed,
        }
    }
}
