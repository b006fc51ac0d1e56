//! Backend endpoint record.
//!
//! # Responsibilities
//! - Represent a single backend address within a tier
//! - Track lifecycle state (Active → Draining → Removed)
//! - Mirror per-endpoint connection counts for lock-free reporting
//!
//! State transitions and counter updates happen while the owning pool's
//! critical section is held; the atomics only make reads cheap.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::time::Instant;

use super::Tier;

/// Lifecycle state of an endpoint.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
    Active = 0,
    Draining = 1,
    Removed = 2,
}

impl From<u8> for EndpointState {
    fn from(val: u8) -> Self {
        match val {
            0 => EndpointState::Active,
            1 => EndpointState::Draining,
            _ => EndpointState::Removed,
        }
    }
}

impl EndpointState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointState::Active => "active",
            EndpointState::Draining => "draining",
            EndpointState::Removed => "removed",
        }
    }
}

/// A single backend address in a tier.
#[derive(Debug)]
pub struct Endpoint {
    addr: String,
    tier: Tier,
    state: AtomicU8,
    /// Connections currently borrowed by sessions.
    in_use: AtomicUsize,
    /// Connections parked in the pool's idle list.
    idle: AtomicUsize,
    /// Connections being opened (reserved capacity).
    opening: AtomicUsize,
    /// Logical creation stamp of the most recent connection (0 = never).
    last_created: AtomicU64,
    /// A warm-up loop is running for this endpoint.
    warming: AtomicBool,
    added_at: Instant,
}

impl Endpoint {
    /// Create a new Active endpoint.
    pub fn new(addr: impl Into<String>, tier: Tier) -> Self {
        Self {
            addr: addr.into(),
            tier,
            state: AtomicU8::new(EndpointState::Active as u8),
            in_use: AtomicUsize::new(0),
            idle: AtomicUsize::new(0),
            opening: AtomicUsize::new(0),
            last_created: AtomicU64::new(0),
            warming: AtomicBool::new(false),
            added_at: Instant::now(),
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn state(&self) -> EndpointState {
        EndpointState::from(self.state.load(Ordering::Acquire))
    }

    pub fn is_active(&self) -> bool {
        self.state() == EndpointState::Active
    }

    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Relaxed)
    }

    pub fn idle(&self) -> usize {
        self.idle.load(Ordering::Relaxed)
    }

    pub fn opening(&self) -> usize {
        self.opening.load(Ordering::Relaxed)
    }

    /// Connections (established or being opened) that still reference this endpoint.
    pub fn references(&self) -> usize {
        self.in_use() + self.idle() + self.opening()
    }

    pub fn last_created(&self) -> u64 {
        self.last_created.load(Ordering::Relaxed)
    }

    pub fn added_at(&self) -> Instant {
        self.added_at
    }

    /// Compare-and-swap the lifecycle state. Returns false if `from` no longer holds.
    pub(crate) fn transition(&self, from: EndpointState, to: EndpointState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_warming(&self) -> bool {
        self.warming.load(Ordering::Acquire)
    }

    /// Claim the endpoint's single warm-up slot. `None` while another warm-up runs.
    pub(crate) fn begin_warm(&self) -> Option<WarmGuard<'_>> {
        self.warming
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| WarmGuard { endpoint: self })
    }

    pub(crate) fn stamp_created(&self, stamp: u64) {
        self.last_created.store(stamp, Ordering::Relaxed);
    }

    pub(crate) fn add_in_use(&self, delta: isize) {
        apply_delta(&self.in_use, delta);
    }

    pub(crate) fn add_idle(&self, delta: isize) {
        apply_delta(&self.idle, delta);
    }

    pub(crate) fn add_opening(&self, delta: isize) {
        apply_delta(&self.opening, delta);
    }
}

fn apply_delta(counter: &AtomicUsize, delta: isize) {
    if delta >= 0 {
        counter.fetch_add(delta as usize, Ordering::Relaxed);
    } else {
        counter.fetch_sub(delta.unsigned_abs(), Ordering::Relaxed);
    }
}

/// Releases the warm-up slot when the warm-up loop ends or is cancelled.
pub(crate) struct WarmGuard<'a> {
    endpoint: &'a Endpoint,
}

impl Drop for WarmGuard<'_> {
    fn drop(&mut self) {
        self.endpoint.warming.store(false, Ordering::Release);
    }
}
