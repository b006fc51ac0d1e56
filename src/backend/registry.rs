//! Endpoint registry.
//!
//! Holds the known endpoints per tier as an immutable list behind `ArcSwap`.
//! Writers (the pool manager's serialized topology path and its maintenance
//! pass) publish a new list; readers grab a snapshot and never observe a list
//! changing underneath them.

use std::sync::Arc;
use arc_swap::ArcSwap;

use super::{Endpoint, EndpointState, Tier};

pub type EndpointSnapshot = Arc<Vec<Arc<Endpoint>>>;

#[derive(Debug)]
pub struct EndpointRegistry {
    tiers: [ArcSwap<Vec<Arc<Endpoint>>>; 2],
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self {
            tiers: [
                ArcSwap::from_pointee(Vec::new()),
                ArcSwap::from_pointee(Vec::new()),
            ],
        }
    }

    /// Consistent view of a tier's endpoints.
    pub fn snapshot(&self, tier: Tier) -> EndpointSnapshot {
        self.tiers[tier.index()].load_full()
    }

    /// Look up an endpoint record by address.
    pub fn get(&self, tier: Tier, addr: &str) -> Option<Arc<Endpoint>> {
        self.tiers[tier.index()]
            .load()
            .iter()
            .find(|e| e.addr() == addr)
            .cloned()
    }

    /// Number of Active endpoints in a tier.
    pub fn active_count(&self, tier: Tier) -> usize {
        self.tiers[tier.index()]
            .load()
            .iter()
            .filter(|e| e.is_active())
            .count()
    }

    /// Publish `endpoint`, replacing any record with the same address.
    pub(crate) fn insert(&self, endpoint: Arc<Endpoint>) {
        self.tiers[endpoint.tier().index()].rcu(|current| {
            let mut next: Vec<Arc<Endpoint>> = current
                .iter()
                .filter(|e| e.addr() != endpoint.addr())
                .cloned()
                .collect();
            next.push(endpoint.clone());
            next
        });
    }

    /// Drop records that reached Removed. Returns how many were pruned.
    pub(crate) fn prune_removed(&self, tier: Tier) -> usize {
        let before = self.tiers[tier.index()].load().len();
        self.tiers[tier.index()].rcu(|current| {
            current
                .iter()
                .filter(|e| e.state() != EndpointState::Removed)
                .cloned()
                .collect::<Vec<_>>()
        });
        before.saturating_sub(self.tiers[tier.index()].load().len())
    }
}

impl Default for EndpointRegistry {
    fn default() -> Self {
        Self::new()
    }
}
