//! Endpoint selection within a tier.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::backend::Endpoint;

/// Picks which endpoint a borrow should be served from.
pub trait EndpointSelector: Send + Sync + std::fmt::Debug {
    fn select(&self, candidates: &[Arc<Endpoint>]) -> Option<Arc<Endpoint>>;
}

/// Least-recently-created first, round-robin among ties.
///
/// The endpoint whose most recent connection was created longest ago (or never)
/// wins. Endpoints sharing that stamp are rotated through with a counter so a
/// freshly warmed set of replicas is spread evenly.
#[derive(Debug, Default)]
pub struct LeastRecentlyCreated {
    counter: AtomicUsize,
}

impl LeastRecentlyCreated {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EndpointSelector for LeastRecentlyCreated {
    fn select(&self, candidates: &[Arc<Endpoint>]) -> Option<Arc<Endpoint>> {
        let oldest = candidates.iter().map(|e| e.last_created()).min()?;
        let tied: Vec<&Arc<Endpoint>> = candidates
            .iter()
            .filter(|e| e.last_created() == oldest)
            .collect();

        let turn = self.counter.fetch_add(1, Ordering::Relaxed);
        Some(tied[turn % tied.len()].clone())
    }
}
