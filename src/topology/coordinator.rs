//! Topology coordinator.
//!
//! Single consumer of the topology channel. Events are applied strictly in
//! arrival order; a conflicting event is re-applied before the next one is
//! looked at, so an Add followed by a Remove for the same address can never
//! swap places.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};

use crate::backend::Connector;
use crate::pool::PoolManager;
use super::{TopologyError, TopologyEvent};

/// Producer side of the topology channel.
pub type TopologySender = mpsc::Sender<TopologyEvent>;

/// How many times a conflicting event is re-applied before it is dropped.
const MAX_APPLY_ATTEMPTS: u32 = 3;

pub struct Coordinator<C: Connector> {
    manager: Arc<PoolManager<C>>,
    events: mpsc::Receiver<TopologyEvent>,
}

impl<C: Connector> Coordinator<C> {
    /// Create a coordinator and the sender all event producers share.
    pub fn new(manager: Arc<PoolManager<C>>, capacity: usize) -> (Self, TopologySender) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { manager, events: rx }, tx)
    }

    /// Consume events until shutdown or until every sender is gone.
    /// Returns the number of events applied.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> u64 {
        let mut applied = 0u64;
        loop {
            tokio::select! {
                event = self.events.recv() => match event {
                    Some(event) => {
                        if self.apply(&event).await {
                            applied += 1;
                        }
                    }
                    None => {
                        tracing::info!("Topology channel closed");
                        break;
                    }
                },
                _ = shutdown.recv() => {
                    tracing::debug!("Topology coordinator stopping");
                    break;
                }
            }
        }
        applied
    }

    /// Apply one event, re-applying on conflict.
    pub async fn apply(&self, event: &TopologyEvent) -> bool {
        let mut attempt = 1;
        loop {
            match self.manager.apply_topology(event).await {
                Ok(_) => return true,
                Err(TopologyError::TopologyApplyConflict { .. }) if attempt < MAX_APPLY_ATTEMPTS => {
                    tracing::debug!(event = %event, attempt, "Re-applying topology event after conflict");
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(event = %event, error = %e, "Dropping topology event after repeated conflicts");
                    return false;
                }
            }
        }
    }
}
