//! Live backend topology.
//!
//! # Data Flow
//! ```text
//! discovery.rs (JSON-lines feed) ─┐
//! config watcher (endpoint diff) ─┼→ mpsc channel → coordinator.rs
//! admin API (POST /admin/topology)┘       → PoolManager::apply_topology (serialized per tier)
//! ```
//!
//! # Design Decisions
//! - Every producer feeds one channel, so events reach the pool manager in arrival order
//! - Application is idempotent: at-least-once delivery from the transport is harmless
//! - A conflict (endpoint retired while being re-added) is retried, never fatal

pub mod coordinator;
pub mod discovery;

pub use coordinator::{Coordinator, TopologySender};
pub use discovery::DiscoveryFeed;

use std::fmt;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::Tier;

/// What happened to an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopologyEventKind {
    EndpointAdded,
    EndpointRemoved,
    NodeDraining,
}

impl TopologyEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TopologyEventKind::EndpointAdded => "endpoint_added",
            TopologyEventKind::EndpointRemoved => "endpoint_removed",
            TopologyEventKind::NodeDraining => "node_draining",
        }
    }
}

/// A change to the set of live backend endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyEvent {
    pub kind: TopologyEventKind,
    pub tier: Tier,
    pub address: String,
}

impl TopologyEvent {
    pub fn added(tier: Tier, address: impl Into<String>) -> Self {
        Self {
            kind: TopologyEventKind::EndpointAdded,
            tier,
            address: address.into(),
        }
    }

    pub fn removed(tier: Tier, address: impl Into<String>) -> Self {
        Self {
            kind: TopologyEventKind::EndpointRemoved,
            tier,
            address: address.into(),
        }
    }

    pub fn draining(tier: Tier, address: impl Into<String>) -> Self {
        Self {
            kind: TopologyEventKind::NodeDraining,
            tier,
            address: address.into(),
        }
    }
}

impl fmt::Display for TopologyEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.kind.as_str(), self.tier, self.address)
    }
}

/// Effect of applying one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TopologyOutcome {
    /// New Active endpoint registered, warm-up started.
    Added,
    /// A Draining endpoint was put back into rotation.
    Reactivated,
    /// Nothing to do (already in the requested state, or unknown endpoint).
    Unchanged,
    /// Retiring; borrowed links still reference it.
    Draining { in_flight: usize },
    /// Retired with no links left.
    Removed,
    /// Removal refused: it was the tier's last Active endpoint.
    KeptStale,
}

impl TopologyOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TopologyOutcome::Added => "added",
            TopologyOutcome::Reactivated => "reactivated",
            TopologyOutcome::Unchanged => "unchanged",
            TopologyOutcome::Draining { .. } => "draining",
            TopologyOutcome::Removed => "removed",
            TopologyOutcome::KeptStale => "kept_stale",
        }
    }
}

#[derive(Debug, Error)]
pub enum TopologyError {
    /// The endpoint changed state underneath the apply path; re-apply the event.
    #[error("topology apply conflict on {tier} endpoint {address}")]
    TopologyApplyConflict { tier: Tier, address: String },
}

/// Translate two endpoint lists into the events that turn `previous` into `next`.
///
/// Additions come first so a replaced endpoint never leaves the tier empty.
pub fn diff_endpoints(tier: Tier, previous: &[String], next: &[String]) -> Vec<TopologyEvent> {
    let added = next
        .iter()
        .filter(|addr| !previous.contains(addr))
        .map(|addr| TopologyEvent::added(tier, addr.clone()));
    let removed = previous
        .iter()
        .filter(|addr| !next.contains(addr))
        .map(|addr| TopologyEvent::removed(tier, addr.clone()));
    added.chain(removed).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_wire_format() {
        let json = r#"{"kind":"node_draining","tier":"readonly","address":"10.0.0.7:5432"}"#;
        let event: TopologyEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event, TopologyEvent::draining(Tier::Readonly, "10.0.0.7:5432"));
    }

    #[test]
    fn diff_adds_before_removes() {
        let previous = vec!["a:1".to_string(), "b:1".to_string()];
        let next = vec!["b:1".to_string(), "c:1".to_string()];

        let events = diff_endpoints(Tier::Admin, &previous, &next);
        assert_eq!(
            events,
            vec![
                TopologyEvent::added(Tier::Admin, "c:1"),
                TopologyEvent::removed(Tier::Admin, "a:1"),
            ]
        );
        assert!(diff_endpoints(Tier::Admin, &next, &next).is_empty());
    }
}
