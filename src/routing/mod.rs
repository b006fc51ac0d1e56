//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Statement text (from the protocol codec)
//!     → classifier.rs (keyword inspection → StatementClass)
//!     → router.rs (class + session affinity → Tier)
//!     → pool manager borrow on that tier
//! ```
//!
//! # Design Decisions
//! - Classification is syntactic only; unknown statements are ReadWrite
//! - Routing is statement-driven, never tenant-driven
//! - Affinity is set before a transaction's first statement executes, so every
//!   later statement (reads included) stays on one admin connection
//! - Deterministic: same statement and affinity always yield the same tier

pub mod classifier;
pub mod router;

pub use classifier::{classify, StatementClass};
pub use router::{Affinity, Router};
