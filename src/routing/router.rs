//! Tier selection.
//!
//! # Responsibilities
//! - Pick the tier for a classified statement
//! - Maintain transaction affinity on the session's behalf
//!
//! # Design Decisions
//! - Immutable and stateless (thread-safe without locks); all per-session state
//!   lives in the [`Affinity`] the caller passes in
//! - A stray `COMMIT` outside a transaction goes to admin, like any write

use serde::Serialize;

use crate::backend::Tier;
use crate::observability::metrics;
use super::classifier::{classify, StatementClass};

/// Session affinity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Affinity {
    #[default]
    Unpinned,
    /// Inside a transaction: every statement goes to the same admin connection.
    PinnedAdmin,
}

impl Affinity {
    pub fn is_pinned(&self) -> bool {
        matches!(self, Affinity::PinnedAdmin)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Affinity::Unpinned => "unpinned",
            Affinity::PinnedAdmin => "pinned_admin",
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Router;

impl Router {
    pub fn new() -> Self {
        Self
    }

    /// Tier for `class`, updating `affinity`.
    ///
    /// Pinning happens before the transaction's first statement runs; unpinning
    /// happens on the statement that ends it, which itself still runs on admin.
    pub fn route(&self, affinity: &mut Affinity, class: StatementClass) -> Tier {
        let tier = match (*affinity, class) {
            (Affinity::PinnedAdmin, StatementClass::TransactionEnd) => {
                *affinity = Affinity::Unpinned;
                Tier::Admin
            }
            (Affinity::PinnedAdmin, _) => Tier::Admin,
            (Affinity::Unpinned, StatementClass::TransactionStart) => {
                *affinity = Affinity::PinnedAdmin;
                Tier::Admin
            }
            (Affinity::Unpinned, StatementClass::ReadOnly) => Tier::Readonly,
            (Affinity::Unpinned, StatementClass::ReadWrite | StatementClass::TransactionEnd) => Tier::Admin,
        };
        metrics::record_statement(class.as_str(), tier);
        tier
    }

    /// Classify and route in one step.
    pub fn route_statement(&self, affinity: &mut Affinity, sql: &str) -> (StatementClass, Tier) {
        let class = classify(sql);
        (class, self.route(affinity, class))
    }
}
