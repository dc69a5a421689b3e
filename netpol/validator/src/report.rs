use serde::Serialize;
use std::collections::BTreeSet;

/// The aggregated result of validating one provider's catalogue.
#[derive(Clone, Debug, Serialize)]
pub struct Report {
    pub provider: String,
    /// Unset when a shutdown stopped outstanding checks early.
    pub complete: bool,
    pub checks: Vec<PodCheck>,
}

#[derive(Clone, Debug, Serialize)]
pub struct PodCheck {
    pub pod: String,
    pub outcome: Outcome,
}

/// The result of one per-pod check. An inconclusive query is a distinct
/// outcome from a passing one.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "result")]
pub enum Outcome {
    Passed,
    Mismatch {
        /// Names expected for the pod but absent from the cluster.
        missing: BTreeSet<String>,
        /// Names selecting the pod that it never declared.
        unexpected: BTreeSet<String>,
    },
    QueryFailed {
        reason: String,
    },
}

// === impl Report ===

impl Report {
    /// True only for a complete run in which every check passed.
    pub fn passed(&self) -> bool {
        self.complete && self.checks.iter().all(|c| c.outcome == Outcome::Passed)
    }

    pub fn mismatches(&self) -> impl Iterator<Item = &PodCheck> {
        self.checks
            .iter()
            .filter(|c| matches!(c.outcome, Outcome::Mismatch { .. }))
    }

    pub fn query_failures(&self) -> impl Iterator<Item = &PodCheck> {
        self.checks
            .iter()
            .filter(|c| matches!(c.outcome, Outcome::QueryFailed { .. }))
    }
}
