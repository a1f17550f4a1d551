//! Vote tallying.

use fabric_api::Policy;
use std::fmt;

/// Outcome of a tally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verdict {
    Approved,
    Rejected,
    /// Not decided yet; more votes could still swing it either way.
    Pending,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Votes needed for a MAJORITY among `candidates`.
pub fn majority_of(candidates: usize) -> usize {
    candidates / 2 + 1
}

/// Evaluate `policy` over a tally. A policy is rejected as soon as the
/// remaining undecided votes can no longer make it pass.
pub fn evaluate(policy: Policy, approvals: usize, rejections: usize, candidates: usize) -> Verdict {
    if candidates == 0 {
        return Verdict::Rejected;
    }
    let approvals = approvals.min(candidates);
    let rejections = rejections.min(candidates - approvals);
    let need = match policy {
        Policy::All => candidates,
        Policy::One => 1,
        Policy::Majority => majority_of(candidates),
    };
    if approvals >= need {
        Verdict::Approved
    } else if candidates - rejections < need {
        Verdict::Rejected
    } else {
        Verdict::Pending
    }
}
