//! Failure-threshold hysteresis.
//!
//! A target is reported `up` until `threshold` consecutive checks have
//! failed. A failing target still under the threshold is in the warning
//! sub-state: `up` with a nonzero failure counter. One success clears it.

use crate::db::TargetStatus;

/// Persisted state a check starts from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckState {
    pub status: TargetStatus,
    pub failure_counter: u32,
    pub threshold: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Evaluation {
    pub status: TargetStatus,
    pub failure_counter: u32,
    /// The target answered, so its last-seen-up time moves to now.
    pub seen_up: bool,
}

impl Evaluation {
    pub fn is_warning(&self) -> bool {
        self.status.is_up() && self.failure_counter > 0
    }
}

pub fn evaluate(prev: CheckState, success: bool) -> Evaluation {
    if success {
        return Evaluation {
            status: TargetStatus::Up,
            failure_counter: 0,
            seen_up: true,
        };
    }

    let failure_counter = prev.failure_counter.saturating_add(1);
    let status = if failure_counter < prev.threshold.max(1) {
        TargetStatus::Up
    } else {
        TargetStatus::Down
    };
    Evaluation {
        status,
        failure_counter,
        seen_up: false,
    }
}
