//! Gating policy: may the next unit be generated for this progress row?
//!
//! Pure functions over a progress snapshot. Evaluated fresh on every sweep.

use std::fmt;

use chrono::{DateTime, Utc};

use super::model::UserProgress;

/// Outcome of an eligibility check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    Eligible,
    /// Every unit has been delivered.
    Complete,
    /// Past the free units and not paid.
    PaymentRequired,
    /// Already advanced earlier today (only with the daily throttle on).
    Throttled,
}

impl Eligibility {
    pub fn is_eligible(self) -> bool {
        self == Eligibility::Eligible
    }

    /// Stable reason string for logs and reports.
    pub fn reason(self) -> &'static str {
        match self {
            Eligibility::Eligible => "eligible",
            Eligibility::Complete => "complete",
            Eligibility::PaymentRequired => "payment_required",
            Eligibility::Throttled => "throttled",
        }
    }
}

impl fmt::Display for Eligibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.reason())
    }
}

/// Completion and payment gating only.
pub fn is_eligible(progress: &UserProgress, free_unit_threshold: usize) -> Eligibility {
    if progress.current_index() >= progress.curriculum().len() {
        Eligibility::Complete
    } else if progress.current_index() < free_unit_threshold {
        Eligibility::Eligible
    } else if progress.paid() {
        Eligibility::Eligible
    } else {
        Eligibility::PaymentRequired
    }
}

/// Eligibility settings applied by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EligibilityPolicy {
    pub free_unit_threshold: usize,
    pub daily_throttle: bool,
}

impl EligibilityPolicy {
    pub fn new(free_unit_threshold: usize) -> Self {
        Self {
            free_unit_threshold,
            daily_throttle: false,
        }
    }

    pub fn with_daily_throttle(mut self, enabled: bool) -> Self {
        self.daily_throttle = enabled;
        self
    }

    pub fn evaluate(&self, progress: &UserProgress, now: DateTime<Utc>) -> Eligibility {
        let base = is_eligible(progress, self.free_unit_threshold);
        if base.is_eligible()
            && self.daily_throttle
            && progress
                .last_advance_time()
                .is_some_and(|last| last.date_naive() == now.date_naive())
        {
            return Eligibility::Throttled;
        }
        base
    }
}
