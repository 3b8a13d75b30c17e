//! The single mutation path for a user's progression.

use chrono::{DateTime, Utc};
use tracing::debug;

use super::model::UserProgress;

/// Result of an advance attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdvanceOutcome {
    /// The unit was recorded and `current_index` moved forward by one.
    Advanced(UserProgress),
    /// `unit_index` did not match `current_index`; progress is unchanged.
    Stale(UserProgress),
}

impl AdvanceOutcome {
    pub fn progress(&self) -> &UserProgress {
        match self {
            AdvanceOutcome::Advanced(p) | AdvanceOutcome::Stale(p) => p,
        }
    }

    pub fn into_progress(self) -> UserProgress {
        match self {
            AdvanceOutcome::Advanced(p) | AdvanceOutcome::Stale(p) => p,
        }
    }

    pub fn is_advanced(&self) -> bool {
        matches!(self, AdvanceOutcome::Advanced(_))
    }
}

/// Record `published_url` for `unit_index` and move to the next unit.
///
/// Call only after the unit is durably published. A mismatched index (a
/// duplicate or stale attempt) is a no-op, never an error. Advancing past the
/// end of the curriculum is also a no-op.
pub fn advance(
    progress: &UserProgress,
    unit_index: usize,
    published_url: &str,
    now: DateTime<Utc>,
) -> AdvanceOutcome {
    if unit_index != progress.current_index() || progress.is_complete() {
        debug!(
            email = %progress.email(),
            topic = %progress.topic(),
            unit_index,
            current_index = progress.current_index(),
            "Ignoring stale advance attempt"
        );
        return AdvanceOutcome::Stale(progress.clone());
    }

    let mut next = progress.clone();
    next.record_completion(published_url.to_string(), now);
    AdvanceOutcome::Advanced(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curriculum::model::Curriculum;
    use proptest::prelude::*;

    fn fresh(units: usize) -> UserProgress {
        let titles = (0..units).map(|i| format!("Unit {i}")).collect();
        UserProgress::new("learner@example.com", Curriculum::new("Topic", titles), false)
    }

    #[test]
    fn advance_records_link_and_time() {
        let now = Utc::now();
        let out = advance(&fresh(3), 0, "https://pages/0", now);
        assert!(out.is_advanced());
        let progress = out.into_progress();
        assert_eq!(progress.current_index(), 1);
        assert_eq!(progress.completed_links().get(&0).map(String::as_str), Some("https://pages/0"));
        assert_eq!(progress.last_advance_time(), Some(now));
    }

    #[test]
    fn behind_index_is_a_noop() {
        let now = Utc::now();
        let one = advance(&fresh(3), 0, "u0", now).into_progress();
        let again = advance(&one, 0, "other", now);
        assert!(!again.is_advanced());
        assert_eq!(again.progress(), &one);
        assert_eq!(one.completed_links().get(&0).map(String::as_str), Some("u0"));
    }

    #[test]
    fn ahead_index_is_a_noop() {
        let progress = fresh(3);
        let out = advance(&progress, 2, "u2", Utc::now());
        assert_eq!(out.into_progress(), progress);
    }

    #[test]
    fn cannot_advance_past_end() {
        let now = Utc::now();
        let done = advance(&fresh(1), 0, "u0", now).into_progress();
        assert!(done.is_complete());
        let out = advance(&done, 1, "u1", now);
        assert!(!out.is_advanced());
        assert_eq!(out.progress().current_index(), 1);
    }

    proptest! {
        #[test]
        fn index_is_monotonic_and_links_gap_free(
            len in 0usize..12,
            attempts in proptest::collection::vec(0usize..14, 0..40),
        ) {
            let mut progress = fresh(len);
            let now = Utc::now();
            for idx in attempts {
                let before = progress.current_index();
                let before_links = progress.completed_links().clone();
                let out = advance(&progress, idx, &format!("u{idx}"), now);
                let advanced = out.is_advanced();
                progress = out.into_progress();

                prop_assert!(progress.current_index() >= before);
                prop_assert!(progress.current_index() <= len);
                prop_assert!(progress.check_invariants().is_ok());
                if idx < before {
                    prop_assert!(!advanced);
                    prop_assert_eq!(progress.completed_links(), &before_links);
                }
            }
        }
    }
}
