use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::curriculum::model::UserKey;

/// Aggregate result of one sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Every progress row visited.
    pub processed: usize,
    pub advanced: usize,
    pub skipped: usize,
    pub errors: Vec<(UserKey, String)>,
}

impl RunReport {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at,
            finished_at: started_at,
            processed: 0,
            advanced: 0,
            skipped: 0,
            errors: Vec::new(),
        }
    }

    pub fn finish(&mut self, at: DateTime<Utc>) {
        self.finished_at = at;
    }

    /// Rows that did not end in an error (advanced or skipped).
    pub fn succeeded(&self) -> usize {
        self.processed.saturating_sub(self.errors.len())
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}
