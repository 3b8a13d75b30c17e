//! The `Database` trait: progress store, context summaries, and history.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::curriculum::model::{ContextSummary, UserKey, UserProgress};
use crate::error::DatabaseError;
use crate::scheduler::RunReport;

/// One generated unit, kept for auditing. Token counts are telemetry only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitRecord {
    pub email: String,
    pub topic: String,
    pub unit_index: usize,
    pub title: String,
    pub raw_text: String,
    pub tokens: Option<u32>,
    pub published_url: String,
    pub created_at: DateTime<Utc>,
}

/// Every progress row, split into loadable rows and rows that failed to load.
#[derive(Debug, Default)]
pub struct ProgressScan {
    /// Stable (email, topic) order.
    pub rows: Vec<UserProgress>,
    pub unreadable: Vec<(UserKey, String)>,
}

/// Backend-agnostic persistence.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Progress ────────────────────────────────────────────────────

    async fn find_progress(
        &self,
        email: &str,
        topic: &str,
    ) -> Result<Option<UserProgress>, DatabaseError>;

    /// Insert or update a progress row and return what is stored.
    ///
    /// A write carrying a lower `current_index` than the stored row is
    /// ignored. `paid` is only written on insert; use [`Database::set_paid`]
    /// to change it afterwards.
    async fn upsert_progress(&self, progress: &UserProgress)
    -> Result<UserProgress, DatabaseError>;

    /// Read every progress row. A row that fails its invariants is reported
    /// in `unreadable` instead of failing the whole scan.
    async fn scan_progress(&self) -> Result<ProgressScan, DatabaseError>;

    /// Loadable progress rows in a stable (email, topic) order.
    async fn list_progress(&self) -> Result<Vec<UserProgress>, DatabaseError> {
        Ok(self.scan_progress().await?.rows)
    }

    /// Returns `false` when no such row exists.
    async fn set_paid(&self, email: &str, topic: &str, paid: bool) -> Result<bool, DatabaseError>;

    // ── Context summaries ───────────────────────────────────────────

    async fn get_context(
        &self,
        email: &str,
        topic: &str,
    ) -> Result<Option<ContextSummary>, DatabaseError>;

    async fn save_context(&self, summary: &ContextSummary) -> Result<(), DatabaseError>;

    // ── History ─────────────────────────────────────────────────────

    /// Keep the raw planner response for a new enrollment.
    async fn record_plan(&self, email: &str, topic: &str, raw_text: &str)
    -> Result<(), DatabaseError>;

    async fn record_unit(&self, record: &UnitRecord) -> Result<(), DatabaseError>;

    /// Unit history for one (email, topic), oldest first.
    async fn unit_history(&self, email: &str, topic: &str)
    -> Result<Vec<UnitRecord>, DatabaseError>;

    async fn record_run(&self, report: &RunReport) -> Result<(), DatabaseError>;
}
