//! libSQL backend: async `Database` trait implementation.
//!
//! Supports local file and in-memory databases.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::curriculum::model::{ContextSummary, Curriculum, UserKey, UserProgress, normalize_email};
use crate::error::DatabaseError;
use crate::scheduler::RunReport;
use crate::store::migrations;
use crate::store::traits::{Database, ProgressScan, UnitRecord};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        Ok(backend)
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn to_json<T: serde::Serialize>(value: &T, what: &str) -> Result<String, DatabaseError> {
    serde_json::to_string(value)
        .map_err(|e| DatabaseError::Serialization(format!("{what}: {e}")))
}

fn from_json<T: serde::de::DeserializeOwned>(s: &str, what: &str) -> Result<T, DatabaseError> {
    serde_json::from_str(s).map_err(|e| DatabaseError::Serialization(format!("{what}: {e}")))
}

fn query_err(op: &'static str) -> impl Fn(libsql::Error) -> DatabaseError {
    move |e| DatabaseError::Query(format!("{op}: {e}"))
}

/// Column order matches PROGRESS_COLUMNS:
/// 0:email, 1:topic, 2:units, 3:current_index, 4:paid, 5:last_advance_at,
/// 6:completed_links, 7:plan_url
fn row_to_progress(row: &libsql::Row) -> Result<UserProgress, DatabaseError> {
    let read = query_err("progress row");
    let email: String = row.get(0).map_err(&read)?;
    let topic: String = row.get(1).map_err(&read)?;
    let units_json: String = row.get(2).map_err(&read)?;
    let current_index: i64 = row.get(3).map_err(&read)?;
    let paid: i64 = row.get(4).map_err(&read)?;
    let last_advance: Option<String> = row.get::<String>(5).ok();
    let links_json: String = row.get(6).map_err(&read)?;
    let plan_url: Option<String> = row.get::<String>(7).ok();

    let units: Vec<String> = from_json(&units_json, "progress.units")?;
    let links: BTreeMap<usize, String> = from_json(&links_json, "progress.completed_links")?;
    let index = usize::try_from(current_index).map_err(|_| {
        DatabaseError::Serialization(format!("negative current_index for {email}/{topic}"))
    })?;

    UserProgress::restore(
        &email,
        Curriculum::new(topic, units),
        index,
        paid != 0,
        last_advance.as_deref().map(parse_datetime),
        links,
        plan_url,
    )
    .map_err(DatabaseError::Serialization)
}

/// 0:email, 1:topic, 2:summary, 3:covered_titles, 4:advance_count, 5:updated_at
fn row_to_context(row: &libsql::Row) -> Result<ContextSummary, DatabaseError> {
    let read = query_err("context row");
    let email: String = row.get(0).map_err(&read)?;
    let topic: String = row.get(1).map_err(&read)?;
    let summary: String = row.get(2).map_err(&read)?;
    let covered_json: String = row.get(3).map_err(&read)?;
    let count: i64 = row.get(4).map_err(&read)?;
    let updated: String = row.get(5).map_err(&read)?;

    let covered: BTreeSet<String> = from_json(&covered_json, "context.covered_titles")?;
    Ok(ContextSummary::new(
        UserKey::new(&email, &topic),
        &summary,
        covered,
        u32::try_from(count).unwrap_or_default(),
        parse_datetime(&updated),
    ))
}

/// 0:email, 1:topic, 2:unit_index, 3:title, 4:raw_text, 5:tokens, 6:published_url, 7:created_at
fn row_to_unit(row: &libsql::Row) -> Result<UnitRecord, DatabaseError> {
    let read = query_err("unit row");
    let unit_index: i64 = row.get(2).map_err(&read)?;
    let created: String = row.get(7).map_err(&read)?;
    Ok(UnitRecord {
        email: row.get(0).map_err(&read)?,
        topic: row.get(1).map_err(&read)?,
        unit_index: usize::try_from(unit_index).unwrap_or_default(),
        title: row.get(3).map_err(&read)?,
        raw_text: row.get(4).map_err(&read)?,
        tokens: row
            .get::<i64>(5)
            .ok()
            .and_then(|t| u32::try_from(t).ok()),
        published_url: row.get(6).map_err(&read)?,
        created_at: parse_datetime(&created),
    })
}

// ── Trait implementation ────────────────────────────────────────────

const PROGRESS_COLUMNS: &str =
    "email, topic, units, current_index, paid, last_advance_at, completed_links, plan_url";

const CONTEXT_COLUMNS: &str = "email, topic, summary, covered_titles, advance_count, updated_at";

const UNIT_COLUMNS: &str =
    "email, topic, unit_index, title, raw_text, tokens, published_url, created_at";

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Progress ────────────────────────────────────────────────────

    async fn find_progress(
        &self,
        email: &str,
        topic: &str,
    ) -> Result<Option<UserProgress>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {PROGRESS_COLUMNS} FROM progress WHERE email = ?1 AND topic = ?2"),
                params![normalize_email(email), topic],
            )
            .await
            .map_err(query_err("find_progress"))?;

        match rows.next().await.map_err(query_err("find_progress"))? {
            Some(row) => Ok(Some(row_to_progress(&row)?)),
            None => Ok(None),
        }
    }

    async fn upsert_progress(
        &self,
        progress: &UserProgress,
    ) -> Result<UserProgress, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let units = to_json(&progress.curriculum().units(), "progress.units")?;
        let links = to_json(progress.completed_links(), "progress.completed_links")?;
        let last_advance = progress.last_advance_time().map(|t| t.to_rfc3339());

        self.conn()
            .execute(
                "INSERT INTO progress (email, topic, units, current_index, paid, last_advance_at, completed_links, plan_url, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
                 ON CONFLICT(email, topic) DO UPDATE SET
                    current_index = excluded.current_index,
                    last_advance_at = excluded.last_advance_at,
                    completed_links = excluded.completed_links,
                    plan_url = COALESCE(excluded.plan_url, progress.plan_url),
                    updated_at = excluded.updated_at
                 WHERE excluded.current_index >= progress.current_index",
                params![
                    progress.email(),
                    progress.topic(),
                    units,
                    progress.current_index() as i64,
                    i64::from(progress.paid()),
                    opt_text(last_advance.as_deref()),
                    links,
                    opt_text(progress.plan_url()),
                    now,
                ],
            )
            .await
            .map_err(query_err("upsert_progress"))?;

        debug!(
            email = %progress.email(),
            topic = %progress.topic(),
            index = progress.current_index(),
            "Progress upserted"
        );

        self.find_progress(progress.email(), progress.topic())
            .await?
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "progress".into(),
                id: progress.key().to_string(),
            })
    }

    async fn scan_progress(&self) -> Result<ProgressScan, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {PROGRESS_COLUMNS} FROM progress ORDER BY email, topic"),
                (),
            )
            .await
            .map_err(query_err("scan_progress"))?;

        let mut scan = ProgressScan::default();
        while let Some(row) = rows.next().await.map_err(query_err("scan_progress"))? {
            match row_to_progress(&row) {
                Ok(p) => scan.rows.push(p),
                Err(e) => {
                    let email = row.get::<String>(0).unwrap_or_default();
                    let topic = row.get::<String>(1).unwrap_or_default();
                    warn!(email = %email, topic = %topic, error = %e, "Unreadable progress row");
                    scan.unreadable
                        .push((UserKey::new(&email, &topic), e.to_string()));
                }
            }
        }
        Ok(scan)
    }

    async fn set_paid(&self, email: &str, topic: &str, paid: bool) -> Result<bool, DatabaseError> {
        let count = self
            .conn()
            .execute(
                "UPDATE progress SET paid = ?1, updated_at = ?2 WHERE email = ?3 AND topic = ?4",
                params![
                    i64::from(paid),
                    Utc::now().to_rfc3339(),
                    normalize_email(email),
                    topic
                ],
            )
            .await
            .map_err(query_err("set_paid"))?;

        if count > 0 {
            info!(email, topic, paid, "Payment status updated");
        }
        Ok(count > 0)
    }

    // ── Context summaries ───────────────────────────────────────────

    async fn get_context(
        &self,
        email: &str,
        topic: &str,
    ) -> Result<Option<ContextSummary>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {CONTEXT_COLUMNS} FROM context_summaries WHERE email = ?1 AND topic = ?2"
                ),
                params![normalize_email(email), topic],
            )
            .await
            .map_err(query_err("get_context"))?;

        match rows.next().await.map_err(query_err("get_context"))? {
            Some(row) => Ok(Some(row_to_context(&row)?)),
            None => Ok(None),
        }
    }

    async fn save_context(&self, summary: &ContextSummary) -> Result<(), DatabaseError> {
        let covered = to_json(&summary.covered_titles, "context.covered_titles")?;
        self.conn()
            .execute(
                "INSERT INTO context_summaries (email, topic, summary, covered_titles, advance_count, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(email, topic) DO UPDATE SET
                    summary = excluded.summary,
                    covered_titles = excluded.covered_titles,
                    advance_count = excluded.advance_count,
                    updated_at = excluded.updated_at",
                params![
                    summary.key.email.as_str(),
                    summary.key.topic.as_str(),
                    summary.summary_text(),
                    covered,
                    i64::from(summary.advance_count),
                    summary.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(query_err("save_context"))?;

        debug!(key = %summary.key, count = summary.advance_count, "Context summary saved");
        Ok(())
    }

    // ── History ─────────────────────────────────────────────────────

    async fn record_plan(
        &self,
        email: &str,
        topic: &str,
        raw_text: &str,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO plan_history (id, email, topic, raw_text, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    Uuid::new_v4().to_string(),
                    normalize_email(email),
                    topic,
                    raw_text,
                    Utc::now().to_rfc3339(),
                ],
            )
            .await
            .map_err(query_err("record_plan"))?;
        Ok(())
    }

    async fn record_unit(&self, record: &UnitRecord) -> Result<(), DatabaseError> {
        let tokens = match record.tokens {
            Some(t) => libsql::Value::Integer(i64::from(t)),
            None => libsql::Value::Null,
        };
        self.conn()
            .execute(
                "INSERT INTO unit_history (id, email, topic, unit_index, title, raw_text, tokens, published_url, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    Uuid::new_v4().to_string(),
                    normalize_email(&record.email),
                    record.topic.as_str(),
                    record.unit_index as i64,
                    record.title.as_str(),
                    record.raw_text.as_str(),
                    tokens,
                    record.published_url.as_str(),
                    record.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(query_err("record_unit"))?;
        Ok(())
    }

    async fn unit_history(
        &self,
        email: &str,
        topic: &str,
    ) -> Result<Vec<UnitRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {UNIT_COLUMNS} FROM unit_history WHERE email = ?1 AND topic = ?2 ORDER BY created_at ASC, unit_index ASC"
                ),
                params![normalize_email(email), topic],
            )
            .await
            .map_err(query_err("unit_history"))?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err("unit_history"))? {
            out.push(row_to_unit(&row)?);
        }
        Ok(out)
    }

    async fn record_run(&self, report: &RunReport) -> Result<(), DatabaseError> {
        let errors: Vec<(String, &str)> = report
            .errors
            .iter()
            .map(|(key, msg)| (key.to_string(), msg.as_str()))
            .collect();
        let errors = to_json(&errors, "sweep_runs.errors")?;

        self.conn()
            .execute(
                "INSERT INTO sweep_runs (id, started_at, finished_at, processed, advanced, skipped, errors)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    report.run_id.to_string(),
                    report.started_at.to_rfc3339(),
                    report.finished_at.to_rfc3339(),
                    report.processed as i64,
                    report.advanced as i64,
                    report.skipped as i64,
                    errors,
                ],
            )
            .await
            .map_err(query_err("record_run"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curriculum::advance;

    async fn test_db() -> LibSqlBackend {
        LibSqlBackend::new_memory().await.unwrap()
    }

    fn fresh(email: &str, topic: &str) -> UserProgress {
        UserProgress::new(
            email,
            Curriculum::new(topic, vec!["Intro".into(), "Variables".into(), "Loops".into()]),
            false,
        )
    }

    // ── Progress tests ──────────────────────────────────────────────

    #[tokio::test]
    async fn upsert_and_find_roundtrip() {
        let db = test_db().await;
        let progress = advance(&fresh("A@Example.com", "Rust"), 0, "https://x/0", Utc::now())
            .into_progress();

        let stored = db.upsert_progress(&progress).await.unwrap();
        assert_eq!(stored.current_index(), 1);

        let found = db.find_progress("a@example.com", "Rust").await.unwrap().unwrap();
        assert_eq!(found.email(), "a@example.com");
        assert_eq!(found.curriculum().units(), progress.curriculum().units());
        assert_eq!(found.completed_links().get(&0).map(String::as_str), Some("https://x/0"));
        assert!(found.last_advance_time().is_some());
        assert!(found.check_invariants().is_ok());
    }

    #[tokio::test]
    async fn find_missing_is_none() {
        let db = test_db().await;
        assert!(db.find_progress("x@y.z", "Go").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stale_upsert_does_not_lower_index() {
        let db = test_db().await;
        let start = fresh("a@b.c", "Rust");
        let ahead = advance(&start, 0, "u0", Utc::now()).into_progress();
        db.upsert_progress(&ahead).await.unwrap();

        let stored = db.upsert_progress(&start).await.unwrap();
        assert_eq!(stored.current_index(), 1);
        assert_eq!(stored.completed_links().len(), 1);
    }

    #[tokio::test]
    async fn upsert_keeps_paid_flag() {
        let db = test_db().await;
        let start = fresh("a@b.c", "Rust");
        db.upsert_progress(&start).await.unwrap();
        assert!(db.set_paid("a@b.c", "Rust", true).await.unwrap());

        let next = advance(&start, 0, "u0", Utc::now()).into_progress();
        let stored = db.upsert_progress(&next).await.unwrap();
        assert!(stored.paid());
    }

    #[tokio::test]
    async fn set_paid_on_missing_row() {
        let db = test_db().await;
        assert!(!db.set_paid("no@one.x", "Rust", true).await.unwrap());
    }

    #[tokio::test]
    async fn list_is_ordered() {
        let db = test_db().await;
        db.upsert_progress(&fresh("b@x.y", "Rust")).await.unwrap();
        db.upsert_progress(&fresh("a@x.y", "Rust")).await.unwrap();
        db.upsert_progress(&fresh("a@x.y", "Go")).await.unwrap();

        let keys: Vec<String> = db
            .list_progress()
            .await
            .unwrap()
            .iter()
            .map(|p| p.key().to_string())
            .collect();
        assert_eq!(keys, vec!["a@x.y/Go", "a@x.y/Rust", "b@x.y/Rust"]);
    }

    #[tokio::test]
    async fn scan_reports_rows_that_break_invariants() {
        let db = test_db().await;
        db.upsert_progress(&fresh("a@x.y", "Rust")).await.unwrap();
        db.conn()
            .execute(
                "INSERT INTO progress (email, topic, units, current_index, completed_links) \
                 VALUES ('b@x.y', 'Go', '[\"Intro\"]', 5, '{}')",
                (),
            )
            .await
            .unwrap();

        let scan = db.scan_progress().await.unwrap();
        assert_eq!(scan.rows.len(), 1);
        assert_eq!(scan.unreadable.len(), 1);
        assert_eq!(scan.unreadable[0].0, UserKey::new("b@x.y", "Go"));
        assert_eq!(db.list_progress().await.unwrap().len(), 1);
    }

    // ── Context tests ───────────────────────────────────────────────

    #[tokio::test]
    async fn context_save_and_replace() {
        let db = test_db().await;
        let key = UserKey::new("a@b.c", "Rust");
        let mut summary = ContextSummary::new(
            key.clone(),
            "first",
            BTreeSet::from(["Intro".to_string()]),
            1,
            Utc::now(),
        );
        db.save_context(&summary).await.unwrap();

        summary.set_summary_text("second");
        summary.covered_titles.insert("Variables".into());
        summary.advance_count = 2;
        db.save_context(&summary).await.unwrap();

        let loaded = db.get_context("a@b.c", "Rust").await.unwrap().unwrap();
        assert_eq!(loaded.summary_text(), "second");
        assert_eq!(loaded.covered_titles.len(), 2);
        assert_eq!(loaded.advance_count, 2);
        assert!(db.get_context("a@b.c", "Go").await.unwrap().is_none());
    }

    // ── History tests ───────────────────────────────────────────────

    #[tokio::test]
    async fn unit_history_roundtrip() {
        let db = test_db().await;
        let record = UnitRecord {
            email: "a@b.c".into(),
            topic: "Rust".into(),
            unit_index: 0,
            title: "Intro".into(),
            raw_text: "raw".into(),
            tokens: Some(1234),
            published_url: "https://x/0".into(),
            created_at: Utc::now(),
        };
        db.record_unit(&record).await.unwrap();
        db.record_plan("a@b.c", "Rust", "1. Intro").await.unwrap();

        let history = db.unit_history("a@b.c", "Rust").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].tokens, Some(1234));
        assert_eq!(history[0].title, "Intro");
    }

    #[tokio::test]
    async fn record_run_persists_counts() {
        let db = test_db().await;
        let mut report = RunReport::new(Utc::now());
        report.processed = 2;
        report.advanced = 1;
        report.errors.push((UserKey::new("a@b.c", "Rust"), "boom".into()));
        report.finish(Utc::now());
        db.record_run(&report).await.unwrap();

        let mut rows = db
            .conn()
            .query("SELECT processed, advanced, errors FROM sweep_runs", ())
            .await
            .unwrap();
        let row = rows.next().await.unwrap().unwrap();
        assert_eq!(row.get::<i64>(0).unwrap(), 2);
        assert_eq!(row.get::<i64>(1).unwrap(), 1);
        assert!(row.get::<String>(2).unwrap().contains("a@b.c/Rust"));
    }
}
