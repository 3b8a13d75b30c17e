//! Batch driver: one sweep over every progress row.
//!
//! Per eligible user:
//! 1. Eligibility check (fresh every sweep)
//! 2. Generate the next unit, with the context summary when one exists
//! 3. Extract the quiz and sanitise the body
//! 4. Fold the unit into the context summary (failures absorbed)
//! 5. Publish the unit page
//! 6. Advance and commit progress, republish the curriculum index
//! 7. Queue the learner notification
//!
//! Users are processed one at a time. A failure in steps 2-6 is recorded
//! against that user and the sweep moves on.

mod cron;
mod guard;
mod report;

pub use cron::{next_cron_fire, spawn_cron_ticker};
pub use guard::{LocalSweepGuard, SweepGuard};
pub use report::RunReport;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::config::SchedulerConfig;
use crate::curriculum::model::{ContextSummary, UserProgress};
use crate::curriculum::{AdvanceOutcome, Eligibility, EligibilityPolicy, advance};
use crate::error::{Error, PipelineError};
use crate::notify::{Alerter, DeferredNotifications, Notifier, UnitNotice};
use crate::pipeline::{
    ContentGenerator, ContextAccumulator, render_plan_page, render_unit_page, split_unit,
};
use crate::publish::{Publisher, plan_path, unit_path};
use crate::store::{Database, UnitRecord};

/// Collaborators the scheduler drives. All injected; nothing global.
pub struct SchedulerDeps {
    pub store: Arc<dyn Database>,
    pub generator: ContentGenerator,
    pub accumulator: ContextAccumulator,
    pub publisher: Arc<dyn Publisher>,
    pub notifier: Arc<dyn Notifier>,
    pub alerter: Arc<dyn Alerter>,
}

/// What happened to one progress row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserOutcome {
    Advanced { index: usize, url: String },
    Skipped(Eligibility),
    /// The stored row moved on while this unit was being produced.
    Stale,
}

pub struct Scheduler {
    store: Arc<dyn Database>,
    generator: ContentGenerator,
    accumulator: ContextAccumulator,
    publisher: Arc<dyn Publisher>,
    alerter: Arc<dyn Alerter>,
    notifications: DeferredNotifications,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(deps: SchedulerDeps, config: SchedulerConfig) -> Self {
        Self {
            notifications: DeferredNotifications::new(deps.notifier, config.notify_delay),
            store: deps.store,
            generator: deps.generator,
            accumulator: deps.accumulator,
            publisher: deps.publisher,
            alerter: deps.alerter,
            config,
        }
    }

    pub fn free_unit_threshold(&self) -> usize {
        self.config.free_unit_threshold
    }

    /// Sweep every progress row once.
    ///
    /// Only an unreachable progress store fails the sweep as a whole; every
    /// per-user failure lands in `RunReport::errors`.
    pub async fn run(&self, free_unit_threshold: usize) -> Result<RunReport, Error> {
        let mut report = RunReport::new(Utc::now());
        let policy = EligibilityPolicy::new(free_unit_threshold)
            .with_daily_throttle(self.config.daily_throttle);

        let scan = match self.store.scan_progress().await {
            Ok(scan) => scan,
            Err(e) => {
                error!(error = %e, "Cannot load progress; aborting sweep");
                self.alerter
                    .critical("progress_store_unreachable", &e.to_string())
                    .await;
                return Err(e.into());
            }
        };

        info!(
            run_id = %report.run_id,
            users = scan.rows.len(),
            unreadable = scan.unreadable.len(),
            "Sweep started"
        );

        for (key, reason) in scan.unreadable {
            report.processed += 1;
            error!(key = %key, error = %reason, "Progress row unreadable");
            report.errors.push((key, format!("unreadable progress row: {reason}")));
        }

        for progress in scan.rows {
            report.processed += 1;
            let key = progress.key();
            match self.process_user(&progress, &policy, Utc::now()).await {
                Ok(UserOutcome::Advanced { index, .. }) => {
                    report.advanced += 1;
                    info!(key = %key, index, "Unit delivered");
                }
                Ok(UserOutcome::Skipped(reason)) => {
                    report.skipped += 1;
                    debug!(key = %key, reason = reason.reason(), "User skipped");
                }
                Ok(UserOutcome::Stale) => {
                    report.skipped += 1;
                    debug!(key = %key, "Progress moved on during sweep");
                }
                Err(e) => {
                    error!(key = %key, error = %e, "User pipeline failed");
                    report.errors.push((key, e.to_string()));
                }
            }
        }

        report.finish(Utc::now());
        if let Err(e) = self.store.record_run(&report).await {
            warn!(run_id = %report.run_id, error = %e, "Failed to record sweep");
        }

        self.notifications.drain().await;
        self.alerter.run_report(&report).await;

        info!(
            run_id = %report.run_id,
            processed = report.processed,
            advanced = report.advanced,
            skipped = report.skipped,
            errors = report.errors.len(),
            "Sweep finished"
        );
        Ok(report)
    }

    /// Run a sweep unless another holder has the guard. `None` when skipped.
    pub async fn run_exclusive(
        &self,
        guard: &dyn SweepGuard,
        free_unit_threshold: usize,
    ) -> Result<Option<RunReport>, Error> {
        if !guard.try_acquire().await {
            info!("Sweep guard held elsewhere; not starting");
            return Ok(None);
        }
        let result = self.run(free_unit_threshold).await;
        guard.release().await;
        result.map(Some)
    }

    /// Drop queued notifications, e.g. on shutdown.
    pub fn cancel_pending_notifications(&self) {
        self.notifications.cancel_all();
    }

    /// The per-user pipeline. Public for callers that drive single users.
    pub async fn process_user(
        &self,
        progress: &UserProgress,
        policy: &EligibilityPolicy,
        now: DateTime<Utc>,
    ) -> Result<UserOutcome, PipelineError> {
        let eligibility = policy.evaluate(progress, now);
        if !eligibility.is_eligible() {
            return Ok(UserOutcome::Skipped(eligibility));
        }

        let index = progress.current_index();
        let curriculum = progress.curriculum();
        let title = progress.next_unit().ok_or_else(|| {
            PipelineError::InvalidProgress(format!("{} has no unit at {index}", progress.key()))
        })?;
        let key = progress.key();

        let existing = self.store.get_context(&key.email, &key.topic).await?;

        let response = self
            .generator
            .generate(title, existing.as_ref().map(ContextSummary::summary_text), curriculum.units())
            .await?;
        let tokens = Some(response.total_tokens()).filter(|t| *t > 0);
        let unit = split_unit(response.content);

        let next_context = match &existing {
            Some(summary) => Some(
                self.accumulator
                    .update(summary, &unit.raw_text, title, curriculum)
                    .await,
            ),
            None => self
                .accumulator
                .create_initial(&key, curriculum, &unit.raw_text, title)
                .await
                .map(|mut summary| {
                    // An earlier creation failed; count the units already delivered.
                    summary
                        .covered_titles
                        .extend(curriculum.units()[..index].iter().cloned());
                    summary.advance_count = u32::try_from(index + 1).unwrap_or(u32::MAX);
                    summary
                }),
        };

        let page = render_unit_page(
            curriculum.topic(),
            title,
            &unit.body_without_quiz,
            unit.quiz.as_ref(),
            progress.plan_url(),
        );
        let unit_url = self
            .publisher
            .put(&unit_path(progress.email(), progress.topic(), index, title), &page)
            .await?;

        let advanced = match advance(progress, index, &unit_url, now) {
            AdvanceOutcome::Advanced(p) => p,
            AdvanceOutcome::Stale(_) => return Ok(UserOutcome::Stale),
        };
        let stored = self.store.upsert_progress(&advanced).await?;
        if stored.current_index() != index + 1
            || stored.completed_links().get(&index) != Some(&unit_url)
        {
            return Ok(UserOutcome::Stale);
        }

        // Committed. Nothing below may fail the user.
        if let Some(summary) = next_context.filter(|s| existing.as_ref() != Some(s)) {
            if let Err(e) = self.store.save_context(&summary).await {
                warn!(key = %key, error = %e, "Failed to persist context summary");
            }
        }

        let record = UnitRecord {
            email: key.email.clone(),
            topic: key.topic.clone(),
            unit_index: index,
            title: title.to_string(),
            raw_text: unit.raw_text,
            tokens,
            published_url: unit_url.clone(),
            created_at: now,
        };
        if let Err(e) = self.store.record_unit(&record).await {
            warn!(key = %key, error = %e, "Failed to record unit history");
        }

        let plan_url = self.republish_plan(stored).await;

        self.notifications.schedule(UnitNotice {
            email: key.email.clone(),
            topic: key.topic.clone(),
            unit_title: title.to_string(),
            unit_index: index,
            total_units: curriculum.len(),
            unit_url: unit_url.clone(),
            plan_url,
        });

        Ok(UserOutcome::Advanced {
            index,
            url: unit_url,
        })
    }

    /// Publish the curriculum index for `progress` and remember its URL.
    async fn republish_plan(&self, mut progress: UserProgress) -> Option<String> {
        let path = plan_path(progress.email(), progress.topic());
        match self.publisher.put(&path, &render_plan_page(&progress)).await {
            Ok(url) => {
                if progress.plan_url() != Some(url.as_str()) {
                    progress.set_plan_url(url.clone());
                    if let Err(e) = self.store.upsert_progress(&progress).await {
                        warn!(key = %progress.key(), error = %e, "Failed to store plan URL");
                    }
                }
                Some(url)
            }
            Err(e) => {
                warn!(key = %progress.key(), error = %e, "Failed to republish curriculum index");
                progress.plan_url().map(str::to_string)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curriculum::model::{Curriculum, UserKey};
    use crate::error::{LlmError, PublishError};
    use crate::llm::{CompletionRequest, CompletionResponse, LlmProvider};
    use crate::notify::WelcomeNotice;
    use crate::pipeline::{ContextConfig, GeneratorConfig};
    use crate::store::LibSqlBackend;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingLlm {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LlmProvider for CountingLlm {
        fn model_name(&self) -> &str {
            "stub"
        }
        fn provider_name(&self) -> &str {
            "stub"
        }
        async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(CompletionResponse::text(format!("## Lesson\n\nBody {n}")))
        }
    }

    #[derive(Default)]
    struct MemoryPublisher {
        paths: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Publisher for MemoryPublisher {
        async fn put(&self, path: &str, _content: &str) -> Result<String, PublishError> {
            self.paths.lock().unwrap().push(path.to_string());
            Ok(format!("https://pages.test/{path}"))
        }
    }

    #[derive(Default)]
    struct CountingNotifier {
        units: AtomicUsize,
    }

    #[async_trait]
    impl Notifier for CountingNotifier {
        async fn send_unit(&self, _notice: &UnitNotice) -> bool {
            self.units.fetch_add(1, Ordering::SeqCst);
            true
        }
        async fn send_welcome(&self, _notice: &WelcomeNotice) -> bool {
            true
        }
    }

    struct QuietAlerter;

    #[async_trait]
    impl Alerter for QuietAlerter {
        async fn run_report(&self, _report: &RunReport) -> bool {
            true
        }
        async fn critical(&self, _kind: &str, _details: &str) -> bool {
            true
        }
    }

    struct Fixture {
        scheduler: Scheduler,
        store: Arc<LibSqlBackend>,
        llm: Arc<CountingLlm>,
        publisher: Arc<MemoryPublisher>,
        notifier: Arc<CountingNotifier>,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let llm = Arc::new(CountingLlm {
            calls: AtomicUsize::new(0),
        });
        let publisher = Arc::new(MemoryPublisher::default());
        let notifier = Arc::new(CountingNotifier::default());
        let config = SchedulerConfig {
            notify_delay: Duration::ZERO,
            ..SchedulerConfig::default()
        };
        let scheduler = Scheduler::new(
            SchedulerDeps {
                store: store.clone(),
                generator: ContentGenerator::new(llm.clone(), GeneratorConfig::default()),
                accumulator: ContextAccumulator::new(llm.clone(), ContextConfig::default()),
                publisher: publisher.clone(),
                notifier: notifier.clone(),
                alerter: Arc::new(QuietAlerter),
            },
            config,
        );
        Fixture {
            scheduler,
            store,
            llm,
            publisher,
            notifier,
        }
    }

    fn curriculum() -> Curriculum {
        Curriculum::new("Rust", vec!["Intro".into(), "Variables".into(), "Loops".into()])
    }

    #[tokio::test]
    async fn gated_users_cost_no_generation() {
        let fx = fixture().await;
        let progress = UserProgress::new("a@b.c", curriculum(), false);
        let policy = EligibilityPolicy::new(0);

        let outcome = fx
            .scheduler
            .process_user(&progress, &policy, Utc::now())
            .await
            .unwrap();

        assert_eq!(outcome, UserOutcome::Skipped(Eligibility::PaymentRequired));
        assert_eq!(fx.llm.calls.load(Ordering::SeqCst), 0);
        assert!(fx.publisher.paths.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn advance_publishes_unit_then_index() {
        let fx = fixture().await;
        fx.store
            .upsert_progress(&UserProgress::new("a@b.c", curriculum(), false))
            .await
            .unwrap();

        let report = fx.scheduler.run(10).await.unwrap();
        assert_eq!(report.advanced, 1);

        let paths = fx.publisher.paths.lock().unwrap().clone();
        assert_eq!(
            paths,
            vec![
                "reports/a/rust/00_intro.html".to_string(),
                "reports/a/rust/index.html".to_string(),
            ]
        );

        let stored = fx.store.find_progress("a@b.c", "Rust").await.unwrap().unwrap();
        assert_eq!(stored.current_index(), 1);
        assert_eq!(
            stored.plan_url(),
            Some("https://pages.test/reports/a/rust/index.html")
        );
        assert_eq!(fx.notifier.units.load(Ordering::SeqCst), 1);
        assert_eq!(fx.scheduler.notifications.pending(), 0);
    }

    #[tokio::test]
    async fn missing_summary_is_backfilled_mid_course() {
        let fx = fixture().await;
        let start = UserProgress::new("a@b.c", curriculum(), false);
        let progress = advance(&start, 0, "https://pages.test/u0", Utc::now()).into_progress();
        fx.store.upsert_progress(&progress).await.unwrap();

        let outcome = fx
            .scheduler
            .process_user(&progress, &EligibilityPolicy::new(10), Utc::now())
            .await
            .unwrap();
        assert!(matches!(outcome, UserOutcome::Advanced { index: 1, .. }));

        let summary = fx.store.get_context("a@b.c", "Rust").await.unwrap().unwrap();
        assert_eq!(summary.advance_count, 2);
        assert!(summary.covered_titles.contains("Intro"));
        assert!(summary.covered_titles.contains("Variables"));
    }

    #[tokio::test]
    async fn unreadable_row_is_reported_and_others_still_advance() {
        let fx = fixture().await;
        fx.store
            .upsert_progress(&UserProgress::new("a@b.c", curriculum(), false))
            .await
            .unwrap();
        fx.store
            .conn()
            .execute(
                "INSERT INTO progress (email, topic, units, current_index, completed_links) \
                 VALUES ('z@b.c', 'Go', '[\"Intro\"]', 3, '{}')",
                (),
            )
            .await
            .unwrap();

        let report = fx.scheduler.run(10).await.unwrap();

        assert_eq!(report.processed, 2);
        assert_eq!(report.advanced, 1);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].0, UserKey::new("z@b.c", "Go"));
        assert!(report.errors[0].1.contains("unreadable"));
    }
}
