//! Enrollment: plan a curriculum for a new (email, topic) and start progress.
//!
//! The first unit is not delivered here; the next sweep picks the row up.

use std::sync::Arc;

use tracing::{info, warn};

use super::model::{UserProgress, normalize_email};
use super::planner::{CurriculumPlanner, PlanOutcome, sanitize_topic, validate_topic};
use crate::error::Error;
use crate::notify::{Notifier, WelcomeNotice};
use crate::pipeline::render_plan_page;
use crate::publish::{Publisher, plan_path};
use crate::store::Database;

/// Result of an enrollment request.
#[derive(Debug)]
pub enum EnrollOutcome {
    Enrolled {
        progress: UserProgress,
        plan_url: String,
    },
    /// A row for this (email, topic) already exists; nothing was changed.
    AlreadyEnrolled(UserProgress),
    /// The planner judged the topic unsuitable.
    Rejected { message: String },
    /// The topic failed sanitisation or validation before planning.
    InvalidTopic { message: String },
    InvalidEmail { message: String },
}

pub struct Enrollment {
    planner: CurriculumPlanner,
    store: Arc<dyn Database>,
    publisher: Arc<dyn Publisher>,
    notifier: Arc<dyn Notifier>,
}

impl Enrollment {
    pub fn new(
        planner: CurriculumPlanner,
        store: Arc<dyn Database>,
        publisher: Arc<dyn Publisher>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            planner,
            store,
            publisher,
            notifier,
        }
    }

    /// Enroll `email` in `raw_topic`.
    ///
    /// Backend and store failures are errors and leave no progress row behind.
    /// A failed welcome email is only logged.
    pub async fn enroll(
        &self,
        email: &str,
        raw_topic: &str,
        paid: bool,
    ) -> Result<EnrollOutcome, Error> {
        let email = normalize_email(email);
        if !email.contains('@') {
            return Ok(EnrollOutcome::InvalidEmail {
                message: format!("'{email}' is not an email address"),
            });
        }

        let topic = sanitize_topic(raw_topic);
        if !validate_topic(&topic) {
            return Ok(EnrollOutcome::InvalidTopic {
                message: "Topic must be between 2 and 100 characters".to_string(),
            });
        }

        if let Some(existing) = self.store.find_progress(&email, &topic).await? {
            info!(email = %email, topic = %topic, "Already enrolled");
            return Ok(EnrollOutcome::AlreadyEnrolled(existing));
        }

        let (outcome, raw) = self.planner.plan(&topic).await;
        let curriculum = match outcome {
            PlanOutcome::Accepted(c) => c,
            PlanOutcome::Rejected => {
                return Ok(EnrollOutcome::Rejected {
                    message: format!("'{topic}' is not a topic a curriculum can be built for"),
                });
            }
            PlanOutcome::TransientFailure(e) => return Err(e.into()),
        };

        let mut progress = UserProgress::new(&email, curriculum, paid);
        let plan_url = self
            .publisher
            .put(&plan_path(&email, &topic), &render_plan_page(&progress))
            .await?;
        progress.set_plan_url(plan_url.clone());

        let progress = self.store.upsert_progress(&progress).await?;
        if let Some(raw) = raw {
            if let Err(e) = self.store.record_plan(&email, &topic, &raw).await {
                warn!(email = %email, topic = %topic, error = %e, "Failed to record plan history");
            }
        }

        info!(
            email = %email,
            topic = %topic,
            units = progress.curriculum().len(),
            paid,
            "Enrolled"
        );

        let welcome = WelcomeNotice {
            email: email.clone(),
            topic: topic.clone(),
            total_units: progress.curriculum().len(),
            plan_url: plan_url.clone(),
        };
        if !self.notifier.send_welcome(&welcome).await {
            warn!(email = %email, "Welcome notification not delivered");
        }

        Ok(EnrollOutcome::Enrolled { progress, plan_url })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curriculum::PlannerConfig;
    use crate::error::{LlmError, PublishError};
    use crate::llm::{CompletionRequest, CompletionResponse, LlmProvider};
    use crate::notify::UnitNotice;
    use crate::store::LibSqlBackend;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedLlm {
        reply: Result<String, ()>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LlmProvider for FixedLlm {
        fn model_name(&self) -> &str {
            "stub"
        }
        fn provider_name(&self) -> &str {
            "stub"
        }
        async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.reply {
                Ok(text) => Ok(CompletionResponse::text(text.clone())),
                Err(()) => Err(LlmError::RequestFailed {
                    provider: "stub".into(),
                    reason: "connection reset".into(),
                }),
            }
        }
    }

    #[derive(Default)]
    struct MemoryPublisher {
        pages: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl Publisher for MemoryPublisher {
        async fn put(&self, path: &str, content: &str) -> Result<String, PublishError> {
            self.pages
                .lock()
                .unwrap()
                .push((path.to_string(), content.to_string()));
            Ok(format!("https://pages.test/{path}"))
        }
    }

    #[derive(Default)]
    struct WelcomeLog {
        sent: Mutex<Vec<WelcomeNotice>>,
    }

    #[async_trait]
    impl Notifier for WelcomeLog {
        async fn send_unit(&self, _notice: &UnitNotice) -> bool {
            true
        }
        async fn send_welcome(&self, notice: &WelcomeNotice) -> bool {
            self.sent.lock().unwrap().push(notice.clone());
            true
        }
    }

    struct Fixture {
        enrollment: Enrollment,
        store: Arc<LibSqlBackend>,
        llm: Arc<FixedLlm>,
        publisher: Arc<MemoryPublisher>,
        notifier: Arc<WelcomeLog>,
    }

    async fn fixture(reply: Result<&str, ()>) -> Fixture {
        let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let llm = Arc::new(FixedLlm {
            reply: reply.map(str::to_string),
            calls: AtomicUsize::new(0),
        });
        let publisher = Arc::new(MemoryPublisher::default());
        let notifier = Arc::new(WelcomeLog::default());
        let enrollment = Enrollment::new(
            CurriculumPlanner::new(llm.clone(), PlannerConfig::default()),
            store.clone(),
            publisher.clone(),
            notifier.clone(),
        );
        Fixture {
            enrollment,
            store,
            llm,
            publisher,
            notifier,
        }
    }

    const PLAN: &str = "Beginner\n1. Intro\n2. Variables\nIntermediate\n3. Loops\n";

    #[tokio::test]
    async fn enrolls_and_publishes_index() {
        let fx = fixture(Ok(PLAN)).await;
        let outcome = fx
            .enrollment
            .enroll("Learner@Example.com", "  rust <b>programming</b> ", false)
            .await
            .unwrap();

        let EnrollOutcome::Enrolled { progress, plan_url } = outcome else {
            panic!("expected enrollment, got {outcome:?}");
        };
        assert_eq!(progress.topic(), "Rust Programming");
        assert_eq!(progress.curriculum().units(), ["Intro", "Variables", "Loops"]);
        assert_eq!(progress.current_index(), 0);
        assert_eq!(plan_url, "https://pages.test/reports/learner/rust_programming/index.html");

        let stored = fx
            .store
            .find_progress("learner@example.com", "Rust Programming")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.plan_url(), Some(plan_url.as_str()));

        assert_eq!(fx.publisher.pages.lock().unwrap().len(), 1);
        let welcomes = fx.notifier.sent.lock().unwrap();
        assert_eq!(welcomes.len(), 1);
        assert_eq!(welcomes[0].total_units, 3);
    }

    #[tokio::test]
    async fn second_enrollment_is_a_no_op() {
        let fx = fixture(Ok(PLAN)).await;
        fx.enrollment.enroll("a@b.c", "Rust", false).await.unwrap();
        let again = fx.enrollment.enroll("A@B.C", "rust", true).await.unwrap();

        assert!(matches!(again, EnrollOutcome::AlreadyEnrolled(_)));
        assert_eq!(fx.llm.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn planner_rejection_leaves_no_row() {
        let fx = fixture(Ok("ERROR")).await;
        let outcome = fx.enrollment.enroll("a@b.c", "Nonsense", false).await.unwrap();

        assert!(matches!(outcome, EnrollOutcome::Rejected { .. }));
        assert!(fx.store.find_progress("a@b.c", "Nonsense").await.unwrap().is_none());
        assert!(fx.notifier.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn backend_failure_is_an_error() {
        let fx = fixture(Err(())).await;
        let err = fx.enrollment.enroll("a@b.c", "Rust", false).await.unwrap_err();

        assert!(matches!(err, Error::Llm(_)));
        assert!(fx.store.list_progress().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn short_topic_is_refused_before_planning() {
        let fx = fixture(Ok(PLAN)).await;
        let outcome = fx.enrollment.enroll("a@b.c", "<i>x</i>", false).await.unwrap();

        assert!(matches!(outcome, EnrollOutcome::InvalidTopic { .. }));
        assert_eq!(fx.llm.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn malformed_email_is_not_a_topic_problem() {
        let fx = fixture(Ok(PLAN)).await;
        let outcome = fx.enrollment.enroll("not-an-address", "Rust", false).await.unwrap();

        let EnrollOutcome::InvalidEmail { message } = outcome else {
            panic!("expected an email refusal, got {outcome:?}");
        };
        assert!(message.contains("not-an-address"));
        assert_eq!(fx.llm.calls.load(Ordering::SeqCst), 0);
    }
}
