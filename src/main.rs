use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};

use curriculum_drip::config::{
    AlertConfig, EmailConfig, LlmSettings, LoggingConfig, PublishConfig, SchedulerConfig,
    StoreConfig,
};
use curriculum_drip::curriculum::{
    CurriculumPlanner, EnrollOutcome, Enrollment, PlannerConfig, sanitize_topic,
};
use curriculum_drip::llm::create_provider;
use curriculum_drip::notify::{Alerter, create_alerter, create_notifier};
use curriculum_drip::pipeline::{
    ContentGenerator, ContextAccumulator, ContextConfig, GeneratorConfig,
};
use curriculum_drip::publish::create_publisher;
use curriculum_drip::scheduler::{
    LocalSweepGuard, Scheduler, SchedulerDeps, SweepGuard, next_cron_fire, spawn_cron_ticker,
};
use curriculum_drip::store::{Database, LibSqlBackend};

/// curriculum-drip: AI-written courses delivered one unit per sweep
#[derive(Parser)]
#[command(name = "curriculum-drip")]
#[command(about = "Plan a curriculum per learner and deliver it one unit per sweep")]
struct Cli {
    /// Defaults to `sweep`
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one sweep over every learner
    Sweep,
    /// Run sweeps on CURRICULUM_SCHEDULE until Ctrl-C
    Daemon,
    /// Plan a curriculum and enroll a learner in it
    Enroll {
        email: String,
        /// Topic words, joined with spaces
        #[arg(required = true)]
        topic: Vec<String>,
        /// Skip the free-unit limit
        #[arg(long)]
        paid: bool,
    },
    /// Lift the free-unit limit for an enrollment
    MarkPaid {
        email: String,
        #[arg(required = true)]
        topic: Vec<String>,
    },
    /// List delivered units
    History {
        email: String,
        #[arg(required = true)]
        topic: Vec<String>,
    },
}

impl Cli {
    fn command(self) -> Commands {
        self.command.unwrap_or(Commands::Sweep)
    }
}

/// Topic as stored: the same normalisation enrollment applies.
fn stored_topic(words: &[String]) -> String {
    sanitize_topic(&words.join(" "))
}

/// How a command ended when it did not fail.
enum Outcome {
    Done,
    /// The request was refused; nothing changed and nobody is alerted.
    Refused(String),
}

impl Outcome {
    fn exit_code(&self) -> ExitCode {
        match self {
            Outcome::Done => ExitCode::SUCCESS,
            Outcome::Refused(_) => ExitCode::from(2),
        }
    }
}

fn enrollment_outcome(outcome: EnrollOutcome) -> Outcome {
    match outcome {
        EnrollOutcome::Enrolled { progress, plan_url } => {
            eprintln!(
                "Enrolled {} in {} ({} units): {plan_url}",
                progress.email(),
                progress.topic(),
                progress.curriculum().len()
            );
            Outcome::Done
        }
        EnrollOutcome::AlreadyEnrolled(progress) => {
            eprintln!(
                "{} is already enrolled in {} (unit {} of {})",
                progress.email(),
                progress.topic(),
                progress.current_index(),
                progress.curriculum().len()
            );
            Outcome::Done
        }
        EnrollOutcome::Rejected { message }
        | EnrollOutcome::InvalidTopic { message }
        | EnrollOutcome::InvalidEmail { message } => Outcome::Refused(message),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let command = Cli::parse().command();

    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    let _log_guard = curriculum_drip::logging::init(&LoggingConfig::from_env());

    let alerter = create_alerter(&AlertConfig::from_env())?;

    match run(command, Arc::clone(&alerter)).await {
        Ok(outcome) => {
            if let Outcome::Refused(message) = &outcome {
                eprintln!("{message}");
            }
            Ok(outcome.exit_code())
        }
        Err(e) => {
            tracing::error!(error = %e, "Fatal error");
            alerter.critical("startup_failure", &format!("{e:#}")).await;
            Err(e)
        }
    }
}

async fn run(command: Commands, alerter: Arc<dyn Alerter>) -> anyhow::Result<Outcome> {
    // ── Store ───────────────────────────────────────────────────────────
    let store_config = StoreConfig::from_env();
    if let Some(parent) = store_config.db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let store: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(&store_config.db_path)
            .await
            .with_context(|| format!("opening database at {}", store_config.db_path.display()))?,
    );

    // Store-only commands need nothing else.
    match &command {
        Commands::MarkPaid { email, topic } => {
            let topic = stored_topic(topic);
            if store.set_paid(email, &topic, true).await? {
                eprintln!("Marked {email} as paid for {topic}");
                return Ok(Outcome::Done);
            }
            return Ok(Outcome::Refused(format!("No enrollment for {email} in {topic}")));
        }
        Commands::History { email, topic } => {
            let topic = stored_topic(topic);
            let history = store.unit_history(email, &topic).await?;
            if history.is_empty() {
                eprintln!("No units delivered to {email} for {topic}");
            }
            for unit in history {
                println!(
                    "{:>3}  {}  {}  {}",
                    unit.unit_index + 1,
                    unit.created_at.format("%Y-%m-%d %H:%M"),
                    unit.title,
                    unit.published_url
                );
            }
            return Ok(Outcome::Done);
        }
        _ => {}
    }

    // ── Collaborators ───────────────────────────────────────────────────
    let llm_settings = LlmSettings::from_env()?;
    let llm = create_provider(&llm_settings)?;
    let publisher = create_publisher(&PublishConfig::from_env()?)?;
    let notifier = create_notifier(EmailConfig::from_env()?)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        model = %llm_settings.model,
        db = %store_config.db_path.display(),
        "curriculum-drip starting"
    );

    if let Commands::Enroll { email, topic, paid } = &command {
        let planner = CurriculumPlanner::new(
            Arc::clone(&llm),
            PlannerConfig {
                max_tokens: llm_settings.max_tokens_plan,
                temperature: llm_settings.temperature,
                ..PlannerConfig::default()
            },
        );
        let enrollment = Enrollment::new(planner, store, publisher, notifier);
        let outcome = enrollment.enroll(email, &topic.join(" "), *paid).await?;
        return Ok(enrollment_outcome(outcome));
    }

    let scheduler_config = SchedulerConfig::from_env()?;
    let schedule = scheduler_config.schedule.clone();
    let threshold = scheduler_config.free_unit_threshold;
    let scheduler = Arc::new(Scheduler::new(
        SchedulerDeps {
            store,
            generator: ContentGenerator::new(
                Arc::clone(&llm),
                GeneratorConfig {
                    max_tokens: llm_settings.max_tokens_unit,
                    temperature: llm_settings.temperature,
                },
            ),
            accumulator: ContextAccumulator::new(
                llm,
                ContextConfig {
                    max_tokens: llm_settings.max_tokens_summary,
                    ..ContextConfig::default()
                },
            ),
            publisher,
            notifier,
            alerter,
        },
        scheduler_config,
    ));
    let guard: Arc<dyn SweepGuard> = Arc::new(LocalSweepGuard::new());

    match command {
        Commands::Daemon => {
            match next_cron_fire(&schedule) {
                Ok(Some(next)) => eprintln!("   Schedule: {schedule} (next sweep {next})"),
                Ok(None) => bail!("Schedule {schedule} never fires"),
                Err(e) => bail!("{e}"),
            }
            let ticker = spawn_cron_ticker(Arc::clone(&scheduler), guard, &schedule)?;

            tokio::signal::ctrl_c().await?;
            tracing::info!("Shutdown requested");
            ticker.abort();
            scheduler.cancel_pending_notifications();
            Ok(Outcome::Done)
        }
        _ => {
            let Some(report) = scheduler.run_exclusive(guard.as_ref(), threshold).await? else {
                return Ok(Outcome::Done);
            };
            eprintln!(
                "Processed {} users: {} advanced, {} skipped, {} errors",
                report.processed,
                report.advanced,
                report.skipped,
                report.errors.len()
            );
            Ok(Outcome::Done)
        }
    }
}
