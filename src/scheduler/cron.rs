//! Cron-driven sweeps for daemon mode.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{error, info};

use super::Scheduler;
use super::guard::SweepGuard;
use crate::error::ConfigError;

/// Parse a cron expression and compute the next fire time from now.
pub fn next_cron_fire(schedule: &str) -> Result<Option<DateTime<Utc>>, String> {
    let cron_schedule =
        cron::Schedule::from_str(schedule).map_err(|e| format!("invalid cron: {e}"))?;
    Ok(cron_schedule.upcoming(Utc).next())
}

/// Spawn the cron ticker background task.
///
/// Sleeps until each fire time of `schedule` and runs one guarded sweep.
pub fn spawn_cron_ticker(
    scheduler: Arc<Scheduler>,
    guard: Arc<dyn SweepGuard>,
    schedule: &str,
) -> Result<tokio::task::JoinHandle<()>, ConfigError> {
    let parsed = cron::Schedule::from_str(schedule).map_err(|e| ConfigError::InvalidValue {
        key: "CURRICULUM_SCHEDULE".to_string(),
        message: e.to_string(),
    })?;
    let threshold = scheduler.free_unit_threshold();

    Ok(tokio::spawn(async move {
        loop {
            let Some(next) = parsed.upcoming(Utc).next() else {
                info!("Cron schedule has no further fire times; ticker stopping");
                return;
            };
            let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            info!(next = %next, "Next sweep scheduled");
            tokio::time::sleep(wait).await;

            match scheduler.run_exclusive(guard.as_ref(), threshold).await {
                Ok(Some(report)) => info!(
                    run_id = %report.run_id,
                    advanced = report.advanced,
                    errors = report.errors.len(),
                    "Scheduled sweep finished"
                ),
                Ok(None) => info!("Sweep already running; skipped this tick"),
                Err(e) => error!(error = %e, "Scheduled sweep failed"),
            }
        }
    }))
}
