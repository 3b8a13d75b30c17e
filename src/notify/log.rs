//! Log-only collaborators, used when no real channel is configured.

use async_trait::async_trait;
use tracing::{error, info, warn};

use super::{Alerter, Notifier, UnitNotice, WelcomeNotice};
use crate::scheduler::RunReport;

/// Logs notices instead of sending them. Reports `false`: nothing was delivered.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_unit(&self, notice: &UnitNotice) -> bool {
        info!(
            email = %notice.email,
            topic = %notice.topic,
            index = notice.unit_index,
            url = %notice.unit_url,
            "Unit ready (no notifier configured)"
        );
        false
    }

    async fn send_welcome(&self, notice: &WelcomeNotice) -> bool {
        info!(
            email = %notice.email,
            topic = %notice.topic,
            url = %notice.plan_url,
            "Enrolled (no notifier configured)"
        );
        false
    }
}

pub struct LogAlerter;

#[async_trait]
impl Alerter for LogAlerter {
    async fn run_report(&self, report: &RunReport) -> bool {
        if report.errors.is_empty() {
            info!(
                run_id = %report.run_id,
                processed = report.processed,
                advanced = report.advanced,
                skipped = report.skipped,
                "Sweep report"
            );
        } else {
            warn!(
                run_id = %report.run_id,
                processed = report.processed,
                advanced = report.advanced,
                skipped = report.skipped,
                errors = report.errors.len(),
                "Sweep report with errors"
            );
        }
        true
    }

    async fn critical(&self, kind: &str, details: &str) -> bool {
        error!(kind, details, "CRITICAL");
        true
    }
}
