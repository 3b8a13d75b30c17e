//! Outbound notifications to learners and operational alerts to operators.
//!
//! Neither side can fail a sweep: every send reports success as a `bool` and
//! logs its own errors.

mod deferred;
mod email;
mod log;
mod webhook;

pub use deferred::{DeferredNotifications, DrainSummary};
pub use email::EmailNotifier;
pub use log::{LogAlerter, LogNotifier};
pub use webhook::{WebhookAlerter, critical_embed, run_report_embed};

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{AlertConfig, EmailConfig};
use crate::error::NotifyError;
use crate::scheduler::RunReport;

/// A freshly published unit, addressed to one learner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitNotice {
    pub email: String,
    pub topic: String,
    pub unit_title: String,
    pub unit_index: usize,
    pub total_units: usize,
    pub unit_url: String,
    pub plan_url: Option<String>,
}

/// Sent once on enrollment, pointing at the curriculum index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WelcomeNotice {
    pub email: String,
    pub topic: String,
    pub total_units: usize,
    pub plan_url: String,
}

/// Learner-facing notification channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Announce a published unit. `false` on any failure.
    async fn send_unit(&self, notice: &UnitNotice) -> bool;

    /// Welcome a newly enrolled learner. `false` on any failure.
    async fn send_welcome(&self, notice: &WelcomeNotice) -> bool;
}

/// Operator-facing alert channel.
#[async_trait]
pub trait Alerter: Send + Sync {
    /// Aggregate result of one sweep.
    async fn run_report(&self, report: &RunReport) -> bool;

    /// Ad-hoc critical alert, e.g. the progress store is unreachable.
    async fn critical(&self, kind: &str, details: &str) -> bool;
}

/// Email when SMTP is configured, otherwise log only.
pub fn create_notifier(config: Option<EmailConfig>) -> Result<Arc<dyn Notifier>, NotifyError> {
    Ok(match config {
        Some(cfg) => Arc::new(EmailNotifier::new(cfg)?),
        None => {
            tracing::info!("SMTP not configured; learner notifications are log-only");
            Arc::new(LogNotifier)
        }
    })
}

/// Webhook when configured, otherwise log only.
pub fn create_alerter(config: &AlertConfig) -> Result<Arc<dyn Alerter>, NotifyError> {
    Ok(match &config.webhook_url {
        Some(url) => Arc::new(WebhookAlerter::new(url)?),
        None => Arc::new(LogAlerter),
    })
}
