//! Webhook alerter posting Discord-style embeds.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::warn;

use super::Alerter;
use crate::error::NotifyError;
use crate::scheduler::RunReport;

const GREEN: u32 = 0x00ff00;
const ORANGE: u32 = 0xffaa00;
const RED: u32 = 0xff0000;

/// Discord caps a field value at 1024 characters.
const MAX_FIELD_CHARS: usize = 1024;

pub struct WebhookAlerter {
    client: Client,
    url: String,
}

impl WebhookAlerter {
    pub fn new(url: &str) -> Result<Self, NotifyError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()
            .map_err(|e| NotifyError::Build(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }

    async fn post(&self, embed: Value) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.url)
            .json(&json!({ "embeds": [embed] }))
            .send()
            .await
            .map_err(|e| NotifyError::Send {
                channel: "webhook".into(),
                reason: e.to_string(),
            })?;
        if !response.status().is_success() {
            return Err(NotifyError::Send {
                channel: "webhook".into(),
                reason: format!("HTTP {}", response.status()),
            });
        }
        Ok(())
    }
}

/// Embed summarising one sweep.
pub fn run_report_embed(report: &RunReport) -> Value {
    let mut fields = vec![
        json!({ "name": "Users Processed", "value": report.processed.to_string(), "inline": true }),
        json!({ "name": "Success Rate", "value": format!("{}/{}", report.succeeded(), report.processed), "inline": true }),
        json!({ "name": "Advanced", "value": report.advanced.to_string(), "inline": true }),
        json!({ "name": "Skipped", "value": report.skipped.to_string(), "inline": true }),
    ];
    if !report.errors.is_empty() {
        let lines = report
            .errors
            .iter()
            .map(|(key, msg)| format!("• {key}: {msg}"))
            .collect::<Vec<_>>()
            .join("\n");
        fields.push(json!({ "name": "Errors", "value": clip(&lines), "inline": false }));
    }

    json!({
        "title": "Daily Scheduled Run Report",
        "description": format!(
            "Processed {} users: {} advanced, {} skipped, {} failed",
            report.processed, report.advanced, report.skipped, report.errors.len()
        ),
        "color": if report.errors.is_empty() { GREEN } else { ORANGE },
        "fields": fields,
        "footer": { "text": format!("run {}", report.run_id) },
    })
}

/// Embed for a critical alert.
pub fn critical_embed(kind: &str, details: &str) -> Value {
    json!({
        "title": "CRITICAL SYSTEM ALERT",
        "description": clip(&format!("{kind}: {details}")),
        "color": RED,
        "fields": [
            { "name": "Timestamp", "value": Utc::now().to_rfc3339(), "inline": false }
        ],
    })
}

fn clip(s: &str) -> String {
    match s.char_indices().nth(MAX_FIELD_CHARS - 3) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

#[async_trait]
impl Alerter for WebhookAlerter {
    async fn run_report(&self, report: &RunReport) -> bool {
        match self.post(run_report_embed(report)).await {
            Ok(()) => true,
            Err(e) => {
                warn!(run_id = %report.run_id, error = %e, "Failed to post run report");
                false
            }
        }
    }

    async fn critical(&self, kind: &str, details: &str) -> bool {
        match self.post(critical_embed(kind, details)).await {
            Ok(()) => true,
            Err(e) => {
                warn!(kind, error = %e, "Failed to post critical alert");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curriculum::UserKey;

    #[test]
    fn clean_run_is_green() {
        let mut report = RunReport::new(Utc::now());
        report.processed = 3;
        report.advanced = 2;
        report.skipped = 1;
        let embed = run_report_embed(&report);
        assert_eq!(embed["color"], GREEN);
        assert_eq!(embed["fields"][1]["value"], "3/3");
        assert_eq!(embed["fields"].as_array().unwrap().len(), 4);
    }

    #[test]
    fn errors_turn_orange_and_are_listed() {
        let mut report = RunReport::new(Utc::now());
        report.processed = 2;
        report.advanced = 1;
        report
            .errors
            .push((UserKey::new("c@d.e", "Go"), "timeout".into()));
        let embed = run_report_embed(&report);
        assert_eq!(embed["color"], ORANGE);
        assert_eq!(embed["fields"][1]["value"], "1/2");
        let errors = embed["fields"][4]["value"].as_str().unwrap();
        assert!(errors.contains("c@d.e/Go: timeout"));
    }

    #[test]
    fn critical_is_red() {
        let embed = critical_embed("store_unreachable", "connection refused");
        assert_eq!(embed["color"], RED);
        assert_eq!(embed["description"], "store_unreachable: connection refused");
    }

    #[test]
    fn long_values_are_clipped() {
        let long = "x".repeat(5000);
        assert_eq!(clip(&long).chars().count(), MAX_FIELD_CHARS);
    }
}
