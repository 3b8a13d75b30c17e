//! Learner email via SMTP (lettre).

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use secrecy::ExposeSecret;
use tracing::{info, warn};

use super::{Notifier, UnitNotice, WelcomeNotice};
use crate::config::EmailConfig;
use crate::error::NotifyError;
use crate::pipeline::escape_html;

pub struct EmailNotifier {
    config: EmailConfig,
    transport: SmtpTransport,
}

impl EmailNotifier {
    pub fn new(config: EmailConfig) -> Result<Self, NotifyError> {
        let creds = Credentials::new(
            config.username.clone(),
            config.password.expose_secret().to_string(),
        );
        let transport = SmtpTransport::relay(&config.smtp_host)
            .map_err(|e| NotifyError::Build(format!("SMTP relay error: {e}")))?
            .port(config.smtp_port)
            .credentials(creds)
            .build();
        Ok(Self { config, transport })
    }

    fn build(&self, to: &str, subject: &str, html: String) -> Result<Message, NotifyError> {
        Message::builder()
            .from(
                self.config
                    .from_address
                    .parse()
                    .map_err(|e| NotifyError::Build(format!("Invalid from address: {e}")))?,
            )
            .to(to
                .parse()
                .map_err(|e| NotifyError::Build(format!("Invalid to address: {e}")))?)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(html)
            .map_err(|e| NotifyError::Build(format!("Failed to build email: {e}")))
    }

    /// The SMTP transport blocks, so the send runs on the blocking pool.
    async fn deliver(&self, to: &str, subject: &str, html: String) -> Result<(), NotifyError> {
        let message = self.build(to, subject, html)?;
        let transport = self.transport.clone();
        tokio::task::spawn_blocking(move || transport.send(&message))
            .await
            .map_err(|e| NotifyError::Send {
                channel: "email".into(),
                reason: format!("send task failed: {e}"),
            })?
            .map_err(|e| NotifyError::Send {
                channel: "email".into(),
                reason: format!("SMTP send failed: {e}"),
            })?;
        Ok(())
    }
}

fn unit_subject(notice: &UnitNotice) -> String {
    format!("Your new lesson on {} is ready: {}", notice.topic, notice.unit_title)
}

fn unit_body(notice: &UnitNotice) -> String {
    let mut body = format!(
        "<p>Lesson {} of {} in <strong>{}</strong> is ready.</p>\n\
         <p><a href=\"{}\">{}</a></p>\n",
        notice.unit_index + 1,
        notice.total_units,
        escape_html(&notice.topic),
        escape_html(&notice.unit_url),
        escape_html(&notice.unit_title),
    );
    if let Some(plan) = &notice.plan_url {
        body.push_str(&format!(
            "<p>See your progress on the <a href=\"{}\">learning plan</a>.</p>\n",
            escape_html(plan)
        ));
    }
    body
}

fn welcome_body(notice: &WelcomeNotice) -> String {
    format!(
        "<p>Your learning plan for <strong>{}</strong> has {} lessons.</p>\n\
         <p><a href=\"{}\">View the plan</a>. Your first lesson arrives with the next delivery.</p>\n",
        escape_html(&notice.topic),
        notice.total_units,
        escape_html(&notice.plan_url),
    )
}

#[async_trait]
impl Notifier for EmailNotifier {
    async fn send_unit(&self, notice: &UnitNotice) -> bool {
        match self
            .deliver(&notice.email, &unit_subject(notice), unit_body(notice))
            .await
        {
            Ok(()) => {
                info!(email = %notice.email, topic = %notice.topic, index = notice.unit_index, "Unit email sent");
                true
            }
            Err(e) => {
                warn!(email = %notice.email, topic = %notice.topic, error = %e, "Unit email failed");
                false
            }
        }
    }

    async fn send_welcome(&self, notice: &WelcomeNotice) -> bool {
        let subject = format!("Your learning plan for {}", notice.topic);
        match self
            .deliver(&notice.email, &subject, welcome_body(notice))
            .await
        {
            Ok(()) => {
                info!(email = %notice.email, topic = %notice.topic, "Welcome email sent");
                true
            }
            Err(e) => {
                warn!(email = %notice.email, topic = %notice.topic, error = %e, "Welcome email failed");
                false
            }
        }
    }
}
