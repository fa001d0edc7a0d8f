//! # CampusClock Notify
//! One notification per terminal attempt, delivered to whatever is
//! configured. Delivery failures are the caller's to log; they never
//! change an attempt's outcome.

use async_trait::async_trait;

use campusclock_core::config::{AppConfig, EmailNotifyConfig, WebhookNotifyConfig};
use campusclock_core::error::{ClockError, Result};
use campusclock_core::types::{Attempt, User};

/// Delivery seam. Implementations must not retry; the executor invokes each
/// notifier exactly once per terminal attempt.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;
    async fn notify(&self, user: &User, attempt: &Attempt) -> Result<()>;
}

/// Build the configured notifier set. The log notifier is always present so
/// every terminal attempt is visible even on a bare config.
pub fn notifiers_from_config(config: &AppConfig) -> Vec<Box<dyn Notifier>> {
    let mut notifiers: Vec<Box<dyn Notifier>> = vec![Box::new(LogNotifier)];

    if let Some(email) = &config.notify.email
        && email.enabled
    {
        notifiers.push(Box::new(EmailNotifier::new(email.clone())));
    }
    if let Some(webhook) = &config.notify.webhook
        && webhook.enabled
    {
        notifiers.push(Box::new(WebhookNotifier::new(webhook.clone())));
    }
    notifiers
}

fn subject_for(attempt: &Attempt) -> String {
    format!("Clocked {}.", attempt.status.as_str())
}

fn body_for(attempt: &Attempt) -> String {
    let mut body = attempt.message.clone().unwrap_or_default();
    body.push_str(&format!(
        "\n\nscheduled: {}",
        attempt.scheduled_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    if let Some(executed) = attempt.executed_at {
        body.push_str(&format!(
            "\nexecuted:  {}",
            executed.format("%Y-%m-%d %H:%M:%S UTC")
        ));
    }
    body
}

// ─── Log ──────────────────────────────────────────────────

/// Writes the outcome to the log. Always registered.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn notify(&self, user: &User, attempt: &Attempt) -> Result<()> {
        tracing::info!(
            "📣 {}: attempt {} {}: {}",
            user.username,
            attempt.id,
            attempt.status.as_str(),
            attempt.message.as_deref().unwrap_or("-")
        );
        Ok(())
    }
}

// ─── Email ────────────────────────────────────────────────

/// SMTP delivery to the user's registered address.
pub struct EmailNotifier {
    config: EmailNotifyConfig,
}

impl EmailNotifier {
    pub fn new(config: EmailNotifyConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    fn name(&self) -> &str {
        "email"
    }

    async fn notify(&self, user: &User, attempt: &Attempt) -> Result<()> {
        use lettre::message::header::ContentType;
        use lettre::message::Mailbox;
        use lettre::transport::smtp::authentication::Credentials;
        use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

        let Some(to_addr) = user.email.as_deref() else {
            tracing::debug!("{} has no email on file, skipping mail", user.username);
            return Ok(());
        };

        let from_name = self.config.display_name.as_deref().unwrap_or("CampusClock");
        let from: Mailbox = format!("{from_name} <{}>", self.config.from)
            .parse()
            .map_err(|e| ClockError::Notify(format!("Invalid from: {e}")))?;
        let to: Mailbox = to_addr
            .parse()
            .map_err(|e| ClockError::Notify(format!("Invalid to: {e}")))?;

        let email = Message::builder()
            .from(from)
            .to(to)
            .subject(subject_for(attempt))
            .header(ContentType::TEXT_PLAIN)
            .body(body_for(attempt))
            .map_err(|e| ClockError::Notify(format!("Build email: {e}")))?;

        let creds = Credentials::new(self.config.from.clone(), self.config.password.clone());
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.config.smtp_host)
            .map_err(|e| ClockError::Notify(format!("SMTP relay: {e}")))?
            .port(self.config.smtp_port)
            .credentials(creds)
            .build();

        mailer
            .send(email)
            .await
            .map_err(|e| ClockError::Notify(format!("SMTP send: {e}")))?;

        tracing::info!("📤 outcome mail sent to {to_addr}");
        Ok(())
    }
}

// ─── Webhook ──────────────────────────────────────────────

/// Generic HTTP webhook — POST with a JSON body.
pub struct WebhookNotifier {
    config: WebhookNotifyConfig,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(config: WebhookNotifyConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn notify(&self, user: &User, attempt: &Attempt) -> Result<()> {
        let resp = self
            .client
            .post(&self.config.url)
            .json(&serde_json::json!({
                "username": user.username,
                "attempt_id": attempt.id,
                "status": attempt.status.as_str(),
                "message": attempt.message,
                "scheduled_at": attempt.scheduled_at.to_rfc3339(),
                "executed_at": attempt.executed_at.map(|t| t.to_rfc3339()),
            }))
            .timeout(std::time::Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| ClockError::Notify(format!("Webhook send: {e}")))?;

        if !resp.status().is_success() {
            return Err(ClockError::Notify(format!(
                "Webhook error {}",
                resp.status()
            )));
        }
        tracing::info!("✅ webhook notified for attempt {}", attempt.id);
        Ok(())
    }
}
