//! Best-effort notifications: a chat message when an order comes in and an
//! email when it is ready for pickup.
//!
//! Delivery never blocks the request that caused it. The [`Dispatcher`]
//! spawns a detached task per notification and only logs the outcome.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::api::Order;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use log::{error, info};
use serde_json::json;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::config::SmtpConfig;

const SMTP_TIMEOUT: Duration = Duration::from_secs(60);
const SMTPS_PORT: u16 = 465;
const SENDER_NAME: &str = "Drinks Helper";

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("webhook request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("webhook answered {0}")]
    Rejected(reqwest::StatusCode),

    #[error("invalid email address: {0}")]
    Address(#[from] lettre::address::AddressError),

    #[error("could not build email: {0}")]
    Message(#[from] lettre::error::Error),

    #[error("smtp delivery failed: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// The notifier has no transport configured.
    Skipped,
}

#[async_trait]
pub trait ChatNotifier: Send + Sync {
    fn name(&self) -> &'static str;
    async fn order_placed(&self, name: &str, drink: &str) -> Result<Delivery, NotifyError>;
}

#[async_trait]
pub trait EmailNotifier: Send + Sync {
    fn name(&self) -> &'static str;
    async fn order_ready(
        &self,
        email: &str,
        name: &str,
        drink: &str,
    ) -> Result<Delivery, NotifyError>;
}

/// Posts to a Slack incoming webhook.
#[derive(Debug, Clone)]
pub struct SlackNotifier {
    client: reqwest::Client,
    webhook_url: Option<String>,
}

impl SlackNotifier {
    pub fn new(webhook_url: Option<String>) -> Self {
        SlackNotifier {
            client: reqwest::Client::new(),
            webhook_url,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.webhook_url.is_some()
    }
}

#[async_trait]
impl ChatNotifier for SlackNotifier {
    fn name(&self) -> &'static str {
        "slack"
    }

    async fn order_placed(&self, name: &str, drink: &str) -> Result<Delivery, NotifyError> {
        let Some(url) = &self.webhook_url else {
            return Ok(Delivery::Skipped);
        };
        let message = json!({
            "text": format!("🍹 *Drinks Request*\n*Name:* {}\n*Drink:* {}", name, drink),
        });
        let response = self.client.post(url).json(&message).send().await?;
        if !response.status().is_success() {
            return Err(NotifyError::Rejected(response.status()));
        }
        Ok(Delivery::Sent)
    }
}

/// Sends the "your drink is ready" email over SMTP. Without credentials it
/// sends nothing.
#[derive(Clone)]
pub struct SmtpNotifier {
    transport: Option<(AsyncSmtpTransport<Tokio1Executor>, Mailbox)>,
}

impl fmt::Debug for SmtpNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpNotifier")
            .field("configured", &self.is_configured())
            .finish()
    }
}

impl SmtpNotifier {
    pub fn new(config: &SmtpConfig) -> Result<Self, NotifyError> {
        let Some((user, pass)) = config.credentials() else {
            return Ok(SmtpNotifier { transport: None });
        };
        let builder = if config.port == SMTPS_PORT {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)?
        };
        let transport = builder
            .port(config.port)
            .credentials(Credentials::new(user.to_string(), pass.to_string()))
            .timeout(Some(SMTP_TIMEOUT))
            .build();
        let sender = Mailbox::new(Some(SENDER_NAME.to_string()), user.parse::<Address>()?);
        Ok(SmtpNotifier {
            transport: Some((transport, sender)),
        })
    }

    pub fn is_configured(&self) -> bool {
        self.transport.is_some()
    }
}

#[async_trait]
impl EmailNotifier for SmtpNotifier {
    fn name(&self) -> &'static str {
        "smtp"
    }

    async fn order_ready(
        &self,
        email: &str,
        name: &str,
        drink: &str,
    ) -> Result<Delivery, NotifyError> {
        let Some((transport, sender)) = &self.transport else {
            return Ok(Delivery::Skipped);
        };
        let message = Message::builder()
            .from(sender.clone())
            .to(email.parse::<Mailbox>()?)
            .subject("🍹 Your drink is ready!")
            .header(ContentType::TEXT_HTML)
            .body(ready_email(name, drink))?;
        transport.send(message).await?;
        Ok(Delivery::Sent)
    }
}

fn ready_email(name: &str, drink: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"></head>
<body style="font-family: sans-serif; background: #f4f4f8; padding: 24px;">
  <div style="max-width: 520px; margin: 0 auto; background: #fff; border-radius: 12px; padding: 32px; text-align: center;">
    <div style="font-size: 48px;">🍹</div>
    <h1 style="color: #333;">Your drink is ready!</h1>
    <p style="color: #555; font-size: 18px;">Hi {name}, your <strong>{drink}</strong> is ready for pickup.</p>
    <p style="color: #555;">Please come and collect your drink when you're ready!</p>
    <p style="color: #999; margin-top: 32px;">The Drinks Helper Team</p>
  </div>
</body>
</html>"#,
        name = escape_html(name),
        drink = escape_html(drink),
    )
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// Hands notifications to detached tasks. Callers get the join handle back
/// but never need to await it.
#[derive(Clone)]
pub struct Dispatcher {
    chat: Arc<dyn ChatNotifier>,
    email: Arc<dyn EmailNotifier>,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Dispatcher({}, {})", self.chat.name(), self.email.name())
    }
}

impl Dispatcher {
    pub fn new(chat: Arc<dyn ChatNotifier>, email: Arc<dyn EmailNotifier>) -> Self {
        Dispatcher { chat, email }
    }

    pub fn order_placed(&self, order: &Order) -> JoinHandle<()> {
        let chat = self.chat.clone();
        let (id, name, drink) = (order.id, order.name.clone(), order.drink.clone());
        tokio::spawn(async move {
            let outcome = chat.order_placed(&name, &drink).await;
            log_outcome(chat.name(), id, outcome);
        })
    }

    /// Only orders that carry an email address get one.
    pub fn order_ready(&self, order: &Order) -> Option<JoinHandle<()>> {
        let email = order.email.clone().filter(|e| !e.trim().is_empty())?;
        let notifier = self.email.clone();
        let (id, name, drink) = (order.id, order.name.clone(), order.drink.clone());
        Some(tokio::spawn(async move {
            let outcome = notifier.order_ready(&email, &name, &drink).await;
            log_outcome(notifier.name(), id, outcome);
        }))
    }
}

fn log_outcome(notifier: &str, order_id: u64, outcome: Result<Delivery, NotifyError>) {
    match outcome {
        Ok(Delivery::Sent) => info!("{} notification sent for order {}", notifier, order_id),
        Ok(Delivery::Skipped) => info!(
            "{} not configured, skipping notification for order {}",
            notifier, order_id
        ),
        Err(e) => error!(
            "{} notification for order {} failed: {}",
            notifier, order_id, e
        ),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Sent {
        Chat { name: String, drink: String },
        Email { email: String, name: String, drink: String },
    }

    /// Records every notification it is asked to deliver.
    pub struct Recorder {
        sent: UnboundedSender<Sent>,
    }

    #[async_trait]
    impl ChatNotifier for Recorder {
        fn name(&self) -> &'static str {
            "recorder"
        }

        async fn order_placed(&self, name: &str, drink: &str) -> Result<Delivery, NotifyError> {
            let _ = self.sent.send(Sent::Chat {
                name: name.to_string(),
                drink: drink.to_string(),
            });
            Ok(Delivery::Sent)
        }
    }

    #[async_trait]
    impl EmailNotifier for Recorder {
        fn name(&self) -> &'static str {
            "recorder"
        }

        async fn order_ready(
            &self,
            email: &str,
            name: &str,
            drink: &str,
        ) -> Result<Delivery, NotifyError> {
            let _ = self.sent.send(Sent::Email {
                email: email.to_string(),
                name: name.to_string(),
                drink: drink.to_string(),
            });
            Ok(Delivery::Sent)
        }
    }

    /// Fails every delivery after recording the attempt.
    pub struct Broken {
        attempts: UnboundedSender<Sent>,
    }

    #[async_trait]
    impl ChatNotifier for Broken {
        fn name(&self) -> &'static str {
            "broken"
        }

        async fn order_placed(&self, name: &str, drink: &str) -> Result<Delivery, NotifyError> {
            let _ = self.attempts.send(Sent::Chat {
                name: name.to_string(),
                drink: drink.to_string(),
            });
            Err(NotifyError::Rejected(reqwest::StatusCode::BAD_GATEWAY))
        }
    }

    #[async_trait]
    impl EmailNotifier for Broken {
        fn name(&self) -> &'static str {
            "broken"
        }

        async fn order_ready(
            &self,
            email: &str,
            name: &str,
            drink: &str,
        ) -> Result<Delivery, NotifyError> {
            let _ = self.attempts.send(Sent::Email {
                email: email.to_string(),
                name: name.to_string(),
                drink: drink.to_string(),
            });
            Err(NotifyError::Rejected(reqwest::StatusCode::SERVICE_UNAVAILABLE))
        }
    }

    /// Records the attempt, then never finishes delivering.
    pub struct Stalled {
        attempts: UnboundedSender<Sent>,
    }

    #[async_trait]
    impl ChatNotifier for Stalled {
        fn name(&self) -> &'static str {
            "stalled"
        }

        async fn order_placed(&self, name: &str, drink: &str) -> Result<Delivery, NotifyError> {
            let _ = self.attempts.send(Sent::Chat {
                name: name.to_string(),
                drink: drink.to_string(),
            });
            std::future::pending().await
        }
    }

    #[async_trait]
    impl EmailNotifier for Stalled {
        fn name(&self) -> &'static str {
            "stalled"
        }

        async fn order_ready(
            &self,
            email: &str,
            name: &str,
            drink: &str,
        ) -> Result<Delivery, NotifyError> {
            let _ = self.attempts.send(Sent::Email {
                email: email.to_string(),
                name: name.to_string(),
                drink: drink.to_string(),
            });
            std::future::pending().await
        }
    }

    pub fn recording() -> (Dispatcher, UnboundedReceiver<Sent>) {
        let (tx, rx) = unbounded_channel();
        let recorder = Arc::new(Recorder { sent: tx });
        (Dispatcher::new(recorder.clone(), recorder), rx)
    }

    pub fn broken() -> (Dispatcher, UnboundedReceiver<Sent>) {
        let (tx, rx) = unbounded_channel();
        let broken = Arc::new(Broken { attempts: tx });
        (Dispatcher::new(broken.clone(), broken), rx)
    }

    pub fn stalled() -> (Dispatcher, UnboundedReceiver<Sent>) {
        let (tx, rx) = unbounded_channel();
        let stalled = Arc::new(Stalled { attempts: tx });
        (Dispatcher::new(stalled.clone(), stalled), rx)
    }

    /// Waits for the next notification, giving up after a second.
    pub async fn next(rx: &mut UnboundedReceiver<Sent>) -> Option<Sent> {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .ok()
            .flatten()
    }

    /// Asserts nothing else shows up within a short grace period.
    pub async fn assert_quiet(rx: &mut UnboundedReceiver<Sent>) {
        let extra = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await;
        assert!(
            !matches!(extra, Ok(Some(_))),
            "unexpected notification: {:?}",
            extra
        );
    }
}
