//! Telegram notifications: error alerts, business events, incoming calls
//! and technician feedback.
//!
//! Delivery never blocks a request. Handlers call [`Notifier::spawn_send`],
//! and `ERROR`-level log events reach the chat through [`TelegramAlertLayer`].

use std::fmt::{self, Write as _};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use crate::config::TelegramConfig;

const TELEGRAM_API: &str = "https://api.telegram.org";
const SEND_TIMEOUT: Duration = Duration::from_secs(10);
const ALERT_QUEUE: usize = 100;

struct TelegramClient {
    http: reqwest::Client,
    url: String,
    chat_id: String,
}

/// Sends HTML messages to the configured Telegram chat. A notifier built
/// without credentials accepts messages and drops them.
#[derive(Clone)]
pub struct Notifier {
    client: Option<Arc<TelegramClient>>,
}

impl Notifier {
    pub fn new(config: Option<&TelegramConfig>) -> Self {
        let client = config.map(|cfg| {
            let http = reqwest::Client::builder()
                .timeout(SEND_TIMEOUT)
                .build()
                .unwrap_or_else(|_| reqwest::Client::new());
            Arc::new(TelegramClient {
                http,
                url: format!("{}/bot{}/sendMessage", TELEGRAM_API, cfg.bot_token),
                chat_id: cfg.chat_id.clone(),
            })
        });
        Self { client }
    }

    pub fn disabled() -> Self {
        Self { client: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.client.is_some()
    }

    /// Send a message and report whether Telegram accepted it.
    ///
    /// Failures are logged at `WARN` so they never loop back through the
    /// alert layer.
    pub async fn send(&self, text: &str) -> bool {
        let Some(client) = &self.client else {
            return false;
        };

        let body = serde_json::json!({
            "chat_id": client.chat_id,
            "text": text,
            "parse_mode": "HTML",
        });

        match client.http.post(&client.url).json(&body).send().await {
            Ok(resp) if resp.status().is_success() => {
                tracing::debug!("Telegram message sent");
                true
            }
            Ok(resp) => {
                tracing::warn!(status = %resp.status(), "Telegram rejected message");
                false
            }
            Err(e) => {
                tracing::warn!("Failed to send Telegram message: {}", e);
                false
            }
        }
    }

    /// Fire-and-forget delivery from request handlers.
    pub fn spawn_send(&self, text: String) {
        if !self.is_enabled() {
            return;
        }
        let notifier = self.clone();
        tokio::spawn(async move {
            notifier.send(&text).await;
        });
    }
}

// ============================================================
// Message formatting
// ============================================================

/// Business events worth a message in the operations chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusinessEvent {
    NewRequest,
    Payment,
    Login,
    Error,
    Warning,
    Info,
    Success,
}

impl BusinessEvent {
    fn emoji(&self) -> &'static str {
        match self {
            Self::NewRequest => "📝",
            Self::Payment => "💰",
            Self::Login => "🔐",
            Self::Error => "🚨",
            Self::Warning => "⚠️",
            Self::Info => "ℹ️",
            Self::Success => "✅",
        }
    }

    fn title(&self) -> &'static str {
        match self {
            Self::NewRequest => "NEW REQUEST",
            Self::Payment => "PAYMENT",
            Self::Login => "LOGIN",
            Self::Error => "ERROR",
            Self::Warning => "WARNING",
            Self::Info => "INFO",
            Self::Success => "SUCCESS",
        }
    }
}

pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn timestamp() -> String {
    Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

fn push_details(message: &mut String, heading: &str, details: &[(&str, String)]) {
    if details.is_empty() {
        return;
    }
    let _ = write!(message, "\n📋 <b>{}:</b>\n", heading);
    for (key, value) in details {
        let _ = writeln!(message, "• {}: {}", escape_html(key), escape_html(value));
    }
}

pub fn format_error_alert(
    error: &str,
    path: Option<&str>,
    user: Option<&str>,
    details: &[(&str, String)],
) -> String {
    let mut message = String::from("🚨 <b>CRM ERROR</b>\n\n");
    let _ = writeln!(message, "⏰ <b>Time:</b> {}", timestamp());
    let _ = writeln!(message, "❌ <b>Error:</b> {}", escape_html(error));
    if let Some(path) = path {
        let _ = writeln!(message, "🔗 <b>Path:</b> {}", escape_html(path));
    }
    if let Some(user) = user {
        let _ = writeln!(message, "👤 <b>User:</b> {}", escape_html(user));
    }
    push_details(&mut message, "Details", details);
    message
}

pub fn format_business_alert(
    event: BusinessEvent,
    description: &str,
    user: Option<&str>,
    details: &[(&str, String)],
) -> String {
    let mut message = format!("{} <b>{}</b>\n\n", event.emoji(), event.title());
    let _ = writeln!(message, "⏰ <b>Time:</b> {}", timestamp());
    let _ = writeln!(message, "📄 <b>Description:</b> {}", escape_html(description));
    if let Some(user) = user {
        let _ = writeln!(message, "👤 <b>User:</b> {}", escape_html(user));
    }
    push_details(&mut message, "Details", details);
    message
}

pub fn format_incoming_call(caller: &str, line: &str, request_id: &str, reused: bool) -> String {
    let mut message = String::from("📞 <b>INCOMING CALL</b>\n\n");
    let _ = writeln!(message, "⏰ <b>Time:</b> {}", timestamp());
    let _ = writeln!(message, "👤 <b>Caller:</b> {}", escape_html(caller));
    let _ = writeln!(message, "☎️ <b>Line:</b> {}", escape_html(line));
    let action = if reused { "existing request" } else { "new request" };
    let _ = writeln!(message, "📝 <b>{}:</b> {}", action, escape_html(request_id));
    message
}

pub fn format_feedback(author: &str, login: &str, text: &str) -> String {
    let mut message = String::from("💬 <b>FEEDBACK</b>\n\n");
    let _ = writeln!(message, "⏰ <b>Time:</b> {}", timestamp());
    let _ = writeln!(
        message,
        "👤 <b>From:</b> {} ({})",
        escape_html(author),
        escape_html(login)
    );
    let _ = write!(message, "\n{}", escape_html(text));
    message
}

// ============================================================
// Error alert layer
// ============================================================

#[derive(Default)]
struct AlertVisitor {
    message: String,
    fields: Vec<(String, String)>,
}

impl Visit for AlertVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.push((field.name().to_string(), value.to_string()));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else {
            self.fields
                .push((field.name().to_string(), format!("{:?}", value)));
        }
    }
}

/// Forwards `ERROR` events to Telegram through a bounded queue drained by a
/// background task. Alerts are dropped when the queue is full.
pub struct TelegramAlertLayer {
    tx: mpsc::Sender<String>,
}

impl TelegramAlertLayer {
    /// Spawn the delivery task. Must be called inside a Tokio runtime.
    pub fn spawn(notifier: Notifier) -> Self {
        let (tx, mut rx) = mpsc::channel::<String>(ALERT_QUEUE);
        tokio::spawn(async move {
            while let Some(text) = rx.recv().await {
                notifier.send(&text).await;
            }
        });
        Self { tx }
    }
}

impl<S: Subscriber> Layer<S> for TelegramAlertLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if *metadata.level() != Level::ERROR || metadata.target().starts_with(module_path!()) {
            return;
        }

        let mut visitor = AlertVisitor::default();
        event.record(&mut visitor);

        let mut details: Vec<(&str, String)> = visitor
            .fields
            .iter()
            .map(|(k, v)| (k.as_str(), v.clone()))
            .collect();
        details.push(("target", metadata.target().to_string()));

        let text = format_error_alert(&visitor.message, None, None, &details);
        let _ = self.tx.try_send(text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_alert_lists_path_user_and_details() {
        let text = format_error_alert(
            "database is locked",
            Some("/api/v1/requests"),
            Some("admin"),
            &[("request_id", "42".to_string())],
        );
        assert!(text.starts_with("🚨 <b>CRM ERROR</b>"));
        assert!(text.contains("<b>Path:</b> /api/v1/requests"));
        assert!(text.contains("<b>User:</b> admin"));
        assert!(text.contains("• request_id: 42"));
    }

    #[test]
    fn business_alert_uses_event_emoji() {
        let text = format_business_alert(BusinessEvent::Payment, "Payout created", None, &[]);
        assert!(text.starts_with("💰 <b>PAYMENT</b>"));
        assert!(!text.contains("Details"));
    }

    #[test]
    fn user_text_is_escaped() {
        let text = format_feedback("Ivan", "ivan", "<script>&</script>");
        assert!(text.contains("&lt;script&gt;&amp;&lt;/script&gt;"));
    }

    #[tokio::test]
    async fn disabled_notifier_drops_messages() {
        let notifier = Notifier::disabled();
        assert!(!notifier.is_enabled());
        assert!(!notifier.send("hello").await);
    }
}
