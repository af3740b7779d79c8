//! Best-effort webhook notifications.
//!
//! Delivery is fire-and-forget: a failed or slow webhook must never block
//! or fail the workflow, so every error is swallowed after a `warn!`.

use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, warn};

/// Severity channel for a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// A structured status event posted to the external channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub title: String,
    pub description: String,
    pub severity: Severity,
    pub link: Option<String>,
    pub fields: Vec<(String, String)>,
}

impl Notification {
    pub fn new(severity: Severity, title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            severity,
            link: None,
            fields: Vec::new(),
        }
    }

    pub fn info(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(Severity::Info, title, description)
    }

    pub fn warning(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(Severity::Warning, title, description)
    }

    pub fn error(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(Severity::Error, title, description)
    }

    pub fn with_link(mut self, link: impl Into<String>) -> Self {
        self.link = Some(link.into());
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }
}

/// Outbound notification channel. Implementations must not propagate
/// delivery failures.
pub trait NotificationSink {
    fn post(&self, notification: &Notification);
}

/// Sink posting JSON payloads to a webhook URL.
pub struct WebhookSink {
    url: String,
    client: reqwest::blocking::Client,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            url: url.into(),
            client,
        }
    }
}

impl NotificationSink for WebhookSink {
    fn post(&self, notification: &Notification) {
        let payload = json!({
            "title": notification.title,
            "description": notification.description,
            "severity": notification.severity,
            "link": notification.link,
            "fields": notification
                .fields
                .iter()
                .map(|(name, value)| json!({"name": name, "value": value}))
                .collect::<Vec<_>>(),
            "timestamp": Utc::now().to_rfc3339(),
        });
        match self.client.post(&self.url).json(&payload).send() {
            Ok(response) => debug!(status = %response.status(), "notification sent"),
            Err(err) => warn!(err = %err, "notification delivery failed"),
        }
    }
}

/// Sink used when no webhook is configured.
pub struct NullSink;

impl NotificationSink for NullSink {
    fn post(&self, notification: &Notification) {
        debug!(title = %notification.title, "notification suppressed (no webhook configured)");
    }
}

/// Build a sink from the configured webhook URL (empty disables delivery).
pub fn sink_for(url: &str) -> Box<dyn NotificationSink> {
    if url.trim().is_empty() {
        Box::new(NullSink)
    } else {
        Box::new(WebhookSink::new(url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_accumulates_fields_and_link() {
        let notification = Notification::info("Iteration started", "issue #4")
            .with_link("https://tracker.example/issues/4")
            .with_field("iteration", "1")
            .with_field("issue", "4");
        assert_eq!(notification.severity, Severity::Info);
        assert_eq!(notification.fields.len(), 2);
        assert!(notification.link.is_some());
    }

    #[test]
    fn unreachable_webhook_is_swallowed() {
        // Port 9 (discard) refuses connections; post must not panic or error.
        let sink = WebhookSink::new("http://127.0.0.1:9/hook");
        sink.post(&Notification::error("boom", "delivery should be swallowed"));
    }

    #[test]
    fn empty_url_selects_the_null_sink() {
        let sink = sink_for("   ");
        sink.post(&Notification::info("quiet", ""));
    }
}
