//! Server status and new-mail announcements
//!
//! The backend pushes these next to the protocol events. They are not
//! recorded anywhere; each one becomes a transient notice.

use crate::channel::{EventHandler, PushChannel, SubscriptionId};
use crate::notice::NoticeLevel;
use maildcn_common::config::ChannelConfig;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

pub type Alert = (NoticeLevel, String);

/// Subscriptions to the announcement topics of one channel
pub struct AlertIngest {
    channel: Option<Arc<dyn PushChannel>>,
    subscriptions: Vec<SubscriptionId>,
}

impl AlertIngest {
    pub fn attach(
        channel: Option<Arc<dyn PushChannel>>,
        config: &ChannelConfig,
    ) -> (Self, mpsc::UnboundedReceiver<Alert>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let Some(channel) = channel else {
            return (
                Self {
                    channel: None,
                    subscriptions: Vec::new(),
                },
                rx,
            );
        };

        let topics: [(&str, fn(&Value) -> Option<Alert>); 2] = [
            (config.status_topic.as_str(), server_status),
            (config.mail_topic.as_str(), new_email),
        ];
        let subscriptions = topics
            .into_iter()
            .map(|(topic, describe)| {
                let tx = tx.clone();
                let handler: EventHandler = Arc::new(move |payload: &Value| {
                    if let Some(alert) = describe(payload) {
                        let _ = tx.send(alert);
                    }
                });
                channel.subscribe(topic, handler)
            })
            .collect();

        let ingest = Self {
            channel: Some(channel),
            subscriptions,
        };
        (ingest, rx)
    }

    pub fn detach(&mut self) {
        if let Some(channel) = self.channel.take() {
            for id in self.subscriptions.drain(..) {
                channel.unsubscribe(id);
            }
            debug!("Unsubscribed from announcements");
        }
    }
}

impl Drop for AlertIngest {
    fn drop(&mut self) {
        self.detach();
    }
}

/// `{"status": "started", "message": "..."}`
pub fn server_status(payload: &Value) -> Option<Alert> {
    let status = payload.get("status").and_then(Value::as_str)?;
    let message = payload
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("Servers {}", status));
    let level = match status {
        "started" | "stopped" => NoticeLevel::Info,
        _ => NoticeLevel::Warning,
    };
    Some((level, message))
}

/// `{"from", "subject", "is_spam", "keywords_detected"}`
pub fn new_email(payload: &Value) -> Option<Alert> {
    let from = payload.get("from").and_then(Value::as_str)?;
    let subject = payload
        .get("subject")
        .and_then(Value::as_str)
        .unwrap_or("(no subject)");

    if payload.get("is_spam").and_then(Value::as_bool) == Some(true) {
        let keywords = payload
            .get("keywords_detected")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        return Some((
            NoticeLevel::Warning,
            format!(
                "Spam from {}: {} ({} keywords flagged)",
                from, subject, keywords
            ),
        ));
    }
    Some((
        NoticeLevel::Info,
        format!("New email from {}: {}", from, subject),
    ))
}
