//! User-visible alerts raised by the agent and the coordinator.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

/// Title used when a push payload carries none.
pub const DEFAULT_TITLE: &str = "Worker App";

/// Body used when a push arrives without a payload.
pub const DEFAULT_PUSH_BODY: &str = "New notification!";

/// A single alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    /// Groups related alerts, e.g. `data-cached` or `sync-failed`.
    pub tag: Option<String>,
    /// RFC 3339 time the alert was raised.
    pub issued_at: String,
}

impl Notification {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self { title: title.into(), body: body.into(), tag: None, issued_at: Utc::now().to_rfc3339() }
    }

    pub fn tagged(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Build the alert for a push message.
    ///
    /// `{title, message}` JSON maps onto title and body. A missing payload
    /// yields the default body; a payload that is not that JSON shape yields
    /// an empty body so the user still sees something arrived.
    pub fn from_push(payload: Option<&[u8]>) -> Self {
        let Some(bytes) = payload else {
            return Self::new(DEFAULT_TITLE, DEFAULT_PUSH_BODY).tagged("push");
        };

        match serde_json::from_slice::<PushPayload>(bytes) {
            Ok(push) => Self::new(
                push.title.filter(|t| !t.trim().is_empty()).unwrap_or_else(|| DEFAULT_TITLE.to_string()),
                push.message.unwrap_or_default(),
            )
            .tagged("push"),
            Err(e) => {
                tracing::warn!(error = %e, "malformed push payload");
                Self::new(DEFAULT_TITLE, "").tagged("push")
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct PushPayload {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Somewhere alerts are delivered.
#[async_trait::async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn notify(&self, notification: Notification);
}

/// Writes alerts to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait::async_trait]
impl NotificationChannel for LogNotifier {
    async fn notify(&self, notification: Notification) {
        tracing::info!(
            title = %notification.title,
            body = %notification.body,
            tag = notification.tag.as_deref().unwrap_or(""),
            "notification"
        );
    }
}

/// Logs alerts and keeps them until drained.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    delivered: Mutex<Vec<Notification>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Alerts delivered so far, oldest first.
    pub async fn snapshot(&self) -> Vec<Notification> {
        self.delivered.lock().await.clone()
    }

    /// Take every alert delivered so far.
    pub async fn drain(&self) -> Vec<Notification> {
        std::mem::take(&mut *self.delivered.lock().await)
    }
}

#[async_trait::async_trait]
impl NotificationChannel for MemoryNotifier {
    async fn notify(&self, notification: Notification) {
        LogNotifier.notify(notification.clone()).await;
        self.delivered.lock().await.push(notification);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_with_payload() {
        let n = Notification::from_push(Some(br#"{"title": "Build done", "message": "All green"}"#));
        assert_eq!(n.title, "Build done");
        assert_eq!(n.body, "All green");
        assert_eq!(n.tag.as_deref(), Some("push"));
    }

    #[test]
    fn test_push_without_payload() {
        let n = Notification::from_push(None);
        assert_eq!(n.title, DEFAULT_TITLE);
        assert_eq!(n.body, DEFAULT_PUSH_BODY);
    }

    #[test]
    fn test_push_malformed_payload() {
        let n = Notification::from_push(Some(b"not json at all"));
        assert_eq!(n.title, DEFAULT_TITLE);
        assert_eq!(n.body, "");

        let n = Notification::from_push(Some(b"[1, 2, 3]"));
        assert_eq!(n.body, "");
    }

    #[test]
    fn test_push_partial_payload() {
        let n = Notification::from_push(Some(br#"{"message": "no title"}"#));
        assert_eq!(n.title, DEFAULT_TITLE);
        assert_eq!(n.body, "no title");
    }

    #[tokio::test]
    async fn test_memory_notifier_drain() {
        let notifier = MemoryNotifier::new();
        notifier.notify(Notification::new("a", "1")).await;
        notifier.notify(Notification::new("b", "2").tagged("x")).await;

        assert_eq!(notifier.snapshot().await.len(), 2);
        let drained = notifier.drain().await;
        assert_eq!(drained[0].title, "a");
        assert_eq!(drained[1].tag.as_deref(), Some("x"));
        assert!(notifier.snapshot().await.is_empty());
    }
}
