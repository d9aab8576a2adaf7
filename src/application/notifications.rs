use serde::Serialize;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::debug;

pub const DISMISS_AFTER: Duration = Duration::from_secs(4);

pub const SUCCESS_SYNC_COMPLETE: &str = "success_sync_complete";
pub const ERROR_SYNC_FAILED: &str = "error_sync_failed";
pub const ERROR_NETWORK_OFFLINE: &str = "error_network_offline";
pub const INFO_NETWORK_ONLINE: &str = "info_network_online";
pub const LOGGED_OUT_SUCCESS: &str = "logged_out_success";
pub const ERROR_SAVE_FAILED: &str = "error_save_failed";
pub const SUCCESS_IMPORT_COMPLETE: &str = "success_import_complete";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Success,
    Info,
    Error,
}

/// A short transient message; `key` is translated by the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub kind: NotificationKind,
    pub key: String,
    #[serde(with = "duration_millis")]
    pub dismiss_after: Duration,
}

impl Notification {
    pub fn new(kind: NotificationKind, key: &str) -> Self {
        Self {
            kind,
            key: key.to_string(),
            dismiss_after: DISMISS_AFTER,
        }
    }
}

pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: Notification);

    fn success(&self, key: &str) {
        self.notify(Notification::new(NotificationKind::Success, key));
    }

    fn info(&self, key: &str) {
        self.notify(Notification::new(NotificationKind::Info, key));
    }

    fn error(&self, key: &str) {
        self.notify(Notification::new(NotificationKind::Error, key));
    }
}

/// Fan-out to any number of host subscribers. Notifications sent while
/// nobody listens are dropped.
#[derive(Debug)]
pub struct BroadcastNotifier {
    sender: broadcast::Sender<Notification>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(32)
    }
}

impl NotificationSink for BroadcastNotifier {
    fn notify(&self, notification: Notification) {
        if self.sender.send(notification).is_err() {
            debug!("notification dropped: no subscribers");
        }
    }
}

#[derive(Debug, Default)]
pub struct InMemoryNotifier {
    received: Mutex<Vec<Notification>>,
}

impl InMemoryNotifier {
    pub fn received(&self) -> Vec<Notification> {
        self.received
            .lock()
            .map(|received| received.clone())
            .unwrap_or_default()
    }

    pub fn keys(&self) -> Vec<String> {
        self.received()
            .into_iter()
            .map(|notification| notification.key)
            .collect()
    }
}

impl NotificationSink for InMemoryNotifier {
    fn notify(&self, notification: Notification) {
        if let Ok(mut received) = self.received.lock() {
            received.push(notification);
        }
    }
}

mod duration_millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }
}
