use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use strum_macros::{AsRefStr, Display};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NotificationKind {
    Submitted,
    Approved,
    Rejected,
    Reverted,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub recipient_id: u64,
    pub kind: NotificationKind,
    pub request_id: u64,
    pub requester_id: u64,
    pub at: DateTime<Utc>,
}

/// Best-effort delivery. Called after the change has committed and must not
/// block or fail the caller.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Bounded queue in front of a background dispatcher.
pub struct ChannelNotifier {
    tx: mpsc::Sender<Notification>,
}

impl ChannelNotifier {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Notification>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl NotificationSink for ChannelNotifier {
    fn notify(&self, notification: Notification) {
        match self.tx.try_send(notification) {
            Ok(()) => {}
            Err(TrySendError::Full(n)) => tracing::warn!(
                recipient_id = n.recipient_id,
                kind = %n.kind,
                request_id = n.request_id,
                "Notification queue full; event dropped"
            ),
            Err(TrySendError::Closed(n)) => tracing::warn!(
                recipient_id = n.recipient_id,
                kind = %n.kind,
                request_id = n.request_id,
                "Notification dispatcher gone; event dropped"
            ),
        }
    }
}

/// Drains the queue until every sender is dropped. Delivery is currently
/// the structured log line; push/email transports hang off this loop.
pub fn spawn_dispatcher(mut rx: mpsc::Receiver<Notification>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(n) = rx.recv().await {
            tracing::info!(
                target: "notifications",
                recipient_id = n.recipient_id,
                kind = %n.kind,
                request_id = n.request_id,
                requester_id = n.requester_id,
                at = %n.at,
                "Notification delivered"
            );
        }
        tracing::info!("Notification dispatcher stopped");
    })
}

/// Keeps every notification in memory.
#[derive(Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl NotificationSink for RecordingSink {
    fn notify(&self, notification: Notification) {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(notification);
    }
}
