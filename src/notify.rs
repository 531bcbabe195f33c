//! # Notification Sink
//!
//! Fire-and-forget push channel informing interested observers (UI
//! sessions, downstream retrieval triggers) of status changes. Delivery
//! failures are logged and swallowed; they never escalate into a status
//! field or abort a loop iteration.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

/// Status-change notifications emitted by the loops
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Notification {
    /// Refresh every UI session scoped to one sharing service
    ServiceRefresh { sharing_service_id: i64 },
    /// A submitted report was confirmed under this name; downstream
    /// retrieval triggers key off it
    ConfirmedName { obj_id: String, name: String },
    /// Refresh observers of one follow-up request
    FollowupRefresh { followup_request_id: i64 },
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Best-effort delivery; implementations must never fail the caller
    async fn notify(&self, notification: Notification);
}

/// Notification with delivery metadata
#[derive(Debug, Clone)]
pub struct NotificationEvent {
    pub notification: Notification,
    pub published_at: chrono::DateTime<chrono::Utc>,
}

/// Broadcast-channel sink for in-process observers
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    sender: broadcast::Sender<NotificationEvent>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NotificationEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[async_trait]
impl NotificationSink for BroadcastNotifier {
    async fn notify(&self, notification: Notification) {
        let event = NotificationEvent {
            notification,
            published_at: chrono::Utc::now(),
        };
        // send() errors only when no subscribers exist, which is fine for
        // fire-and-forget delivery
        if let Err(broadcast::error::SendError(dropped)) = self.sender.send(event) {
            debug!(notification = ?dropped.notification, "No notification subscribers");
        }
    }
}
