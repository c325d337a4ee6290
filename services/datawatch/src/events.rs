//! Change events published to renderers
//!
//! Uses tokio::sync::broadcast for pub/sub. Payloads are immutable copies
//! (or shared `Arc`s) so a subscriber never observes a half-applied update.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::model::{Notification, Stats, StatusSnapshot};

/// A change a renderer may react to
#[derive(Debug, Clone)]
pub enum ChangeEvent {
    /// The whole snapshot was replaced by a pull
    SnapshotReplaced(Arc<StatusSnapshot>),
    /// One entry was inserted or patched by a push update
    EntryUpdated {
        id: String,
        snapshot: Arc<StatusSnapshot>,
    },
    StatsUpdated(Arc<Stats>),
    NotificationsChanged {
        notifications: Arc<Vec<Notification>>,
        unread: u32,
    },
    ConnectionStatusChanged(bool),
    /// A pull failed; the previous snapshot is still current
    RefreshFailed { reason: String },
    LoadingChanged(bool),
}

impl ChangeEvent {
    /// Short name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            ChangeEvent::SnapshotReplaced(_) => "snapshot_replaced",
            ChangeEvent::EntryUpdated { .. } => "entry_updated",
            ChangeEvent::StatsUpdated(_) => "stats_updated",
            ChangeEvent::NotificationsChanged { .. } => "notifications_changed",
            ChangeEvent::ConnectionStatusChanged(_) => "connection_status_changed",
            ChangeEvent::RefreshFailed { .. } => "refresh_failed",
            ChangeEvent::LoadingChanged(_) => "loading_changed",
        }
    }
}

/// Handle for publishing and subscribing to change events
#[derive(Debug, Clone)]
pub struct ChangeBus {
    sender: broadcast::Sender<ChangeEvent>,
}

impl ChangeBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers
    pub fn publish(&self, event: ChangeEvent) {
        tracing::trace!("Publishing {}", event.name());
        // No subscribers is not an error
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ChangeBus {
    fn default() -> Self {
        Self::new(256)
    }
}
