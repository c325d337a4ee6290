//! Bounded, newest-first notification feed with an unread counter

use std::collections::VecDeque;
use std::sync::Arc;

use crate::events::{ChangeBus, ChangeEvent};
use crate::model::Notification;

/// Ordered log of push-delivered alerts.
///
/// The unread counter tracks the read flags locally until the server sends
/// an authoritative count, which always replaces the local value.
#[derive(Debug)]
pub struct NotificationBuffer {
    items: VecDeque<Notification>,
    max_size: usize,
    unread: u32,
    bus: ChangeBus,
}

impl NotificationBuffer {
    pub fn new(max_size: usize, bus: ChangeBus) -> Self {
        let max_size = max_size.max(1);
        Self {
            items: VecDeque::with_capacity(max_size),
            max_size,
            unread: 0,
            bus,
        }
    }

    /// Insert at the front, evicting from the tail past the cap
    pub fn push(&mut self, notification: Notification, authoritative_unread: Option<u32>) {
        let mut local = self.unread;

        if let Some(pos) = self.items.iter().position(|n| n.id == notification.id) {
            if let Some(previous) = self.items.remove(pos) {
                if !previous.read {
                    local = local.saturating_sub(1);
                }
            }
        }

        if !notification.read {
            local = local.saturating_add(1);
        }
        tracing::debug!(
            "Notification '{}' ({}): {}",
            notification.id,
            notification.kind,
            notification.title
        );
        self.items.push_front(notification);

        while self.items.len() > self.max_size {
            if let Some(evicted) = self.items.pop_back() {
                tracing::debug!("Evicting notification '{}'", evicted.id);
                if !evicted.read {
                    local = local.saturating_sub(1);
                }
            }
        }

        self.unread = authoritative_unread.unwrap_or(local);
        self.emit();
    }

    /// Mark one notification read. Returns false if it is absent or was
    /// already read.
    pub fn mark_read(&mut self, id: &str) -> bool {
        let Some(notification) = self.items.iter_mut().find(|n| n.id == id) else {
            tracing::debug!("mark_read: notification '{}' not in buffer", id);
            return false;
        };
        if notification.read {
            return false;
        }
        notification.read = true;
        self.unread = self.unread.saturating_sub(1);
        self.emit();
        true
    }

    /// Apply the server's unread count
    pub fn set_unread_count(&mut self, count: u32) {
        if self.unread != count {
            self.unread = count;
            self.emit();
        }
    }

    /// Empty the buffer and reset the unread count
    pub fn clear(&mut self) {
        self.items.clear();
        self.unread = 0;
        self.emit();
    }

    /// Replace the whole feed (initial bulk load), keeping the given read
    /// flags. Input is expected newest-first.
    pub fn replace_all(&mut self, notifications: Vec<Notification>, unread_count: u32) {
        self.items = notifications.into_iter().take(self.max_size).collect();
        self.unread = unread_count;
        self.emit();
    }

    pub fn unread_count(&self) -> u32 {
        self.unread
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn get(&self, id: &str) -> Option<&Notification> {
        self.items.iter().find(|n| n.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Notification> {
        self.items.iter()
    }

    pub fn to_vec(&self) -> Vec<Notification> {
        self.items.iter().cloned().collect()
    }

    fn emit(&self) {
        self.bus.publish(ChangeEvent::NotificationsChanged {
            notifications: Arc::new(self.to_vec()),
            unread: self.unread,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::TryRecvError;

    fn note(id: &str) -> Notification {
        Notification::new(id, format!("title {id}"), "message")
    }

    fn ids(buffer: &NotificationBuffer) -> Vec<&str> {
        buffer.iter().map(|n| n.id.as_str()).collect()
    }

    #[test]
    fn push_is_newest_first_and_counts_unread() {
        let mut buffer = NotificationBuffer::new(10, ChangeBus::default());
        buffer.push(note("a"), None);
        buffer.push(note("b"), None);

        assert_eq!(ids(&buffer), vec!["b", "a"]);
        assert_eq!(buffer.unread_count(), 2);
    }

    #[test]
    fn cap_evicts_oldest() {
        let mut buffer = NotificationBuffer::new(3, ChangeBus::default());
        for id in ["a", "b", "c", "d"] {
            buffer.push(note(id), None);
        }

        assert_eq!(ids(&buffer), vec!["d", "c", "b"]);
        assert_eq!(buffer.unread_count(), 3);
    }

    #[test]
    fn authoritative_count_overrides_local() {
        let mut buffer = NotificationBuffer::new(10, ChangeBus::default());
        buffer.push(note("a"), None);
        buffer.push(note("b"), Some(7));
        assert_eq!(buffer.unread_count(), 7);

        buffer.mark_read("a");
        assert_eq!(buffer.unread_count(), 6);

        buffer.set_unread_count(1);
        assert_eq!(buffer.unread_count(), 1);
    }

    #[test]
    fn repeated_id_moves_to_front_without_duplicating() {
        let mut buffer = NotificationBuffer::new(10, ChangeBus::default());
        buffer.push(note("a"), None);
        buffer.push(note("b"), None);
        buffer.push(note("a"), None);

        assert_eq!(ids(&buffer), vec!["a", "b"]);
        assert_eq!(buffer.unread_count(), 2);
    }

    #[test]
    fn mark_read_absent_id_is_noop() {
        let mut buffer = NotificationBuffer::new(10, ChangeBus::default());
        buffer.push(note("a"), None);

        assert!(!buffer.mark_read("gone"));
        assert_eq!(buffer.unread_count(), 1);

        assert!(buffer.mark_read("a"));
        assert!(!buffer.mark_read("a"));
        assert_eq!(buffer.unread_count(), 0);
        assert!(buffer.get("a").unwrap().read);
    }

    #[test]
    fn clear_is_idempotent() {
        let mut buffer = NotificationBuffer::new(10, ChangeBus::default());
        buffer.push(note("a"), Some(4));

        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.unread_count(), 0);

        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.unread_count(), 0);
    }

    #[test]
    fn replace_all_preserves_read_flags_and_truncates() {
        let mut buffer = NotificationBuffer::new(2, ChangeBus::default());
        let mut read = note("x");
        read.read = true;

        buffer.replace_all(vec![read, note("y"), note("z")], 5);

        assert_eq!(ids(&buffer), vec!["x", "y"]);
        assert!(buffer.get("x").unwrap().read);
        assert_eq!(buffer.unread_count(), 5);
    }

    #[test]
    fn zero_cap_is_raised_to_one() {
        let buffer = NotificationBuffer::new(0, ChangeBus::default());
        assert_eq!(buffer.max_size(), 1);
    }

    #[test]
    fn each_mutation_emits_one_event() {
        let bus = ChangeBus::new(16);
        let mut rx = bus.subscribe();
        let mut buffer = NotificationBuffer::new(10, bus);

        buffer.push(note("a"), None);
        buffer.clear();

        for expected_unread in [1, 0] {
            match rx.try_recv().unwrap() {
                ChangeEvent::NotificationsChanged { unread, .. } => {
                    assert_eq!(unread, expected_unread)
                }
                other => panic!("unexpected event {other:?}"),
            }
        }
        assert_eq!(rx.try_recv().unwrap_err(), TryRecvError::Empty);
    }
}
