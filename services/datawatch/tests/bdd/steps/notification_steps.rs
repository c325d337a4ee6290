//! BDD step definitions for the notification feed feature

use cucumber::{given, then, when};

use datawatch::model::Notification;
use datawatch::notifications::NotificationBuffer;

use crate::world::{id_list, DatawatchWorld};

fn note(id: &str) -> Notification {
    Notification::new(id, format!("Dataset alert {id}"), "status changed")
}

#[given(expr = "a notification feed holding at most {int} entries")]
fn feed_with_cap(world: &mut DatawatchWorld, cap: usize) {
    world.buffer = Some(NotificationBuffer::new(cap, world.bus.clone()));
}

#[when(expr = "notifications {string} arrive")]
fn notifications_arrive(world: &mut DatawatchWorld, ids: String) {
    for id in id_list(&ids) {
        world.buffer().push(note(&id), None);
    }
}

#[when(expr = "notification {string} arrives with server unread count {int}")]
fn notification_with_count(world: &mut DatawatchWorld, id: String, count: u32) {
    world.buffer().push(note(&id), Some(count));
}

#[when(expr = "notification {string} is marked read")]
fn mark_read(world: &mut DatawatchWorld, id: String) {
    world.buffer().mark_read(&id);
}

#[when("the feed is cleared")]
fn clear_feed(world: &mut DatawatchWorld) {
    world.buffer().clear();
}

#[then(expr = "the feed lists {string}")]
fn feed_lists(world: &mut DatawatchWorld, ids: String) {
    let actual: Vec<String> = world.buffer().iter().map(|n| n.id.clone()).collect();
    assert_eq!(actual, id_list(&ids));
}

#[then("the feed is empty")]
fn feed_empty(world: &mut DatawatchWorld) {
    assert!(world.buffer().is_empty());
}

#[then(expr = "the unread count is {int}")]
fn unread_count(world: &mut DatawatchWorld, count: u32) {
    assert_eq!(world.buffer().unread_count(), count);
}
