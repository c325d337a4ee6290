//! BDD step definitions for the dashboard feature

use std::sync::atomic::Ordering;
use std::sync::Arc;

use cucumber::{given, then, when};

use datawatch::model::{DatasetRecord, DatasetStatus};
use datawatch::push::PushEvent;
use datawatch::transport::Transport;
use datawatch::{ChangeEvent, Config, Dashboard};

use crate::world::{id_list, DatawatchWorld};

fn rows(ids: &str) -> Vec<DatasetRecord> {
    id_list(ids)
        .into_iter()
        .map(|id| DatasetRecord::with_id(id).status(DatasetStatus::Up))
        .collect()
}

#[given(expr = "a server reporting datasets {string}")]
fn server_reporting(world: &mut DatawatchWorld, ids: String) {
    world.transport.report(rows(&ids));
}

#[given("a dashboard connected to it")]
fn dashboard_connected(world: &mut DatawatchWorld) {
    let transport: Arc<dyn Transport> = world.transport.clone();
    world.events = Some(world.bus.subscribe());
    world.dashboard = Some(Arc::new(Dashboard::new(
        Config::default(),
        transport,
        world.bus.clone(),
    )));
}

#[given("the dashboard has refreshed")]
async fn dashboard_refreshed(world: &mut DatawatchWorld) {
    world.dashboard().refresh().await.unwrap();
    world.drain_events();
}

#[given("live updates connected and then dropped")]
async fn live_connected_then_dropped(world: &mut DatawatchWorld) {
    let dashboard = world.dashboard();
    dashboard.handle_push(PushEvent::Connected).await;
    dashboard.handle_push(PushEvent::Disconnected).await;
}

#[given("a refresh is waiting on the server")]
async fn refresh_waiting(world: &mut DatawatchWorld) {
    let dashboard = world.dashboard();
    let before = world.transport.status_requests();
    world.transport.hold.store(true, Ordering::SeqCst);
    world.pending_refresh = Some(tokio::spawn(async move { dashboard.refresh().await }));
    while world.transport.status_requests() == before {
        tokio::task::yield_now().await;
    }
}

#[when("two refreshes are requested at once")]
async fn two_refreshes(world: &mut DatawatchWorld) {
    let dashboard = world.dashboard();
    let (first, second) = tokio::join!(dashboard.refresh(), dashboard.refresh());
    world.refresh_results = vec![first, second];
}

#[when("the dashboard refreshes")]
async fn dashboard_refreshes(world: &mut DatawatchWorld) {
    let result = world.dashboard().refresh().await;
    world.refresh_results.push(result);
}

#[when("the server becomes unavailable")]
fn server_unavailable(world: &mut DatawatchWorld) {
    world.transport.failing.store(true, Ordering::SeqCst);
}

#[when(expr = "the server starts reporting datasets {string}")]
fn server_starts_reporting(world: &mut DatawatchWorld, ids: String) {
    world.transport.report(rows(&ids));
}

#[when("live updates reconnect")]
async fn live_reconnect(world: &mut DatawatchWorld) {
    world.dashboard().handle_push(PushEvent::Connected).await;
}

#[when("live updates reconnect while that refresh is waiting")]
async fn live_reconnect_during_refresh(world: &mut DatawatchWorld) {
    let dashboard = world.dashboard();
    let reconnect = {
        let dashboard = Arc::clone(&dashboard);
        tokio::spawn(async move { dashboard.handle_push(PushEvent::Connected).await })
    };
    while !dashboard.is_resync_pending().await {
        tokio::task::yield_now().await;
    }
    world.transport.release.notify_one();
    reconnect.await.unwrap();

    let pending = world.pending_refresh.take().expect("no refresh waiting");
    world.refresh_results.push(pending.await.unwrap());
}

#[when(expr = "a live update reports dataset {string} as {string}")]
async fn live_update(world: &mut DatawatchWorld, id: String, status: String) {
    world
        .dashboard()
        .handle_push(PushEvent::DatasetUpdated(
            DatasetRecord::with_id(id).status(DatasetStatus::from_wire(&status)),
        ))
        .await;
}

#[when(expr = "the history of {string} is requested")]
async fn history_requested(world: &mut DatawatchWorld, id: String) {
    let history = world.dashboard().history(&id, None).await.unwrap();
    world.history = Some(history);
}

#[then(expr = "the server received {int} status request(s)")]
fn status_requests(world: &mut DatawatchWorld, count: usize) {
    assert_eq!(world.transport.status_requests(), count);
}

#[then(expr = "every refresh applied {int} entries")]
fn every_refresh_applied(world: &mut DatawatchWorld, count: usize) {
    assert!(!world.refresh_results.is_empty());
    for result in &world.refresh_results {
        let summary = result.as_ref().expect("refresh failed");
        assert_eq!(summary.applied, count);
    }
}

#[then("the refresh failed")]
fn refresh_failed(world: &mut DatawatchWorld) {
    let last = world.refresh_results.last().expect("no refresh requested");
    assert!(last.is_err(), "expected failure, got {last:?}");
}

#[then(expr = "the dashboard shows datasets {string}")]
async fn dashboard_shows(world: &mut DatawatchWorld, ids: String) {
    let snapshot = world.dashboard().snapshot().await;
    let actual: Vec<&str> = snapshot.ids().collect();
    assert_eq!(actual, id_list(&ids));
}

#[then(expr = "the dashboard shows dataset {string} as {string}")]
async fn dashboard_shows_status(world: &mut DatawatchWorld, id: String, status: String) {
    let snapshot = world.dashboard().snapshot().await;
    let entry = snapshot.get(&id).expect("dataset missing from snapshot");
    assert_eq!(entry.status, DatasetStatus::from_wire(&status));
}

#[then("a refresh failure was announced")]
fn failure_announced(world: &mut DatawatchWorld) {
    let events = world.drain_events();
    assert!(
        events
            .iter()
            .any(|e| matches!(e, ChangeEvent::RefreshFailed { .. })),
        "no RefreshFailed among {events:?}"
    );
}

#[then("the history is empty")]
fn history_empty(world: &mut DatawatchWorld) {
    assert!(world.history.as_ref().expect("no history requested").is_empty());
}
