//! BDD step definitions for the reconciliation feature

use chrono::{DateTime, TimeZone, Utc};
use cucumber::{given, then, when};

use datawatch::engine::{ConnectionAction, PushOutcome, ReconciliationEngine};
use datawatch::model::{DatasetRecord, DatasetStatus};
use datawatch::DatawatchError;

use crate::world::{id_list, DatawatchWorld};

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

fn record(id: &str) -> DatasetRecord {
    if id.is_empty() {
        DatasetRecord::default().status(DatasetStatus::Up)
    } else {
        DatasetRecord::with_id(id).status(DatasetStatus::Up)
    }
}

fn apply_pull(world: &mut DatawatchWorld, ids: &str) {
    let records = id_list(ids).iter().map(|id| record(id)).collect();
    let summary = world.engine().apply_pull_result(records, Utc::now());
    world.last_pull = Some(summary);
}

fn push(world: &mut DatawatchWorld, patch: DatasetRecord) {
    let result = world.engine().apply_push_update(patch);
    world.push_result = Some(result);
}

#[given("an empty reconciliation engine")]
fn empty_engine(world: &mut DatawatchWorld) {
    world.engine = Some(ReconciliationEngine::new(world.bus.clone()));
}

#[given(expr = "a pull returned datasets {string}")]
fn pulled_datasets(world: &mut DatawatchWorld, ids: String) {
    apply_pull(world, &ids);
}

#[when(expr = "a pull returns datasets {string}")]
fn pull_returns_datasets(world: &mut DatawatchWorld, ids: String) {
    apply_pull(world, &ids);
}

#[given(expr = "a pull returned dataset {string} up with latency {int} ms checked at {int}")]
fn pulled_detailed(world: &mut DatawatchWorld, id: String, latency: u32, checked: i64) {
    let record = record(&id)
        .latency_ms(f64::from(latency))
        .checked_at(at(checked));
    let summary = world.engine().apply_pull_result(vec![record], at(checked));
    world.last_pull = Some(summary);
}

#[when(expr = "a push reports dataset {string} as {string}")]
fn push_status(world: &mut DatawatchWorld, id: String, status: String) {
    push(
        world,
        DatasetRecord::with_id(id).status(DatasetStatus::from_wire(&status)),
    );
}

#[when(expr = "a push reports dataset {string} as {string} checked at {int}")]
fn push_status_at(world: &mut DatawatchWorld, id: String, status: String, checked: i64) {
    push(
        world,
        DatasetRecord::with_id(id)
            .status(DatasetStatus::from_wire(&status))
            .checked_at(at(checked)),
    );
}

#[given("the push channel connected and then dropped")]
fn connected_then_dropped(world: &mut DatawatchWorld) {
    let engine = world.engine();
    engine.on_connection_changed(true);
    engine.on_connection_changed(false);
}

#[when("the push channel reconnects")]
fn reconnects(world: &mut DatawatchWorld) {
    let action = world.engine().on_connection_changed(true);
    world.resync_requested = action == ConnectionAction::Resync;
}

#[then(expr = "the snapshot contains exactly {string}")]
fn snapshot_contains(world: &mut DatawatchWorld, ids: String) {
    let snapshot = world.engine().snapshot();
    let actual: Vec<&str> = snapshot.ids().collect();
    let expected = id_list(&ids);
    assert_eq!(actual, expected);
}

#[then(expr = "the last pull dropped {int} entry/entries")]
fn last_pull_dropped(world: &mut DatawatchWorld, dropped: usize) {
    let summary = world.last_pull.expect("no pull applied");
    assert_eq!(summary.dropped, dropped);
}

#[then(expr = "dataset {string} has status {string}")]
fn dataset_status(world: &mut DatawatchWorld, id: String, status: String) {
    let snapshot = world.engine().snapshot();
    let entry = snapshot.get(&id).expect("dataset missing from snapshot");
    assert_eq!(entry.status, DatasetStatus::from_wire(&status));
}

#[then(expr = "dataset {string} has latency {int} ms")]
fn dataset_latency(world: &mut DatawatchWorld, id: String, latency: u32) {
    let snapshot = world.engine().snapshot();
    let entry = snapshot.get(&id).expect("dataset missing from snapshot");
    assert_eq!(entry.latency_ms, Some(f64::from(latency)));
}

#[then("the push was rejected as stale")]
fn push_stale(world: &mut DatawatchWorld) {
    match world.push_result.as_ref().expect("no push applied") {
        Err(DatawatchError::StaleUpdate(_)) => {}
        other => panic!("expected a stale update, got {other:?}"),
    }
}

#[then("the push was deferred")]
fn push_deferred(world: &mut DatawatchWorld) {
    match world.push_result.as_ref().expect("no push applied") {
        Ok(PushOutcome::Deferred) => {}
        other => panic!("expected a deferred update, got {other:?}"),
    }
}

#[then("a resync is requested")]
fn resync_requested(world: &mut DatawatchWorld) {
    assert!(world.resync_requested);
    assert!(world.engine().is_resync_pending());
}
