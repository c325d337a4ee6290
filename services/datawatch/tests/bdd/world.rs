//! BDD test world for datawatch

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cucumber::World;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;

use datawatch::engine::{PullSummary, PushOutcome, ReconciliationEngine};
use datawatch::model::{Category, DatasetRecord, HistoryEntry, Stats};
use datawatch::notifications::NotificationBuffer;
use datawatch::transport::{
    ForceCheckAck, MarkReadAck, NotificationPage, PullResult, Transport,
};
use datawatch::{ChangeBus, ChangeEvent, Dashboard, DatawatchError};

/// In-memory back end with a switchable failure mode.
///
/// A status request answers with the rows current when it arrived; with
/// `hold` set, the next one waits for `release` before answering.
#[derive(Debug, Default)]
pub struct FakeTransport {
    pub rows: Mutex<Vec<DatasetRecord>>,
    pub failing: AtomicBool,
    pub status_requests: AtomicUsize,
    pub hold: AtomicBool,
    pub release: Notify,
}

impl FakeTransport {
    pub fn report(&self, rows: Vec<DatasetRecord>) {
        *self.rows.lock().unwrap() = rows;
    }

    pub fn status_requests(&self) -> usize {
        self.status_requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn pull_status(&self) -> datawatch::Result<PullResult> {
        let entries = self.rows.lock().unwrap().clone();
        self.status_requests.fetch_add(1, Ordering::SeqCst);
        if self.hold.swap(false, Ordering::SeqCst) {
            self.release.notified().await;
        }
        tokio::task::yield_now().await;
        if self.failing.load(Ordering::SeqCst) {
            return Err(DatawatchError::Transport("server unavailable".to_string()));
        }
        Ok(PullResult {
            entries,
            last_updated: None,
            dropped: 0,
        })
    }

    async fn pull_stats(&self, _hours: u32) -> datawatch::Result<Stats> {
        Ok(Stats::default())
    }

    async fn pull_categories(&self) -> datawatch::Result<Vec<Category>> {
        Ok(Vec::new())
    }

    async fn pull_history(&self, _id: &str, _hours: u32) -> datawatch::Result<Vec<HistoryEntry>> {
        Ok(Vec::new())
    }

    async fn request_force_check(&self) -> datawatch::Result<ForceCheckAck> {
        Ok(ForceCheckAck::default())
    }

    async fn pull_notifications(&self, _limit: usize) -> datawatch::Result<NotificationPage> {
        Ok(NotificationPage::default())
    }

    async fn mark_notification_read(&self, _id: &str) -> datawatch::Result<MarkReadAck> {
        Ok(MarkReadAck::default())
    }

    async fn clear_notifications(&self) -> datawatch::Result<()> {
        Ok(())
    }

    async fn health(&self) -> datawatch::Result<serde_json::Value> {
        Ok(serde_json::json!({"status": "healthy"}))
    }
}

#[derive(Debug, Default, World)]
pub struct DatawatchWorld {
    pub bus: ChangeBus,
    pub events: Option<broadcast::Receiver<ChangeEvent>>,

    // Reconciliation testing
    pub engine: Option<ReconciliationEngine>,
    pub last_pull: Option<PullSummary>,
    pub push_result: Option<datawatch::Result<PushOutcome>>,
    pub resync_requested: bool,

    // Notification testing
    pub buffer: Option<NotificationBuffer>,

    // Dashboard testing
    pub transport: Arc<FakeTransport>,
    pub dashboard: Option<Arc<Dashboard>>,
    pub refresh_results: Vec<datawatch::Result<PullSummary>>,
    pub pending_refresh: Option<JoinHandle<datawatch::Result<PullSummary>>>,
    pub history: Option<Vec<HistoryEntry>>,
}

impl DatawatchWorld {
    pub fn engine(&mut self) -> &mut ReconciliationEngine {
        self.engine.as_mut().expect("engine not set up")
    }

    pub fn buffer(&mut self) -> &mut NotificationBuffer {
        self.buffer.as_mut().expect("notification feed not set up")
    }

    pub fn dashboard(&self) -> Arc<Dashboard> {
        Arc::clone(self.dashboard.as_ref().expect("dashboard not set up"))
    }

    /// Events published since the last drain
    pub fn drain_events(&mut self) -> Vec<ChangeEvent> {
        let mut drained = Vec::new();
        if let Some(rx) = self.events.as_mut() {
            while let Ok(event) = rx.try_recv() {
                drained.push(event);
            }
        }
        drained
    }
}

/// Split a comma-separated id list, keeping empty slots
pub fn id_list(raw: &str) -> Vec<String> {
    if raw.trim().is_empty() {
        return Vec::new();
    }
    raw.split(',').map(|id| id.trim().to_string()).collect()
}
