//! Reconciliation engine: merges pull results and push updates into the
//! current status snapshot

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::{DatawatchError, Result};
use crate::events::{ChangeBus, ChangeEvent};
use crate::model::{Dataset, DatasetRecord, Stats, StatusSnapshot};

/// Push partials held back while waiting for a resync pull
const MAX_DEFERRED: usize = 1024;

/// What happened to a push update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Inserted,
    Merged,
    /// Held until the pending resync pull lands
    Deferred,
}

/// Result of applying one pull
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PullSummary {
    pub applied: usize,
    pub dropped: usize,
    /// Deferred push updates merged after the pull
    pub replayed: usize,
}

/// Issue order of a pull, taken before its request goes out
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PullTicket(u64);

/// Follow-up the caller must perform after a connection change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionAction {
    None,
    /// The push channel came back after a drop; pull everything now
    Resync,
}

/// Owns the status snapshot and decides which updates to accept.
///
/// The snapshot lives behind an `Arc` and is patched copy-on-write, so
/// snapshots handed out in events never change underneath their holders.
#[derive(Debug)]
pub struct ReconciliationEngine {
    snapshot: Arc<StatusSnapshot>,
    stats: Option<Arc<Stats>>,
    connected: bool,
    dropped_since_connect: bool,
    resync_pending: bool,
    /// Pulls issued so far
    pulls_issued: u64,
    /// `pulls_issued` when the resync gate was last armed
    armed_at: u64,
    deferred: Vec<DatasetRecord>,
    bus: ChangeBus,
}

impl ReconciliationEngine {
    pub fn new(bus: ChangeBus) -> Self {
        Self {
            snapshot: Arc::new(StatusSnapshot::new()),
            stats: None,
            connected: false,
            dropped_since_connect: false,
            resync_pending: false,
            pulls_issued: 0,
            armed_at: 0,
            deferred: Vec::new(),
            bus,
        }
    }

    /// Take a ticket for a pull about to be sent
    pub fn begin_pull(&mut self) -> PullTicket {
        self.pulls_issued += 1;
        PullTicket(self.pulls_issued)
    }

    /// Apply a pull issued just now
    pub fn apply_pull_result(
        &mut self,
        records: Vec<DatasetRecord>,
        last_updated: DateTime<Utc>,
    ) -> PullSummary {
        let ticket = self.begin_pull();
        self.apply_issued_pull(ticket, records, last_updated)
    }

    /// Replace the whole snapshot with the well-formed subset of `records`.
    ///
    /// Only a pull issued after the last reconnect releases the resync gate;
    /// an older one still replaces the snapshot but keeps updates deferred.
    pub fn apply_issued_pull(
        &mut self,
        ticket: PullTicket,
        records: Vec<DatasetRecord>,
        last_updated: DateTime<Utc>,
    ) -> PullSummary {
        let total = records.len();
        let datasets: Vec<Dataset> = records
            .into_iter()
            .filter_map(|record| match Dataset::from_record(record) {
                Ok(dataset) => Some(dataset),
                Err(e) => {
                    tracing::debug!("Dropping pulled entry: {}", e);
                    None
                }
            })
            .collect();
        let dropped = total - datasets.len();

        self.snapshot = Arc::new(StatusSnapshot::from_datasets(datasets, Some(last_updated)));
        let mut summary = PullSummary {
            applied: self.snapshot.len(),
            dropped,
            replayed: 0,
        };
        tracing::debug!(
            "Snapshot replaced: {} entries ({} dropped)",
            summary.applied,
            summary.dropped
        );
        self.bus
            .publish(ChangeEvent::SnapshotReplaced(Arc::clone(&self.snapshot)));

        if self.resync_pending && ticket.0 <= self.armed_at {
            tracing::debug!("Pull was issued before the reconnect, resync still pending");
        } else if self.resync_pending {
            self.resync_pending = false;
            let deferred = std::mem::take(&mut self.deferred);
            tracing::info!("Resync complete, replaying {} push updates", deferred.len());
            for patch in deferred {
                match self.apply_push_update(patch) {
                    Ok(_) => summary.replayed += 1,
                    Err(e) => tracing::debug!("Deferred update discarded: {}", e),
                }
            }
        }

        summary
    }

    /// Merge a push partial into the snapshot.
    ///
    /// Fails with `MalformedEntry` when the partial has no id and with
    /// `StaleUpdate` when its `checked_at` is older than the stored one.
    pub fn apply_push_update(&mut self, patch: DatasetRecord) -> Result<PushOutcome> {
        let id = match patch.id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => {
                return Err(DatawatchError::MalformedEntry(
                    "push update without dataset id".to_string(),
                ))
            }
        };

        if self.resync_pending {
            if self.deferred.len() >= MAX_DEFERRED {
                tracing::warn!("Deferred update queue full, discarding oldest");
                self.deferred.remove(0);
            }
            tracing::debug!("Deferring update for '{}' until resync", id);
            self.deferred.push(patch);
            return Ok(PushOutcome::Deferred);
        }

        let outcome = match self.snapshot.get(&id) {
            Some(existing) => {
                if let (Some(incoming), Some(stored)) = (patch.checked_at, existing.checked_at) {
                    if incoming < stored {
                        return Err(DatawatchError::StaleUpdate(id));
                    }
                }
                if let Some(entry) = Arc::make_mut(&mut self.snapshot).get_mut(&id) {
                    entry.merge(&patch);
                }
                PushOutcome::Merged
            }
            None => {
                let dataset = Dataset::from_record(patch)?;
                Arc::make_mut(&mut self.snapshot).upsert(dataset);
                PushOutcome::Inserted
            }
        };

        tracing::debug!("Entry '{}' {:?}", id, outcome);
        self.bus.publish(ChangeEvent::EntryUpdated {
            id,
            snapshot: Arc::clone(&self.snapshot),
        });
        Ok(outcome)
    }

    /// Record aggregate stats; they never touch the snapshot
    pub fn apply_push_stats(&mut self, stats: Stats) {
        let stats = Arc::new(stats);
        self.stats = Some(Arc::clone(&stats));
        self.bus.publish(ChangeEvent::StatsUpdated(stats));
    }

    /// Track the push channel state. A connect that follows a drop arms the
    /// resync gate and asks the caller for a full pull.
    pub fn on_connection_changed(&mut self, connected: bool) -> ConnectionAction {
        if connected == self.connected {
            return ConnectionAction::None;
        }
        self.connected = connected;
        self.bus
            .publish(ChangeEvent::ConnectionStatusChanged(connected));

        if !connected {
            tracing::warn!("Push channel disconnected");
            self.dropped_since_connect = true;
            return ConnectionAction::None;
        }

        if self.dropped_since_connect {
            self.dropped_since_connect = false;
            self.resync_pending = true;
            self.armed_at = self.pulls_issued;
            tracing::info!("Push channel reconnected, requesting full resync");
            ConnectionAction::Resync
        } else {
            tracing::info!("Push channel connected");
            ConnectionAction::None
        }
    }

    /// Surface a failed pull without touching the current snapshot
    pub fn report_pull_failure(&self, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::warn!("Refresh failed: {}", reason);
        self.bus.publish(ChangeEvent::RefreshFailed { reason });
    }

    pub fn snapshot(&self) -> Arc<StatusSnapshot> {
        Arc::clone(&self.snapshot)
    }

    pub fn stats(&self) -> Option<Arc<Stats>> {
        self.stats.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn is_resync_pending(&self) -> bool {
        self.resync_pending
    }

    pub fn deferred_len(&self) -> usize {
        self.deferred.len()
    }
}
