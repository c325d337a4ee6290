//! Renderers consume change events; `LogRenderer` writes them as log lines

use std::fmt::Write as _;
use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::events::{ChangeBus, ChangeEvent};
use crate::model::{HistoryEntry, StatusSnapshot};

/// Reacts to dashboard changes
#[cfg_attr(test, mockall::automock)]
pub trait Renderer: Send + Sync {
    fn on_change(&self, event: &ChangeEvent);
}

/// Renders every change as an `info!` line
#[derive(Debug, Default)]
pub struct LogRenderer;

impl Renderer for LogRenderer {
    fn on_change(&self, event: &ChangeEvent) {
        match event {
            ChangeEvent::SnapshotReplaced(snapshot) => {
                let counts = snapshot.counts();
                info!(
                    "Status: {} datasets, {} up, {} down, {} unknown",
                    counts.total, counts.up, counts.down, counts.unknown
                );
            }
            ChangeEvent::EntryUpdated { id, snapshot } => {
                if let Some(entry) = snapshot.get(id) {
                    info!(
                        "{} ({}): {}{}",
                        entry.name,
                        entry.id,
                        entry.status,
                        entry
                            .response_label()
                            .map(|label| format!(", {}", label))
                            .unwrap_or_default()
                    );
                }
            }
            ChangeEvent::StatsUpdated(stats) => match stats.availability_percent() {
                Some(pct) => info!("Stats updated: {:.1}% availability", pct),
                None => info!("Stats updated"),
            },
            ChangeEvent::NotificationsChanged {
                notifications,
                unread,
            } => {
                if let Some(latest) = notifications.first() {
                    info!(
                        "[{}] {}: {} ({} unread)",
                        latest.kind, latest.title, latest.message, unread
                    );
                } else {
                    info!("Notifications cleared");
                }
            }
            ChangeEvent::ConnectionStatusChanged(true) => info!("Live updates connected"),
            ChangeEvent::ConnectionStatusChanged(false) => warn!("Live updates disconnected"),
            ChangeEvent::RefreshFailed { reason } => warn!("Refresh failed: {}", reason),
            ChangeEvent::LoadingChanged(loading) => debug!("Loading: {}", loading),
        }
    }
}

/// Forward bus events to `renderer` until cancelled or the bus closes
pub fn spawn_renderer(
    bus: &ChangeBus,
    renderer: Arc<dyn Renderer>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                event = rx.recv() => event,
                _ = cancel.cancelled() => break,
            };
            match event {
                Ok(event) => renderer.on_change(&event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Renderer lagged, skipped {} events", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
        debug!("Renderer stopped");
    })
}

/// Plain-text table of a snapshot, one dataset per line
pub fn format_snapshot(snapshot: &StatusSnapshot) -> String {
    let mut out = String::new();
    for entry in snapshot.iter() {
        let _ = writeln!(
            out,
            "{:<8} {:<24} {:<16} {}",
            entry.status.to_string(),
            entry.id,
            entry.category,
            entry.response_label().unwrap_or_else(|| "-".to_string())
        );
    }
    let counts = snapshot.counts();
    let _ = write!(
        out,
        "{} datasets: {} up, {} down, {} unknown",
        counts.total, counts.up, counts.down, counts.unknown
    );
    if let Some(updated) = snapshot.last_updated() {
        let _ = write!(out, " (updated {})", updated.format("%Y-%m-%d %H:%M:%S"));
    }
    out
}

pub fn format_history(entries: &[HistoryEntry]) -> String {
    if entries.is_empty() {
        return "No history".to_string();
    }
    let mut out = String::new();
    for entry in entries {
        let when = entry
            .checked_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        let detail = match (entry.http_code, entry.latency_ms, &entry.error) {
            (_, _, Some(error)) => error.clone(),
            (Some(code), Some(ms), None) => format!("HTTP {} in {:.0} ms", code, ms),
            (Some(code), None, None) => format!("HTTP {}", code),
            _ => "-".to_string(),
        };
        let _ = writeln!(out, "{}  {:<8} {}", when, entry.status.to_string(), detail);
    }
    out.trim_end().to_string()
}
