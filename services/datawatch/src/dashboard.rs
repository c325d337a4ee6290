//! Dashboard: wires the scheduler, reconciliation engine, notification
//! buffer and push channel around one transport

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::engine::{ConnectionAction, PullSummary, ReconciliationEngine};
use crate::error::{DatawatchError, Result};
use crate::events::{ChangeBus, ChangeEvent};
use crate::io::ReqwestHttpClient;
use crate::model::{Category, HistoryEntry, Notification, Stats, StatusSnapshot};
use crate::notifications::NotificationBuffer;
use crate::push::{PushChannel, PushEvent, SsePushChannel};
use crate::scheduler::PollScheduler;
use crate::transport::{ForceCheckAck, HttpTransport, Transport};

/// Outcome of one scheduled pull, shared by every caller awaiting it
pub type PullOutcome = std::result::Result<PullSummary, String>;

/// Client-side view of the monitoring back end
pub struct Dashboard {
    config: Config,
    transport: Arc<dyn Transport>,
    bus: ChangeBus,
    engine: Arc<Mutex<ReconciliationEngine>>,
    notifications: Arc<Mutex<NotificationBuffer>>,
    scheduler: PollScheduler<PullOutcome>,
    resync_retry: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Dashboard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dashboard")
            .field("base_url", &self.config.api.base_url)
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}

impl Dashboard {
    pub fn new(config: Config, transport: Arc<dyn Transport>, bus: ChangeBus) -> Self {
        let engine = Arc::new(Mutex::new(ReconciliationEngine::new(bus.clone())));
        let notifications = Arc::new(Mutex::new(NotificationBuffer::new(
            config.notifications.max_size,
            bus.clone(),
        )));

        let scheduler = {
            let transport = Arc::clone(&transport);
            let engine = Arc::clone(&engine);
            let bus = bus.clone();
            PollScheduler::new(move || {
                pull_status(Arc::clone(&transport), Arc::clone(&engine), bus.clone())
            })
        };

        Self {
            config,
            transport,
            bus,
            engine,
            notifications,
            scheduler,
            resync_retry: std::sync::Mutex::new(None),
        }
    }

    /// Build a dashboard talking HTTP to the configured base URL
    pub fn from_config(config: Config, bus: ChangeBus) -> Result<Self> {
        config.validate()?;
        let http = ReqwestHttpClient::with_timeout(Duration::from_secs(
            config.api.request_timeout_seconds,
        ))?;
        let transport = HttpTransport::new(&config.api.base_url, Arc::new(http))?;
        Ok(Self::new(config, Arc::new(transport), bus))
    }

    /// Server-sent events channel for the configured push path
    pub fn push_channel(&self) -> Result<SsePushChannel> {
        let url = format!(
            "{}{}",
            self.config.api.base_url.trim_end_matches('/'),
            self.config.push.path
        );
        SsePushChannel::new(
            url,
            Duration::from_secs(self.config.api.request_timeout_seconds),
            self.config.push.reconnect.clone(),
        )
    }

    /// Initial pull and notification load, then periodic refresh
    pub async fn start(&self) {
        info!("Starting dashboard for {}", self.config.api.base_url);
        if let Err(e) = self.refresh().await {
            warn!("Initial load failed: {}", e);
        }
        if let Err(e) = self.load_notifications().await {
            warn!("Could not load notifications: {}", e);
        }
        self.scheduler.start(self.config.polling.interval());
    }

    pub fn stop(&self) {
        self.scheduler.stop();
        if let Some(retry) = self.retry_slot().take() {
            retry.abort();
        }
    }

    /// Pull now, or wait for the pull already in flight
    pub async fn refresh(&self) -> Result<PullSummary> {
        self.scheduler
            .trigger_now()
            .await
            .map_err(DatawatchError::Transport)
    }

    /// Change the auto-refresh period; zero disables it
    pub fn set_refresh_interval(&self, interval: Duration) {
        self.scheduler.start(interval);
    }

    pub fn refresh_interval(&self) -> Option<Duration> {
        self.scheduler.interval()
    }

    /// Ask the server to re-check every dataset, then pull once after the
    /// configured delay
    pub async fn force_check(&self) -> Result<ForceCheckAck> {
        let ack = match self.transport.request_force_check().await {
            Ok(ack) => ack,
            Err(e) => {
                self.engine
                    .lock()
                    .await
                    .report_pull_failure(format!("Force check failed: {}", e));
                return Err(e);
            }
        };
        info!("Force check accepted: {}", ack.message);

        let delay = self.config.polling.recheck_delay();
        let scheduler = self.scheduler.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(reason) = scheduler.trigger_now().await {
                debug!("Recheck pull failed: {}", reason);
            }
        });
        Ok(ack)
    }

    /// Replace the notification feed with the server's first page
    pub async fn load_notifications(&self) -> Result<usize> {
        let page = self
            .transport
            .pull_notifications(self.config.notifications.initial_limit)
            .await?;
        let loaded = page.notifications.len();
        debug!("Loaded {} of {} notifications", loaded, page.total);
        self.notifications
            .lock()
            .await
            .replace_all(page.notifications, page.unread_count);
        Ok(loaded)
    }

    /// Mark read locally and on the server. Returns whether the local flag
    /// changed.
    pub async fn mark_notification_read(&self, id: &str) -> Result<bool> {
        let changed = self.notifications.lock().await.mark_read(id);
        let ack = self.transport.mark_notification_read(id).await?;
        if !ack.found {
            debug!("Server has no notification '{}'", id);
        }
        if let Some(count) = ack.unread_count {
            self.notifications.lock().await.set_unread_count(count);
        }
        Ok(changed)
    }

    /// Clear on the server, then locally once the server has accepted it
    pub async fn clear_notifications(&self) -> Result<()> {
        self.transport.clear_notifications().await?;
        self.notifications.lock().await.clear();
        Ok(())
    }

    /// Apply one push event. A reconnect after a drop waits for the resync
    /// pull before returning.
    pub async fn handle_push(&self, event: PushEvent) {
        match event {
            PushEvent::Connected => self.connection_changed(true).await,
            PushEvent::Disconnected => self.connection_changed(false).await,
            PushEvent::DatasetUpdated(patch) => {
                if let Err(e) = self.engine.lock().await.apply_push_update(patch) {
                    debug!("Push update ignored: {}", e);
                }
            }
            PushEvent::StatsUpdated(stats) => self.engine.lock().await.apply_push_stats(stats),
            PushEvent::NotificationCreated {
                notification,
                unread_count,
            } => self.notifications.lock().await.push(notification, unread_count),
            PushEvent::NotificationsBulk {
                notifications,
                unread_count,
            } => self
                .notifications
                .lock()
                .await
                .replace_all(notifications, unread_count),
            PushEvent::NotificationMarkedRead { id, unread_count } => {
                let mut buffer = self.notifications.lock().await;
                if let Some(id) = id {
                    buffer.mark_read(&id);
                }
                if let Some(count) = unread_count {
                    buffer.set_unread_count(count);
                }
            }
            PushEvent::NotificationsCleared => self.notifications.lock().await.clear(),
        }
    }

    async fn connection_changed(&self, connected: bool) {
        let action = self.engine.lock().await.on_connection_changed(connected);
        if action == ConnectionAction::Resync {
            if let Err(reason) = resync(&self.engine, &self.scheduler).await {
                warn!("Resync pull failed, still holding push updates: {}", reason);
                self.spawn_resync_retry();
            }
        }
    }

    /// Retry the resync on the push reconnect interval while connected
    fn spawn_resync_retry(&self) {
        let mut slot = self.retry_slot();
        if slot.as_ref().is_some_and(|retry| !retry.is_finished()) {
            return;
        }

        let delay = Duration::from_secs(self.config.push.reconnect.interval_seconds.max(1));
        let engine = Arc::clone(&self.engine);
        let scheduler = self.scheduler.clone();
        *slot = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(delay).await;
                {
                    let engine = engine.lock().await;
                    if !engine.is_resync_pending() {
                        break;
                    }
                    if !engine.is_connected() {
                        debug!("Push channel down again, resync waits for the next connect");
                        break;
                    }
                }
                match resync(&engine, &scheduler).await {
                    Ok(()) => {
                        info!("Resync completed on retry");
                        break;
                    }
                    Err(reason) => warn!("Resync retry failed: {}", reason),
                }
            }
        }));
    }

    fn retry_slot(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.resync_retry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Drive `channel` until `cancel` fires, handling its events in order
    pub async fn run_push(
        &self,
        channel: Arc<dyn PushChannel>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let (tx, mut rx) = mpsc::channel(64);
        let producer = tokio::spawn(async move { channel.run(tx, cancel).await });

        while let Some(event) = rx.recv().await {
            self.handle_push(event).await;
        }

        producer
            .await
            .map_err(|e| DatawatchError::PushChannel(format!("Push task failed: {}", e)))?
    }

    pub async fn history(&self, id: &str, hours: Option<u32>) -> Result<Vec<HistoryEntry>> {
        let hours = hours.unwrap_or(self.config.history.default_hours);
        self.transport.pull_history(id, hours).await
    }

    pub async fn categories(&self) -> Result<Vec<Category>> {
        self.transport.pull_categories().await
    }

    pub async fn fetch_stats(&self, hours: u32) -> Result<Stats> {
        self.transport.pull_stats(hours).await
    }

    pub async fn health(&self) -> Result<Value> {
        self.transport.health().await
    }

    pub async fn snapshot(&self) -> Arc<StatusSnapshot> {
        self.engine.lock().await.snapshot()
    }

    pub async fn stats(&self) -> Option<Arc<Stats>> {
        self.engine.lock().await.stats()
    }

    pub async fn is_connected(&self) -> bool {
        self.engine.lock().await.is_connected()
    }

    /// Push updates are being held until a fresh pull lands
    pub async fn is_resync_pending(&self) -> bool {
        self.engine.lock().await.is_resync_pending()
    }

    pub async fn notifications(&self) -> Vec<Notification> {
        self.notifications.lock().await.to_vec()
    }

    pub async fn unread_count(&self) -> u32 {
        self.notifications.lock().await.unread_count()
    }

    pub fn is_loading(&self) -> bool {
        self.scheduler.in_flight()
    }

    pub fn bus(&self) -> &ChangeBus {
        &self.bus
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

/// Pull until one issued after the reconnect has landed. The first round can
/// only join a pull that was already in flight.
async fn resync(
    engine: &Mutex<ReconciliationEngine>,
    scheduler: &PollScheduler<PullOutcome>,
) -> std::result::Result<(), String> {
    for _ in 0..2 {
        scheduler.trigger_now().await?;
        if !engine.lock().await.is_resync_pending() {
            return Ok(());
        }
        debug!("Joined a pull issued before the reconnect, pulling again");
    }
    Err("no pull issued after the reconnect has landed".to_string())
}

async fn pull_status(
    transport: Arc<dyn Transport>,
    engine: Arc<Mutex<ReconciliationEngine>>,
    bus: ChangeBus,
) -> PullOutcome {
    bus.publish(ChangeEvent::LoadingChanged(true));
    let ticket = engine.lock().await.begin_pull();

    let outcome = match transport.pull_status().await {
        Ok(result) => {
            let last_updated = result.last_updated.unwrap_or_else(Utc::now);
            let mut summary = engine
                .lock()
                .await
                .apply_issued_pull(ticket, result.entries, last_updated);
            summary.dropped += result.dropped;
            debug!(
                "Pull applied {} entries ({} dropped, {} replayed)",
                summary.applied, summary.dropped, summary.replayed
            );
            Ok(summary)
        }
        Err(e) => {
            let reason = e.to_string();
            engine.lock().await.report_pull_failure(reason.clone());
            Err(reason)
        }
    };

    bus.publish(ChangeEvent::LoadingChanged(false));
    outcome
}
