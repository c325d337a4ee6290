//! Push channel: typed server events and the server-sent events client

use std::time::Duration;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ReconnectConfig;
use crate::error::{DatawatchError, Result};
use crate::model::{decode_rows, DatasetRecord, Notification, Stats};

/// Events delivered by the push channel
#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    Connected,
    Disconnected,
    DatasetUpdated(DatasetRecord),
    StatsUpdated(Stats),
    NotificationCreated {
        notification: Notification,
        unread_count: Option<u32>,
    },
    /// Full list replacement, sent on connect or on request
    NotificationsBulk {
        notifications: Vec<Notification>,
        unread_count: u32,
    },
    NotificationMarkedRead {
        id: Option<String>,
        unread_count: Option<u32>,
    },
    NotificationsCleared,
}

#[derive(Deserialize)]
struct NewNotificationPayload {
    notification: Value,
    #[serde(default)]
    unread_count: Option<u32>,
}

#[derive(Deserialize)]
struct NotificationListPayload {
    #[serde(default)]
    notifications: Vec<Value>,
    #[serde(default)]
    unread_count: u32,
}

#[derive(Deserialize)]
struct MarkedReadPayload {
    #[serde(default)]
    notification_id: Option<String>,
    #[serde(default)]
    unread_count: Option<u32>,
}

impl PushEvent {
    /// Decode a named event with a JSON payload. Unknown names and
    /// undecodable payloads yield `None`.
    pub fn decode(name: &str, data: &str) -> Option<PushEvent> {
        let event = match name {
            "connect" => Ok(PushEvent::Connected),
            "disconnect" => Ok(PushEvent::Disconnected),
            "notifications_cleared" => Ok(PushEvent::NotificationsCleared),
            "dataset_update" => {
                payload(data).and_then(DatasetRecord::from_value).map(PushEvent::DatasetUpdated)
            }
            "stats_update" | "initial_stats" => {
                payload(data).and_then(Stats::from_value).map(PushEvent::StatsUpdated)
            }
            "new_notification" => typed::<NewNotificationPayload>(data).and_then(|p| {
                Ok(PushEvent::NotificationCreated {
                    notification: Notification::from_value(p.notification)?,
                    unread_count: p.unread_count,
                })
            }),
            "recent_notifications" | "notifications_list" => {
                typed::<NotificationListPayload>(data).map(|p| {
                    let (notifications, _) = decode_rows(p.notifications, Notification::from_value);
                    PushEvent::NotificationsBulk {
                        notifications,
                        unread_count: p.unread_count,
                    }
                })
            }
            "notification_marked_read" => {
                typed::<MarkedReadPayload>(data).map(|p| PushEvent::NotificationMarkedRead {
                    id: p.notification_id,
                    unread_count: p.unread_count,
                })
            }
            other => {
                debug!("Ignoring unknown push event '{}'", other);
                return None;
            }
        };

        match event {
            Ok(event) => Some(event),
            Err(e) => {
                debug!("Dropping '{}' push event: {}", name, e);
                None
            }
        }
    }
}

fn payload(data: &str) -> Result<Value> {
    if data.trim().is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_str(data)?)
}

fn typed<T: serde::de::DeserializeOwned>(data: &str) -> Result<T> {
    Ok(serde_json::from_value(payload(data)?)?)
}

/// Source of push events
#[async_trait]
pub trait PushChannel: Send + Sync {
    /// Deliver events into `events` until `cancel` fires or the channel
    /// gives up reconnecting
    async fn run(&self, events: mpsc::Sender<PushEvent>, cancel: CancellationToken) -> Result<()>;
}

enum Session {
    /// The stream opened and later ended
    Ended,
    Cancelled,
}

/// Push channel backed by a server-sent events endpoint
pub struct SsePushChannel {
    url: String,
    client: reqwest::Client,
    reconnect: ReconnectConfig,
}

impl SsePushChannel {
    pub fn new(url: impl Into<String>, connect_timeout: Duration, reconnect: ReconnectConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| DatawatchError::Config(format!("HTTP client: {}", e)))?;
        Ok(Self {
            url: url.into(),
            client,
            reconnect,
        })
    }

    async fn subscribe(
        &self,
        events: &mpsc::Sender<PushEvent>,
        cancel: &CancellationToken,
    ) -> Result<Session> {
        debug!("Subscribing to {}", self.url);
        let response = self
            .client
            .get(&self.url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| DatawatchError::PushChannel(format!("GET {} failed: {}", self.url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DatawatchError::PushChannel(format!(
                "{} returned HTTP {}",
                self.url,
                status.as_u16()
            )));
        }

        info!("Push channel open: {}", self.url);
        if events.send(PushEvent::Connected).await.is_err() {
            return Ok(Session::Cancelled);
        }

        let mut stream = std::pin::pin!(response.bytes_stream().eventsource());
        loop {
            let frame = tokio::select! {
                frame = stream.next() => frame,
                _ = cancel.cancelled() => return Ok(Session::Cancelled),
            };
            match frame {
                Some(Ok(frame)) => {
                    let Some(event) = PushEvent::decode(&frame.event, &frame.data) else {
                        continue;
                    };
                    if events.send(event).await.is_err() {
                        return Ok(Session::Cancelled);
                    }
                }
                Some(Err(e)) => {
                    warn!("Push stream error: {}", e);
                    break;
                }
                None => {
                    debug!("Push stream ended");
                    break;
                }
            }
        }

        if events.send(PushEvent::Disconnected).await.is_err() {
            return Ok(Session::Cancelled);
        }
        Ok(Session::Ended)
    }
}

#[async_trait]
impl PushChannel for SsePushChannel {
    async fn run(&self, events: mpsc::Sender<PushEvent>, cancel: CancellationToken) -> Result<()> {
        let interval = Duration::from_secs(self.reconnect.interval_seconds);
        let max_retries = self.reconnect.max_retries;
        let mut failures = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }

            match self.subscribe(&events, &cancel).await {
                Ok(Session::Cancelled) => return Ok(()),
                Ok(Session::Ended) => failures = 0,
                Err(e) => {
                    failures += 1;
                    warn!("{}", e);
                }
            }

            if let Some(max) = max_retries {
                if failures > max {
                    warn!("Push channel giving up: max retries ({}) exceeded", max);
                    return Err(DatawatchError::PushChannel(format!(
                        "Max retries ({}) exceeded",
                        max
                    )));
                }
            }

            info!(
                "Reconnecting push channel in {:?} (attempt {}/{})",
                interval,
                failures + 1,
                max_retries.map_or("∞".to_string(), |m| m.to_string())
            );
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = cancel.cancelled() => return Ok(()),
            }
        }
    }
}
