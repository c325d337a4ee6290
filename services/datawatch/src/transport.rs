//! Request/response access to the monitoring back end

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{DatawatchError, Result};
use crate::io::{HttpClient, HttpResponse};
use crate::model::{
    decode_rows, parse_timestamp, Category, DatasetRecord, HistoryEntry, Notification, Stats,
};

/// Result of one `/status` pull
#[derive(Debug, Clone, Default)]
pub struct PullResult {
    pub entries: Vec<DatasetRecord>,
    pub last_updated: Option<DateTime<Utc>>,
    /// Rows that could not be decoded at all
    pub dropped: usize,
}

/// First page of the server-side notification log
#[derive(Debug, Clone, Default)]
pub struct NotificationPage {
    pub notifications: Vec<Notification>,
    pub unread_count: u32,
    pub total: u64,
}

/// Acknowledgement of a forced check
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ForceCheckAck {
    pub message: String,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Outcome of marking a notification read on the server
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MarkReadAck {
    /// False when the server no longer knows the id
    pub found: bool,
    pub unread_count: Option<u32>,
}

/// Back-end operations used by the dashboard
#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub trait Transport: Send + Sync {
    async fn pull_status(&self) -> Result<PullResult>;

    async fn pull_stats(&self, hours: u32) -> Result<Stats>;

    async fn pull_categories(&self) -> Result<Vec<Category>>;

    /// Check log of one dataset; an unknown dataset has an empty history
    async fn pull_history(&self, id: &str, hours: u32) -> Result<Vec<HistoryEntry>>;

    async fn request_force_check(&self) -> Result<ForceCheckAck>;

    async fn pull_notifications(&self, limit: usize) -> Result<NotificationPage>;

    async fn mark_notification_read(&self, id: &str) -> Result<MarkReadAck>;

    async fn clear_notifications(&self) -> Result<()>;

    async fn health(&self) -> Result<Value>;
}

#[derive(Deserialize)]
struct StatusBody {
    #[serde(default)]
    results: Vec<Value>,
    #[serde(default)]
    last_updated: Option<String>,
}

#[derive(Deserialize)]
struct StatsBody {
    #[serde(default)]
    stats: Value,
}

#[derive(Deserialize)]
struct CategoriesBody {
    #[serde(default)]
    categories: Vec<Category>,
}

#[derive(Deserialize)]
struct HistoryBody {
    #[serde(default)]
    history: Vec<Value>,
}

#[derive(Deserialize)]
struct CheckBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    timestamp: Option<String>,
}

#[derive(Deserialize)]
struct NotificationsBody {
    #[serde(default)]
    notifications: Vec<Value>,
    #[serde(default)]
    unread_count: u32,
    #[serde(default)]
    total: Option<u64>,
}

#[derive(Deserialize)]
struct AckBody {
    #[serde(default)]
    unread_count: Option<u32>,
}

/// HTTP/JSON transport over an injected `HttpClient`
pub struct HttpTransport {
    base_url: reqwest::Url,
    http: Arc<dyn HttpClient>,
}

impl HttpTransport {
    pub fn new(base_url: &str, http: Arc<dyn HttpClient>) -> Result<Self> {
        let base_url = reqwest::Url::parse(base_url)
            .map_err(|e| DatawatchError::Config(format!("Invalid base URL '{}': {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(DatawatchError::Config(format!(
                "Base URL '{}' cannot carry a path",
                base_url
            )));
        }
        Ok(Self { base_url, http })
    }

    fn endpoint(&self, segments: &[&str], query: Option<(&str, String)>) -> String {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        if let Some((key, value)) = query {
            url.query_pairs_mut().append_pair(key, &value);
        }
        url.into()
    }

    fn check(url: &str, response: HttpResponse) -> Result<HttpResponse> {
        if response.is_success() {
            Ok(response)
        } else {
            tracing::debug!("{} returned HTTP {}", url, response.status);
            Err(DatawatchError::Http {
                status: response.status,
                body: response.body,
            })
        }
    }

    fn parse<T: DeserializeOwned>(url: &str, response: &HttpResponse) -> Result<T> {
        serde_json::from_str(&response.body).map_err(|e| {
            DatawatchError::Transport(format!("Unexpected response from {}: {}", url, e))
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = Self::check(url, self.http.get(url).await?)?;
        Self::parse(url, &response)
    }

    async fn post_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = Self::check(url, self.http.post(url).await?)?;
        Self::parse(url, &response)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn pull_status(&self) -> Result<PullResult> {
        let url = self.endpoint(&["status"], None);
        let body: StatusBody = self.get_json(&url).await?;

        let (entries, dropped) = decode_rows(body.results, DatasetRecord::from_value);
        if dropped > 0 {
            tracing::warn!("Dropped {} undecodable status rows", dropped);
        }
        Ok(PullResult {
            entries,
            last_updated: body.last_updated.as_deref().and_then(parse_timestamp),
            dropped,
        })
    }

    async fn pull_stats(&self, hours: u32) -> Result<Stats> {
        let url = self.endpoint(&["stats"], Some(("hours", hours.to_string())));
        let body: StatsBody = self.get_json(&url).await?;
        Stats::from_value(body.stats)
    }

    async fn pull_categories(&self) -> Result<Vec<Category>> {
        let url = self.endpoint(&["categories"], None);
        let body: CategoriesBody = self.get_json(&url).await?;
        Ok(body.categories)
    }

    async fn pull_history(&self, id: &str, hours: u32) -> Result<Vec<HistoryEntry>> {
        let url = self.endpoint(&["datasets", id, "history"], Some(("hours", hours.to_string())));
        let response = self.http.get(&url).await?;
        if response.status == 404 {
            tracing::debug!("No history for '{}'", id);
            return Ok(Vec::new());
        }
        let response = Self::check(&url, response)?;
        let body: HistoryBody = Self::parse(&url, &response)?;

        let (rows, _) = decode_rows(body.history, |row| {
            serde_json::from_value::<HistoryEntry>(row)
                .map_err(|e| DatawatchError::MalformedEntry(format!("history row: {}", e)))
        });
        Ok(rows)
    }

    async fn request_force_check(&self) -> Result<ForceCheckAck> {
        let url = self.endpoint(&["check"], None);
        let response = self.http.post(&url).await?;
        if response.status == 503 {
            return Err(DatawatchError::Transport(
                "Monitoring is disabled on the server".to_string(),
            ));
        }
        let response = Self::check(&url, response)?;
        let body: CheckBody = Self::parse(&url, &response)?;
        Ok(ForceCheckAck {
            message: body.message,
            timestamp: body.timestamp.as_deref().and_then(parse_timestamp),
        })
    }

    async fn pull_notifications(&self, limit: usize) -> Result<NotificationPage> {
        let url = self.endpoint(&["api", "notifications"], Some(("limit", limit.to_string())));
        let body: NotificationsBody = self.get_json(&url).await?;

        let (notifications, dropped) = decode_rows(body.notifications, Notification::from_value);
        if dropped > 0 {
            tracing::warn!("Dropped {} undecodable notifications", dropped);
        }
        let total = body.total.unwrap_or(notifications.len() as u64);
        Ok(NotificationPage {
            notifications,
            unread_count: body.unread_count,
            total,
        })
    }

    async fn mark_notification_read(&self, id: &str) -> Result<MarkReadAck> {
        let url = self.endpoint(&["api", "notifications", id, "read"], None);
        let response = self.http.post(&url).await?;
        if response.status == 404 {
            return Ok(MarkReadAck {
                found: false,
                unread_count: None,
            });
        }
        let response = Self::check(&url, response)?;
        let body: AckBody = Self::parse(&url, &response)?;
        Ok(MarkReadAck {
            found: true,
            unread_count: body.unread_count,
        })
    }

    async fn clear_notifications(&self) -> Result<()> {
        let url = self.endpoint(&["api", "notifications", "clear"], None);
        let _: Value = self.post_json(&url).await?;
        Ok(())
    }

    async fn health(&self) -> Result<Value> {
        let url = self.endpoint(&["health"], None);
        self.get_json(&url).await
    }
}
