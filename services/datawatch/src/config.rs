//! Configuration types for the datawatch client

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub push: PushConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
    #[serde(default)]
    pub history: HistoryConfig,
}

/// Status API endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

/// Auto-refresh settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Seconds between automatic pulls; 0 disables auto-refresh
    #[serde(default = "default_polling_interval")]
    pub interval_seconds: u64,
    /// Delay before re-pulling after a forced server-side check
    #[serde(default = "default_recheck_delay")]
    pub force_check_recheck_seconds: u64,
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn recheck_delay(&self) -> Duration {
        Duration::from_secs(self.force_check_recheck_seconds)
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_polling_interval(),
            force_check_recheck_seconds: default_recheck_delay(),
        }
    }
}

/// Push channel settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_push_path")]
    pub path: String,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: default_push_path(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Configuration for resubscribing after the push channel drops
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Interval between reconnection attempts in seconds
    #[serde(default = "default_reconnect_interval")]
    pub interval_seconds: u64,
    /// Maximum number of consecutive failed attempts (None for unlimited)
    #[serde(default)]
    pub max_retries: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_reconnect_interval(),
            max_retries: None,
        }
    }
}

/// Notification feed settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationsConfig {
    #[serde(default = "default_max_notifications")]
    pub max_size: usize,
    /// Number of notifications requested by the initial bulk load
    #[serde(default = "default_initial_limit")]
    pub initial_limit: usize,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            max_size: default_max_notifications(),
            initial_limit: default_initial_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "default_history_hours")]
    pub default_hours: u32,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            default_hours: default_history_hours(),
        }
    }
}

impl Config {
    /// Check values that serde alone cannot reject
    pub fn validate(&self) -> crate::Result<()> {
        let base = self.api.base_url.trim();
        if base.is_empty() {
            return Err(crate::DatawatchError::Config(
                "api.base_url must not be empty".to_string(),
            ));
        }
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(crate::DatawatchError::Config(format!(
                "api.base_url must be an http(s) URL, got '{}'",
                base
            )));
        }
        if self.notifications.max_size == 0 {
            return Err(crate::DatawatchError::Config(
                "notifications.max_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_base_url() -> String {
    "http://localhost:5001".to_string()
}

fn default_request_timeout() -> u64 {
    10
}

fn default_polling_interval() -> u64 {
    30
}

fn default_recheck_delay() -> u64 {
    5
}

fn default_true() -> bool {
    true
}

fn default_push_path() -> String {
    "/api/events".to_string()
}

fn default_reconnect_interval() -> u64 {
    5
}

fn default_max_notifications() -> usize {
    100
}

fn default_initial_limit() -> usize {
    50
}

fn default_history_hours() -> u32 {
    24
}

/// Load configuration from a JSON file
pub fn load_config(path: &Path) -> crate::Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        crate::DatawatchError::Config(format!("Failed to read config file {:?}: {}", path, e))
    })?;
    let config: Config = serde_json::from_str(&content)?;
    Ok(config)
}
