//! Dataset, snapshot, and notification models
//!
//! `DatasetRecord` is the loosely-typed wire shape shared by pull rows and
//! push partials; `Dataset` is the validated form kept in a `StatusSnapshot`.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{DatawatchError, Result};

/// Availability of a dataset at its last check
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetStatus {
    Up,
    Down,
    #[default]
    Unknown,
}

impl DatasetStatus {
    /// Map a wire string to a status; anything unrecognized is `Unknown`
    pub fn from_wire(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "up" => DatasetStatus::Up,
            "down" => DatasetStatus::Down,
            _ => DatasetStatus::Unknown,
        }
    }
}

impl<'de> Deserialize<'de> for DatasetStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(value
            .as_str()
            .map(DatasetStatus::from_wire)
            .unwrap_or_default())
    }
}

impl fmt::Display for DatasetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatasetStatus::Up => write!(f, "up"),
            DatasetStatus::Down => write!(f, "down"),
            DatasetStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// Parse the timestamp formats the status API emits.
///
/// Accepts RFC 3339, RFC 3339 with a space separator, and naive ISO-8601
/// (taken as UTC). Returns `None` for anything else.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    let normalized = raw.replacen(' ', "T", 1);
    if let Ok(ts) = DateTime::parse_from_rfc3339(&normalized) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(&normalized, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

fn lenient_timestamp<'de, D>(deserializer: D) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(Value::as_str).and_then(parse_timestamp))
}

fn lenient_id<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Distinguishes an explicit `null` (`Some(None)`) from an absent key (`None`)
fn present<'de, D, T>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Wire shape of a dataset row or push partial; every field is optional
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DatasetRecord {
    #[serde(default, deserialize_with = "lenient_id")]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub status: Option<DatasetStatus>,
    #[serde(default, deserialize_with = "present")]
    pub latency_ms: Option<Option<f64>>,
    #[serde(default, deserialize_with = "present")]
    pub http_code: Option<Option<u16>>,
    #[serde(default, deserialize_with = "present")]
    pub error: Option<Option<String>>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub checked_at: Option<DateTime<Utc>>,
}

impl DatasetRecord {
    /// A partial carrying only an id, for building patches in code
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::default()
        }
    }

    pub fn status(mut self, status: DatasetStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn latency_ms(mut self, latency_ms: f64) -> Self {
        self.latency_ms = Some(Some(latency_ms));
        self
    }

    pub fn checked_at(mut self, checked_at: DateTime<Utc>) -> Self {
        self.checked_at = Some(checked_at);
        self
    }

    /// Decode one row, isolating failures to that row
    pub fn from_value(value: Value) -> Result<Self> {
        if !value.is_object() {
            return Err(DatawatchError::MalformedEntry(format!(
                "expected an object, got {}",
                value
            )));
        }
        serde_json::from_value(value)
            .map_err(|e| DatawatchError::MalformedEntry(format!("undecodable row: {}", e)))
    }
}

/// A validated dataset entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dataset {
    pub id: String,
    pub name: String,
    pub category: String,
    pub url: String,
    pub status: DatasetStatus,
    pub latency_ms: Option<f64>,
    pub http_code: Option<u16>,
    pub error: Option<String>,
    pub checked_at: Option<DateTime<Utc>>,
}

impl Dataset {
    /// Build a dataset from a record, filling missing fields with defaults
    pub fn from_record(record: DatasetRecord) -> Result<Self> {
        let id = record
            .id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| DatawatchError::MalformedEntry("missing dataset id".to_string()))?;

        Ok(Self {
            id,
            name: record.name.unwrap_or_default(),
            category: record.category.unwrap_or_default(),
            url: record.url.unwrap_or_default(),
            status: record.status.unwrap_or_default(),
            latency_ms: record.latency_ms.flatten(),
            http_code: record.http_code.flatten(),
            error: record.error.flatten(),
            checked_at: record.checked_at,
        })
    }

    /// Overlay the fields present in `patch`; absent fields are left alone
    pub fn merge(&mut self, patch: &DatasetRecord) {
        if let Some(name) = &patch.name {
            self.name = name.clone();
        }
        if let Some(category) = &patch.category {
            self.category = category.clone();
        }
        if let Some(url) = &patch.url {
            self.url = url.clone();
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(latency_ms) = patch.latency_ms {
            self.latency_ms = latency_ms;
        }
        if let Some(http_code) = patch.http_code {
            self.http_code = http_code;
        }
        if let Some(error) = &patch.error {
            self.error = error.clone();
        }
        if let Some(checked_at) = patch.checked_at {
            self.checked_at = Some(checked_at);
        }
    }

    /// HTTP code if known, else the error string
    pub fn response_label(&self) -> Option<String> {
        self.http_code
            .map(|code| code.to_string())
            .or_else(|| self.error.clone())
    }
}

/// Up/down/unknown totals across a snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub total: usize,
    pub up: usize,
    pub down: usize,
    pub unknown: usize,
}

/// Ordered mapping from dataset id to dataset, plus when it was last refreshed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusSnapshot {
    entries: Vec<Dataset>,
    index: HashMap<String, usize>,
    last_updated: Option<DateTime<Utc>>,
}

impl StatusSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a snapshot from datasets in order. A repeated id replaces the
    /// earlier entry but keeps its position.
    pub fn from_datasets(
        datasets: impl IntoIterator<Item = Dataset>,
        last_updated: Option<DateTime<Utc>>,
    ) -> Self {
        let mut snapshot = Self {
            last_updated,
            ..Self::default()
        };
        for dataset in datasets {
            snapshot.upsert(dataset);
        }
        snapshot
    }

    pub fn get(&self, id: &str) -> Option<&Dataset> {
        self.index.get(id).map(|&i| &self.entries[i])
    }

    pub(crate) fn get_mut(&mut self, id: &str) -> Option<&mut Dataset> {
        match self.index.get(id) {
            Some(&i) => self.entries.get_mut(i),
            None => None,
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Insert a new entry at the end, or replace an existing one in place
    pub(crate) fn upsert(&mut self, dataset: Dataset) {
        match self.index.get(&dataset.id) {
            Some(&i) => self.entries[i] = dataset,
            None => {
                self.index.insert(dataset.id.clone(), self.entries.len());
                self.entries.push(dataset);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Dataset> {
        self.entries.iter()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|d| d.id.as_str())
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.last_updated
    }

    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts {
            total: self.entries.len(),
            ..StatusCounts::default()
        };
        for dataset in &self.entries {
            match dataset.status {
                DatasetStatus::Up => counts.up += 1,
                DatasetStatus::Down => counts.down += 1,
                DatasetStatus::Unknown => counts.unknown += 1,
            }
        }
        counts
    }

    /// Distinct categories in first-seen order
    pub fn categories(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        for dataset in &self.entries {
            if !seen.contains(&dataset.category.as_str()) {
                seen.push(dataset.category.as_str());
            }
        }
        seen
    }
}

/// Aggregate availability figures, passed through to renderers untouched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Stats(pub serde_json::Map<String, Value>);

impl Stats {
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Stats(map)),
            other => Err(DatawatchError::MalformedEntry(format!(
                "stats must be an object, got {}",
                other
            ))),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn total_datasets(&self) -> Option<u64> {
        self.get("total_datasets").and_then(Value::as_u64)
    }

    pub fn total_checks(&self) -> Option<u64> {
        self.get("total_checks").and_then(Value::as_u64)
    }

    pub fn successful_checks(&self) -> Option<u64> {
        self.get("successful_checks").and_then(Value::as_u64)
    }

    pub fn avg_latency_ms(&self) -> Option<f64> {
        self.get("avg_latency").and_then(Value::as_f64)
    }

    /// Share of successful checks, in percent
    pub fn availability_percent(&self) -> Option<f64> {
        let total = self.total_checks()?;
        if total == 0 {
            return None;
        }
        Some(self.successful_checks()? as f64 * 100.0 / total as f64)
    }
}

/// A dataset listed under a category
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CategoryMember {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

/// A category and how many datasets it holds
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Category {
    pub name: String,
    #[serde(default)]
    pub count: u64,
    #[serde(default)]
    pub datasets: Vec<CategoryMember>,
}

/// One row of a dataset's check log
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HistoryEntry {
    #[serde(default)]
    pub dataset_id: String,
    #[serde(default)]
    pub status: DatasetStatus,
    #[serde(default)]
    pub http_code: Option<u16>,
    #[serde(default)]
    pub latency_ms: Option<f64>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub checked_at: Option<DateTime<Utc>>,
}

/// A push-delivered alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub message: String,
    #[serde(rename = "type", default = "default_notification_kind")]
    pub kind: String,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub read: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

fn default_notification_kind() -> String {
    "info".to_string()
}

impl Notification {
    pub fn new(id: impl Into<String>, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            message: message.into(),
            kind: default_notification_kind(),
            timestamp: None,
            read: false,
            data: None,
        }
    }

    /// Decode one notification row, isolating failures to that row
    pub fn from_value(value: Value) -> Result<Self> {
        let notification: Notification = serde_json::from_value(value)
            .map_err(|e| DatawatchError::MalformedEntry(format!("undecodable notification: {}", e)))?;
        if notification.id.trim().is_empty() {
            return Err(DatawatchError::MalformedEntry(
                "missing notification id".to_string(),
            ));
        }
        Ok(notification)
    }
}

/// Decode a list of rows, dropping the ones that fail. Returns the kept rows
/// and how many were dropped.
pub fn decode_rows<T>(rows: Vec<Value>, decode: impl Fn(Value) -> Result<T>) -> (Vec<T>, usize) {
    let mut kept = Vec::with_capacity(rows.len());
    let mut dropped = 0;
    for row in rows {
        match decode(row) {
            Ok(item) => kept.push(item),
            Err(e) => {
                tracing::debug!("Dropping row: {}", e);
                dropped += 1;
            }
        }
    }
    (kept, dropped)
}
