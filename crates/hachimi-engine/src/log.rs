//! Bounded activity log with live subscribers.
//!
//! The hub keeps the newest `capacity` entries in memory and fans every new
//! entry out over a broadcast channel. One hub is created per engine and
//! shared by handle; `clear` resets it.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Severity of a log entry. `Success` marks a completed user-visible action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Success,
    Warn,
    Error,
}

/// One entry in the activity log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub id: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excerpt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        let timestamp = Utc::now();
        let ulid = ulid::Ulid::from_parts(timestamp.timestamp_millis() as u64, rand::random());
        Self {
            id: ulid.to_string(),
            timestamp,
            level,
            message: message.into(),
            excerpt: None,
            data: None,
        }
    }

    pub fn with_excerpt(mut self, excerpt: impl Into<String>) -> Self {
        self.excerpt = Some(excerpt.into());
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Ring buffer of recent log entries plus a broadcast feed.
pub struct LogHub {
    capacity: usize,
    entries: Mutex<VecDeque<LogEntry>>,
    sender: broadcast::Sender<LogEntry>,
}

impl LogHub {
    /// Create a hub holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            sender,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append an entry, evicting the oldest when full, and notify subscribers.
    pub fn push(&self, entry: LogEntry) {
        match entry.level {
            LogLevel::Debug => tracing::debug!(message = %entry.message, "hub"),
            LogLevel::Info | LogLevel::Success => tracing::info!(message = %entry.message, "hub"),
            LogLevel::Warn => tracing::warn!(message = %entry.message, "hub"),
            LogLevel::Error => tracing::error!(message = %entry.message, "hub"),
        }

        {
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            if entries.len() == self.capacity {
                entries.pop_front();
            }
            entries.push_back(entry.clone());
        }

        // No subscribers is fine.
        let _ = self.sender.send(entry);
    }

    /// Build and push an entry.
    pub fn publish(&self, level: LogLevel, message: impl Into<String>, excerpt: Option<String>) {
        let mut entry = LogEntry::new(level, message);
        entry.excerpt = excerpt.filter(|e| !e.is_empty());
        self.push(entry);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.publish(LogLevel::Info, message, None);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.publish(LogLevel::Error, message, None);
    }

    /// Live feed of entries pushed after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.sender.subscribe()
    }

    /// Current contents, oldest first.
    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Replace the contents, keeping the newest `capacity` entries.
    pub fn sync(&self, incoming: Vec<LogEntry>) {
        let skip = incoming.len().saturating_sub(self.capacity);
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.clear();
        entries.extend(incoming.into_iter().skip(skip));
    }

    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for LogHub {
    fn default() -> Self {
        Self::new(100)
    }
}
