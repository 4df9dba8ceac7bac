//! Per-project, in-memory, append-only capture of deployment events

use std::collections::HashMap;
use std::sync::RwLock;

use serde::Serialize;

/// One captured line
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapturedEvent {
    pub text: String,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
}

/// Append-only event sequences keyed by project id. Not persisted.
#[derive(Default)]
pub struct ProjectEventLog {
    entries: RwLock<HashMap<String, Vec<CapturedEvent>>>,
}

impl ProjectEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event. Timestamps earlier than the last entry are clamped so
    /// each sequence stays sorted for [`ProjectEventLog::range`].
    pub fn append(&self, project_id: &str, text: String, timestamp: i64) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let events = entries.entry(project_id.to_string()).or_default();
        let timestamp = events.last().map_or(timestamp, |last| last.timestamp.max(timestamp));
        events.push(CapturedEvent { text, timestamp });
    }

    /// Events of `project_id` with `since <= timestamp <= until`.
    /// A missing bound leaves that side open.
    pub fn range(&self, project_id: &str, since: Option<i64>, until: Option<i64>) -> Vec<CapturedEvent> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let Some(events) = entries.get(project_id) else {
            return Vec::new();
        };

        let start = since.map_or(0, |since| events.partition_point(|e| e.timestamp < since));
        let end = until.map_or(events.len(), |until| events.partition_point(|e| e.timestamp <= until));
        if start >= end {
            return Vec::new();
        }
        events[start..end].to_vec()
    }

    /// Number of captured events for `project_id`
    pub fn len(&self, project_id: &str) -> usize {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(project_id).map_or(0, Vec::len)
    }

    /// Drop everything captured for `project_id`
    pub fn forget(&self, project_id: &str) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.remove(project_id);
    }
}
