use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use pairchat_core::ConnectionId;
use serde::Serialize;

use crate::registry::Connection;

pub const DEFAULT_ACTIVITY_CAPACITY: usize = 1024;

/// What is kept about a connection after it leaves.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityRecord {
    pub id: ConnectionId,
    pub username: Option<String>,
    pub connect_time: DateTime<Utc>,
    pub disconnect_time: DateTime<Utc>,
    /// Session length in fractional minutes.
    pub duration: f64,
}

impl ActivityRecord {
    pub fn from_connection(conn: Connection, disconnect_time: DateTime<Utc>) -> Self {
        let millis = (disconnect_time - conn.connected_at).num_milliseconds().max(0);
        Self {
            id: conn.id,
            username: conn.display_name,
            connect_time: conn.connected_at,
            disconnect_time,
            duration: millis as f64 / 60_000.0,
        }
    }
}

/// Bounded in-memory log of past connections, oldest evicted first.
#[derive(Debug)]
pub struct ActivityLog {
    records: VecDeque<ActivityRecord>,
    capacity: usize,
}

impl ActivityLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::new(),
            capacity,
        }
    }

    pub fn record(&mut self, record: ActivityRecord) {
        if self.capacity == 0 {
            return;
        }
        while self.records.len() >= self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    pub fn snapshot(&self) -> Vec<ActivityRecord> {
        self.records.iter().cloned().collect()
    }

    /// Most recently recorded entry.
    pub fn latest(&self) -> Option<&ActivityRecord> {
        self.records.back()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for ActivityLog {
    fn default() -> Self {
        Self::new(DEFAULT_ACTIVITY_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(name: &str, minutes: i64) -> ActivityRecord {
        let connected_at = Utc::now();
        let conn = Connection {
            id: ConnectionId::new(),
            display_name: Some(name.to_string()),
            connected_at,
        };
        ActivityRecord::from_connection(conn, connected_at + Duration::minutes(minutes))
    }

    #[test]
    fn duration_is_in_minutes() {
        let r = record("Nova", 3);
        assert!((r.duration - 3.0).abs() < f64::EPSILON);
        assert_eq!(r.username.as_deref(), Some("Nova"));
    }

    #[test]
    fn evicts_oldest_beyond_capacity() {
        let mut log = ActivityLog::new(2);
        log.record(record("a", 1));
        log.record(record("b", 1));
        log.record(record("c", 1));
        let names: Vec<_> = log
            .snapshot()
            .into_iter()
            .filter_map(|r| r.username)
            .collect();
        assert_eq!(names, vec!["b", "c"]);
        assert_eq!(log.latest().and_then(|r| r.username.as_deref()), Some("c"));
    }

    #[test]
    fn zero_capacity_keeps_nothing() {
        let mut log = ActivityLog::new(0);
        log.record(record("a", 1));
        assert!(log.is_empty());
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(record("Nova", 1)).unwrap();
        assert!(json.get("connectTime").is_some());
        assert!(json.get("disconnectTime").is_some());
        assert_eq!(json["username"], "Nova");
    }
}
