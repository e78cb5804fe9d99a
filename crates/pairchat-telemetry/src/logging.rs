use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::field::{Field, Visit};
use tracing::span;
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

/// A log record persisted to SQLite.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogRecord {
    pub id: i64,
    pub timestamp: String,
    pub level: String,
    pub target: String,
    pub message: String,
    pub fields: Option<String>,
    pub connection_id: Option<String>,
    pub partner_id: Option<String>,
}

/// Most rows a single query returns.
pub const MAX_QUERY_LIMIT: u32 = 1000;

/// Query parameters for searching persisted logs.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct LogQuery {
    pub level: Option<String>,
    pub target: Option<String>,
    pub connection_id: Option<String>,
    pub since: Option<String>,
    pub limit: Option<u32>,
}

/// SQLite sink that persists warn+ logs.
pub struct SqliteLogSink {
    conn: Mutex<Connection>,
}

impl SqliteLogSink {
    pub fn new(db_path: &Path) -> Result<Self, rusqlite::Error> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        Self::with_connection(Connection::open(db_path)?)
    }

    pub fn in_memory() -> Result<Self, rusqlite::Error> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, rusqlite::Error> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             CREATE TABLE IF NOT EXISTS logs (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 timestamp TEXT NOT NULL,
                 level TEXT NOT NULL,
                 target TEXT NOT NULL,
                 message TEXT NOT NULL,
                 fields TEXT,
                 connection_id TEXT,
                 partner_id TEXT,
                 created_at TEXT NOT NULL DEFAULT (datetime('now'))
             );
             CREATE INDEX IF NOT EXISTS idx_logs_level ON logs(level);
             CREATE INDEX IF NOT EXISTS idx_logs_connection ON logs(connection_id);
             CREATE INDEX IF NOT EXISTS idx_logs_timestamp ON logs(timestamp);",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn insert(&self, record: &LogInsert) {
        let conn = self.conn.lock();
        let _ = conn.execute(
            "INSERT INTO logs (timestamp, level, target, message, fields, connection_id, partner_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                record.timestamp,
                record.level,
                record.target,
                record.message,
                record.fields,
                record.connection_id,
                record.partner_id,
            ],
        );
    }

    pub fn query(&self, q: &LogQuery) -> Result<Vec<LogRecord>, rusqlite::Error> {
        let conn = self.conn.lock();
        let mut sql = String::from(
            "SELECT id, timestamp, level, target, message, fields, connection_id, partner_id
             FROM logs WHERE 1=1",
        );
        let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(level) = &q.level {
            sql.push_str(&format!(" AND level = ?{}", params.len() + 1));
            params.push(Box::new(level.clone()));
        }
        if let Some(target) = &q.target {
            sql.push_str(&format!(" AND target LIKE ?{}", params.len() + 1));
            params.push(Box::new(format!("%{target}%")));
        }
        if let Some(connection_id) = &q.connection_id {
            // A connection shows up on either side of a session log line.
            let n = params.len() + 1;
            sql.push_str(&format!(" AND (connection_id = ?{n} OR partner_id = ?{n})"));
            params.push(Box::new(connection_id.clone()));
        }
        if let Some(since) = &q.since {
            sql.push_str(&format!(" AND timestamp >= ?{}", params.len() + 1));
            params.push(Box::new(since.clone()));
        }

        sql.push_str(" ORDER BY id DESC");

        let limit = q.limit.unwrap_or(100).min(MAX_QUERY_LIMIT);
        sql.push_str(&format!(" LIMIT {limit}"));

        let param_refs: Vec<&dyn rusqlite::types::ToSql> =
            params.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(param_refs.as_slice(), |row| {
            Ok(LogRecord {
                id: row.get(0)?,
                timestamp: row.get(1)?,
                level: row.get(2)?,
                target: row.get(3)?,
                message: row.get(4)?,
                fields: row.get(5)?,
                connection_id: row.get(6)?,
                partner_id: row.get(7)?,
            })
        })?;

        rows.collect()
    }
}

struct LogInsert {
    timestamp: String,
    level: String,
    target: String,
    message: String,
    fields: Option<String>,
    connection_id: Option<String>,
    partner_id: Option<String>,
}

/// tracing Layer that writes warn+ events to SQLite.
pub struct SqliteLogLayer {
    sink: Arc<SqliteLogSink>,
}

impl SqliteLogLayer {
    pub fn new(sink: Arc<SqliteLogSink>) -> Self {
        Self { sink }
    }
}

/// Visitor that extracts fields from a tracing event.
struct FieldVisitor {
    message: Option<String>,
    fields: serde_json::Map<String, serde_json::Value>,
    connection_id: Option<String>,
    partner_id: Option<String>,
}

impl FieldVisitor {
    fn new() -> Self {
        Self {
            message: None,
            fields: serde_json::Map::new(),
            connection_id: None,
            partner_id: None,
        }
    }
}

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let val = format!("{:?}", value);
        match field.name() {
            "message" => self.message = Some(val),
            "connection_id" => self.connection_id = Some(val.trim_matches('"').to_string()),
            "partner_id" => self.partner_id = Some(val.trim_matches('"').to_string()),
            name => {
                self.fields
                    .insert(name.to_string(), serde_json::Value::String(val));
            }
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "message" => self.message = Some(value.to_string()),
            "connection_id" => self.connection_id = Some(value.to_string()),
            "partner_id" => self.partner_id = Some(value.to_string()),
            name => {
                self.fields
                    .insert(name.to_string(), serde_json::Value::String(value.to_string()));
            }
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields
            .insert(field.name().to_string(), serde_json::Value::Number(value.into()));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields
            .insert(field.name().to_string(), serde_json::Value::Number(value.into()));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields
            .insert(field.name().to_string(), serde_json::Value::Bool(value));
    }
}

impl<S> Layer<S> for SqliteLogLayer
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fn on_event(&self, event: &tracing::Event<'_>, ctx: Context<'_, S>) {
        // Only persist WARN and above
        let level = *event.metadata().level();
        if level > tracing::Level::WARN {
            return;
        }

        let mut visitor = FieldVisitor::new();
        event.record(&mut visitor);

        // Fall back to ids recorded on enclosing spans (the per-socket span).
        if visitor.connection_id.is_none() || visitor.partner_id.is_none() {
            if let Some(scope) = ctx.event_scope(event) {
                for span in scope {
                    let extensions = span.extensions();
                    if let Some(fields) = extensions.get::<SpanFields>() {
                        if visitor.connection_id.is_none() {
                            visitor.connection_id.clone_from(&fields.connection_id);
                        }
                        if visitor.partner_id.is_none() {
                            visitor.partner_id.clone_from(&fields.partner_id);
                        }
                    }
                }
            }
        }

        let fields_json = if visitor.fields.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&visitor.fields).unwrap_or_default())
        };

        self.sink.insert(&LogInsert {
            timestamp: Utc::now().to_rfc3339(),
            level: level.to_string().to_uppercase(),
            target: event.metadata().target().to_string(),
            message: visitor.message.unwrap_or_default(),
            fields: fields_json,
            connection_id: visitor.connection_id,
            partner_id: visitor.partner_id,
        });
    }

    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let mut visitor = FieldVisitor::new();
        attrs.record(&mut visitor);

        if visitor.connection_id.is_some() || visitor.partner_id.is_some() {
            if let Some(span) = ctx.span(id) {
                span.extensions_mut().insert(SpanFields {
                    connection_id: visitor.connection_id,
                    partner_id: visitor.partner_id,
                });
            }
        }
    }
}

struct SpanFields {
    connection_id: Option<String>,
    partner_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;

    fn warn_line(message: &str, connection_id: Option<&str>) -> LogInsert {
        LogInsert {
            timestamp: Utc::now().to_rfc3339(),
            level: "WARN".into(),
            target: "pairchat_server::hub".into(),
            message: message.into(),
            fields: None,
            connection_id: connection_id.map(str::to_string),
            partner_id: None,
        }
    }

    #[test]
    fn sink_on_disk_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("logs.db");
        let sink = SqliteLogSink::new(&path).unwrap();
        sink.insert(&warn_line("queue full", None));
        assert_eq!(sink.query(&LogQuery::default()).unwrap().len(), 1);
        assert!(path.exists());
    }

    #[test]
    fn query_by_level() {
        let sink = SqliteLogSink::in_memory().unwrap();
        sink.insert(&warn_line("warning msg", None));
        sink.insert(&LogInsert {
            level: "ERROR".into(),
            ..warn_line("error msg", None)
        });

        let results = sink
            .query(&LogQuery {
                level: Some("ERROR".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].message, "error msg");
    }

    #[test]
    fn query_by_connection_matches_either_side() {
        let sink = SqliteLogSink::in_memory().unwrap();
        sink.insert(&warn_line("own line", Some("conn_a")));
        sink.insert(&LogInsert {
            partner_id: Some("conn_a".into()),
            ..warn_line("partner line", Some("conn_b"))
        });
        sink.insert(&warn_line("unrelated", Some("conn_c")));

        let results = sink
            .query(&LogQuery {
                connection_id: Some("conn_a".into()),
                ..Default::default()
            })
            .unwrap();
        let messages: Vec<_> = results.iter().map(|r| r.message.as_str()).collect();
        assert_eq!(messages, vec!["partner line", "own line"]);
    }

    #[test]
    fn query_limit_returns_most_recent() {
        let sink = SqliteLogSink::in_memory().unwrap();
        for i in 0..10 {
            sink.insert(&warn_line(&format!("msg {i}"), None));
        }
        let results = sink
            .query(&LogQuery {
                limit: Some(3),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].message, "msg 9");
    }

    #[test]
    fn query_limit_is_capped() {
        let sink = SqliteLogSink::in_memory().unwrap();
        for i in 0..(MAX_QUERY_LIMIT + 5) {
            sink.insert(&warn_line(&format!("msg {i}"), None));
        }
        let results = sink
            .query(&LogQuery {
                limit: Some(u32::MAX),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(results.len(), MAX_QUERY_LIMIT as usize);
    }

    #[test]
    fn query_params_deserialize_with_defaults() {
        let q: LogQuery =
            serde_json::from_value(serde_json::json!({"connection_id": "conn_a"})).unwrap();
        assert_eq!(q.connection_id.as_deref(), Some("conn_a"));
        assert!(q.level.is_none() && q.limit.is_none());
    }

    #[test]
    fn query_since_filters_old_lines() {
        let sink = SqliteLogSink::in_memory().unwrap();
        sink.insert(&LogInsert {
            timestamp: "2026-02-14T11:00:00Z".into(),
            ..warn_line("old", None)
        });
        sink.insert(&LogInsert {
            timestamp: "2026-02-14T13:00:00Z".into(),
            ..warn_line("new", None)
        });
        let results = sink
            .query(&LogQuery {
                since: Some("2026-02-14T12:00:00Z".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].message, "new");
    }

    #[test]
    fn layer_persists_warn_and_lifts_span_ids() {
        let sink = Arc::new(SqliteLogSink::in_memory().unwrap());
        let subscriber =
            tracing_subscriber::registry().with(SqliteLogLayer::new(sink.clone()));

        tracing::subscriber::with_default(subscriber, || {
            let span = tracing::info_span!("socket", connection_id = "conn_span");
            let _enter = span.enter();
            tracing::info!("not persisted");
            tracing::warn!(queue = 256u64, "send queue full");
            tracing::error!(partner_id = "conn_p", "relay failed");
        });

        let results = sink.query(&LogQuery::default()).unwrap();
        assert_eq!(results.len(), 2);

        let error = &results[0];
        assert_eq!(error.level, "ERROR");
        assert_eq!(error.connection_id.as_deref(), Some("conn_span"));
        assert_eq!(error.partner_id.as_deref(), Some("conn_p"));

        let warn = &results[1];
        assert_eq!(warn.message, "send queue full");
        assert_eq!(warn.connection_id.as_deref(), Some("conn_span"));
        assert!(warn.fields.as_deref().unwrap().contains("\"queue\":256"));
    }
}
