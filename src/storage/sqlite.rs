//! SQLite 事件日志
//! SQLite-backed count event log

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection};

use super::{EventSink, StoredEvent};
use crate::error::{Error, Result};
use crate::presence::{CountEvent, Direction};

pub struct SqliteEventSink {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteEventSink {
    /// 打开 (或创建) 数据库文件
    ///
    /// `busy_timeout` bounds how long a write waits on a locked database.
    pub fn open<P: AsRef<Path>>(path: P, busy_timeout: Duration) -> Result<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;",
        )?;
        conn.busy_timeout(busy_timeout)?;

        let sink = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        sink.init_schema()?;
        Ok(sink)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let sink = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        sink.init_schema()?;
        Ok(sink)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS count_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                direction TEXT NOT NULL,
                lobby_count INTEGER NOT NULL,
                timestamp TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_count_events_timestamp ON count_events(timestamp)",
            [],
        )?;

        Ok(())
    }

    fn row_to_event(
        id: i64,
        direction: String,
        lobby_count: i64,
        timestamp: String,
    ) -> Result<StoredEvent> {
        let direction = direction.parse::<Direction>().map_err(Error::Internal)?;
        let lobby_count = u32::try_from(lobby_count)
            .map_err(|_| Error::Internal(format!("invalid lobby_count {}", lobby_count)))?;
        let timestamp = DateTime::parse_from_rfc3339(&timestamp)
            .map_err(|e| Error::Internal(format!("invalid timestamp {}: {}", timestamp, e)))?
            .with_timezone(&Utc);

        Ok(StoredEvent {
            id,
            event: CountEvent {
                direction,
                lobby_count,
                timestamp,
            },
        })
    }
}

impl EventSink for SqliteEventSink {
    fn append(&self, event: &CountEvent) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute(
            "INSERT INTO count_events (direction, lobby_count, timestamp) VALUES (?1, ?2, ?3)",
            params![
                event.direction.as_str(),
                i64::from(event.lobby_count),
                event.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
            ],
        )
        .map_err(|e| Error::Persistence(e.to_string()))?;

        Ok(())
    }

    fn query(&self, limit: usize) -> Result<Vec<StoredEvent>> {
        let conn = self.conn.lock();

        let mut stmt = conn.prepare(
            "SELECT id, direction, lobby_count, timestamp FROM count_events
             ORDER BY timestamp DESC, id DESC LIMIT ?1",
        )?;

        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (id, direction, lobby_count, timestamp) = row?;
            events.push(Self::row_to_event(id, direction, lobby_count, timestamp)?);
        }
        Ok(events)
    }
}
