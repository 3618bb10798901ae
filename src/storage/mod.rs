//! 事件日志存储 (Event log)
//!
//! Append-only log of presence-count changes, queried newest first.

pub mod appender;
pub mod memory;
pub mod sqlite;

pub use appender::BoundedAppender;
pub use memory::MemoryEventSink;
pub use sqlite::SqliteEventSink;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::presence::CountEvent;

/// 已持久化的事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub id: i64,
    #[serde(flatten)]
    pub event: CountEvent,
}

pub trait EventSink: Send + Sync {
    /// 追加一条事件
    fn append(&self, event: &CountEvent) -> Result<()>;

    /// 最近的 `limit` 条事件, 按时间倒序
    fn query(&self, limit: usize) -> Result<Vec<StoredEvent>>;

    fn latest(&self) -> Result<Option<StoredEvent>> {
        Ok(self.query(1)?.into_iter().next())
    }
}
