//! In-memory event log, used by tests and `--database :memory:` runs.

use parking_lot::Mutex;

use super::{EventSink, StoredEvent};
use crate::error::Result;
use crate::presence::CountEvent;

#[derive(Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<StoredEvent>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// 按写入顺序返回全部事件
    pub fn events(&self) -> Vec<CountEvent> {
        self.events.lock().iter().map(|e| e.event.clone()).collect()
    }
}

impl EventSink for MemoryEventSink {
    fn append(&self, event: &CountEvent) -> Result<()> {
        let mut events = self.events.lock();
        let id = events.len() as i64 + 1;
        events.push(StoredEvent {
            id,
            event: event.clone(),
        });
        Ok(())
    }

    fn query(&self, limit: usize) -> Result<Vec<StoredEvent>> {
        let events = self.events.lock();
        let mut newest: Vec<StoredEvent> = events.clone();
        // 时间戳相同时, 后写入的排在前面
        newest.sort_by(|a, b| {
            b.event
                .timestamp
                .cmp(&a.event.timestamp)
                .then(b.id.cmp(&a.id))
        });
        newest.truncate(limit);
        Ok(newest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[test]
    fn test_query_newest_first_with_limit() {
        let sink = MemoryEventSink::new();
        let t0 = Utc::now();
        for (i, count) in [1u32, 2, 3].iter().enumerate() {
            sink.append(&CountEvent::present(*count, t0 + Duration::seconds(i as i64)))
                .unwrap();
        }

        let events = sink.query(2).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event.lobby_count, 3);
        assert_eq!(events[1].event.lobby_count, 2);
        assert_eq!(sink.latest().unwrap().unwrap().event.lobby_count, 3);
    }
}
