//! 人数聚合器
//! Presence aggregator: active-set size → recorded count → CountEvent
//!
//! A change is persisted synchronously before `update` returns. A failed
//! append is retried once; if that also fails the change is only logged and
//! the in-memory count remains the reference for the next comparison.

use std::sync::Arc;

use chrono::Utc;

use super::CountEvent;
use crate::storage::EventSink;

/// 人数变化结果
#[derive(Debug, Clone, PartialEq)]
pub struct PresenceChange {
    pub previous: u32,
    pub event: CountEvent,
    /// 是否写入成功 (含一次重试)
    pub persisted: bool,
}

pub struct PresenceAggregator {
    sink: Arc<dyn EventSink>,
    recorded: u32,
    events_emitted: u64,
    failed_appends: u64,
}

impl PresenceAggregator {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self::with_initial(sink, 0)
    }

    /// 以已知人数作为初始记录值 (例如数据库中最后一条事件)
    pub fn with_initial(sink: Arc<dyn EventSink>, recorded: u32) -> Self {
        Self {
            sink,
            recorded,
            events_emitted: 0,
            failed_appends: 0,
        }
    }

    pub fn recorded(&self) -> u32 {
        self.recorded
    }

    pub fn events_emitted(&self) -> u64 {
        self.events_emitted
    }

    pub fn failed_appends(&self) -> u64 {
        self.failed_appends
    }

    /// 比较当前活跃数与上次记录值, 不同则记录并写事件
    pub fn update(&mut self, active_count: usize) -> Option<PresenceChange> {
        let current = u32::try_from(active_count).unwrap_or(u32::MAX);
        if current == self.recorded {
            return None;
        }

        let previous = self.recorded;
        self.recorded = current;
        self.events_emitted += 1;

        let event = CountEvent::present(current, Utc::now());
        let persisted = self.persist(&event);

        tracing::info!(previous, lobby_count = current, persisted, "lobby count changed");

        Some(PresenceChange {
            previous,
            event,
            persisted,
        })
    }

    fn persist(&mut self, event: &CountEvent) -> bool {
        let Err(first) = self.sink.append(event) else {
            return true;
        };
        tracing::debug!(error = %first, "count event append failed, retrying once");

        match self.sink.append(event) {
            Ok(()) => true,
            Err(e) => {
                self.failed_appends += 1;
                tracing::warn!(
                    error = %e,
                    lobby_count = event.lobby_count,
                    failed_appends = self.failed_appends,
                    "count event not persisted, keeping in-memory count"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use crate::storage::{MemoryEventSink, StoredEvent};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// 前 `failures` 次写入失败的事件存储
    struct FlakySink {
        failures: usize,
        calls: AtomicUsize,
        inner: MemoryEventSink,
    }

    impl FlakySink {
        fn new(failures: usize) -> Self {
            Self {
                failures,
                calls: AtomicUsize::new(0),
                inner: MemoryEventSink::new(),
            }
        }
    }

    impl EventSink for FlakySink {
        fn append(&self, event: &CountEvent) -> Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(Error::Persistence("database is locked".into()));
            }
            self.inner.append(event)
        }

        fn query(&self, limit: usize) -> Result<Vec<StoredEvent>> {
            self.inner.query(limit)
        }
    }

    #[test]
    fn test_events_only_on_change() {
        let sink = Arc::new(MemoryEventSink::new());
        let mut aggregator = PresenceAggregator::new(sink.clone());

        let counts = [0usize, 1, 1, 2, 1];
        let changes: Vec<_> = counts
            .iter()
            .filter_map(|&c| aggregator.update(c))
            .collect();

        assert_eq!(changes.len(), 3);
        let stored: Vec<u32> = sink.events().iter().map(|e| e.lobby_count).collect();
        assert_eq!(stored, vec![1, 2, 1]);
        assert_eq!(aggregator.recorded(), 1);
        assert_eq!(aggregator.events_emitted(), 3);
    }

    #[test]
    fn test_seeded_count_suppresses_duplicate() {
        let sink = Arc::new(MemoryEventSink::new());
        let mut aggregator = PresenceAggregator::with_initial(sink.clone(), 2);
        assert!(aggregator.update(2).is_none());
        assert!(sink.events().is_empty());
    }

    #[test]
    fn test_single_failure_is_retried() {
        let sink = Arc::new(FlakySink::new(1));
        let mut aggregator = PresenceAggregator::new(sink.clone());

        let change = aggregator.update(1).unwrap();
        assert!(change.persisted);
        assert_eq!(sink.calls.load(Ordering::SeqCst), 2);
        assert_eq!(aggregator.failed_appends(), 0);
    }

    #[test]
    fn test_double_failure_keeps_memory_count() {
        let sink = Arc::new(FlakySink::new(2));
        let mut aggregator = PresenceAggregator::new(sink.clone());

        let change = aggregator.update(3).unwrap();
        assert!(!change.persisted);
        assert_eq!(aggregator.recorded(), 3);
        assert_eq!(aggregator.failed_appends(), 1);

        // 内存中的人数仍是比较基准
        assert!(aggregator.update(3).is_none());
        let change = aggregator.update(4).unwrap();
        assert!(change.persisted);
        assert_eq!(change.previous, 3);
    }
}
