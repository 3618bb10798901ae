//! 带超时的事件写入
//! Event sink wrapper that bounds how long an append may block the caller
//!
//! 写入在独立的 `event-writer` 线程执行, 调用方通过 crossbeam 通道等待结果,
//! 超过 `timeout` 即返回 `Error::Persistence`. A timed-out append is not
//! cancelled: the writer finishes it later.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, RecvTimeoutError, SendTimeoutError, Sender};

use super::{EventSink, StoredEvent};
use crate::error::{Error, Result};
use crate::presence::CountEvent;

/// 写入队列深度
const QUEUE_DEPTH: usize = 8;

struct AppendJob {
    event: CountEvent,
    reply: Sender<Result<()>>,
}

pub struct BoundedAppender {
    sink: Arc<dyn EventSink>,
    jobs: Sender<AppendJob>,
    timeout: Duration,
}

impl BoundedAppender {
    pub fn new(sink: Arc<dyn EventSink>, timeout: Duration) -> Result<Self> {
        let (jobs, rx) = bounded::<AppendJob>(QUEUE_DEPTH);

        let writer_sink = sink.clone();
        thread::Builder::new()
            .name("event-writer".to_string())
            .spawn(move || {
                // 所有发送端释放后线程退出
                for job in rx {
                    let result = writer_sink.append(&job.event);
                    let _ = job.reply.send(result);
                }
                tracing::debug!("event writer exited");
            })?;

        Ok(Self {
            sink,
            jobs,
            timeout,
        })
    }
}

impl EventSink for BoundedAppender {
    fn append(&self, event: &CountEvent) -> Result<()> {
        let deadline = Instant::now() + self.timeout;
        let (reply, result) = bounded(1);

        let job = AppendJob {
            event: event.clone(),
            reply,
        };
        self.jobs.send_timeout(job, self.timeout).map_err(|e| match e {
            SendTimeoutError::Timeout(_) => Error::Persistence(format!(
                "event queue full after {:?}",
                self.timeout
            )),
            SendTimeoutError::Disconnected(_) => {
                Error::Persistence("event writer stopped".to_string())
            }
        })?;

        let remaining = deadline.saturating_duration_since(Instant::now());
        match result.recv_timeout(remaining) {
            Ok(outcome) => outcome,
            Err(RecvTimeoutError::Timeout) => Err(Error::Persistence(format!(
                "append timed out after {:?}",
                self.timeout
            ))),
            Err(RecvTimeoutError::Disconnected) => {
                Err(Error::Persistence("event writer stopped".to_string()))
            }
        }
    }

    fn query(&self, limit: usize) -> Result<Vec<StoredEvent>> {
        self.sink.query(limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryEventSink;
    use chrono::Utc;

    struct SlowSink {
        delay: Duration,
        inner: MemoryEventSink,
    }

    impl EventSink for SlowSink {
        fn append(&self, event: &CountEvent) -> Result<()> {
            thread::sleep(self.delay);
            self.inner.append(event)
        }

        fn query(&self, limit: usize) -> Result<Vec<StoredEvent>> {
            self.inner.query(limit)
        }
    }

    #[test]
    fn test_append_passes_through() {
        let inner = Arc::new(MemoryEventSink::new());
        let appender = BoundedAppender::new(inner.clone(), Duration::from_secs(2)).unwrap();

        appender.append(&CountEvent::present(2, Utc::now())).unwrap();
        assert_eq!(inner.events().len(), 1);
        assert_eq!(appender.latest().unwrap().unwrap().event.lobby_count, 2);
    }

    #[test]
    fn test_slow_store_times_out() {
        let slow = Arc::new(SlowSink {
            delay: Duration::from_millis(300),
            inner: MemoryEventSink::new(),
        });
        let appender = BoundedAppender::new(slow, Duration::from_millis(30)).unwrap();

        let started = Instant::now();
        let err = appender
            .append(&CountEvent::present(1, Utc::now()))
            .unwrap_err();
        assert!(matches!(err, Error::Persistence(_)));
        assert!(started.elapsed() < Duration::from_millis(250));
    }
}
