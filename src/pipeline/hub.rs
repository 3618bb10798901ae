//! 推流中心
//! Fan-out point between one producer thread and any number of stream consumers
//!
//! The first subscriber opens a frame source and starts a `frame-producer`
//! thread that owns the [`FramePipeline`]. Every subscriber receives the same
//! parts over a `tokio::sync::broadcast` channel. When the last receiver is
//! dropped the producer stops after its current cycle, releases the source and
//! hands the pipeline back, so the next session resumes with the same tracker,
//! count and frame index. Source exhaustion drops the sender, which closes
//! every subscriber's stream.
//!
//! [`FrameHub::open`] opens the first source eagerly so an unusable camera is
//! reported at startup; that source is handed to the first session.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use super::{FramePipeline, PipelineStats};
use crate::error::{Error, Result};
use crate::input::{FrameSource, SourceFactory};

struct HubState {
    /// 空闲时由推流中心持有, 推流时由推流线程持有
    pipeline: Option<FramePipeline>,
    worker: Option<JoinHandle<FramePipeline>>,
    /// 启动时预先打开的视频源, 留给第一个会话
    primed: Option<Box<dyn FrameSource>>,
    /// Some 表示正在推流
    tx: Option<broadcast::Sender<Bytes>>,
}

struct HubInner {
    factory: SourceFactory,
    state: Mutex<HubState>,
    capacity: usize,
    stats: Arc<PipelineStats>,
}

#[derive(Clone)]
pub struct FrameHub {
    inner: Arc<HubInner>,
}

impl FrameHub {
    /// `capacity` 为每个订阅者可积压的分片数
    pub fn new(pipeline: FramePipeline, factory: SourceFactory, capacity: usize) -> Self {
        let stats = pipeline.stats();
        Self {
            inner: Arc::new(HubInner {
                factory,
                state: Mutex::new(HubState {
                    pipeline: Some(pipeline),
                    worker: None,
                    primed: None,
                    tx: None,
                }),
                capacity: capacity.max(1),
                stats,
            }),
        }
    }

    /// 立即打开一次视频源, 失败直接返回错误
    pub fn open(pipeline: FramePipeline, factory: SourceFactory, capacity: usize) -> Result<Self> {
        let source = factory()?;
        tracing::info!(source = %source.describe(), "frame source opened");
        let hub = Self::new(pipeline, factory, capacity);
        hub.inner.state.lock().primed = Some(source);
        Ok(hub)
    }

    pub fn stats(&self) -> Arc<PipelineStats> {
        self.inner.stats.clone()
    }

    pub fn is_streaming(&self) -> bool {
        self.inner.state.lock().tx.is_some()
    }

    /// 订阅输出流, 没有推流线程时启动一个
    pub fn subscribe(&self) -> Result<broadcast::Receiver<Bytes>> {
        let mut state = self.inner.state.lock();
        if let Some(tx) = &state.tx {
            return Ok(tx.subscribe());
        }

        // tx 为空时旧的推流线程已不会再加锁, 可以在锁内 join
        let mut pipeline = match (state.pipeline.take(), state.worker.take()) {
            (Some(pipeline), _) => pipeline,
            (None, Some(worker)) => worker
                .join()
                .map_err(|_| Error::Internal("frame producer panicked".to_string()))?,
            (None, None) => return Err(Error::Internal("pipeline lost".to_string())),
        };

        let opened = match state.primed.take() {
            Some(source) => Ok(source),
            None => (self.inner.factory)(),
        };
        let source = match opened {
            Ok(source) => source,
            Err(e) => {
                state.pipeline = Some(pipeline);
                return Err(e);
            }
        };
        pipeline.attach_source(source);

        let (tx, rx) = broadcast::channel(self.inner.capacity);
        let inner = self.inner.clone();
        let producer_tx = tx.clone();
        let spawned = thread::Builder::new()
            .name("frame-producer".to_string())
            .spawn(move || produce(inner, pipeline, producer_tx));

        match spawned {
            Ok(worker) => {
                state.tx = Some(tx);
                state.worker = Some(worker);
                self.inner.stats.session_started();
                tracing::info!("stream session started");
                Ok(rx)
            }
            // spawn 失败时 pipeline 已随闭包丢失
            Err(e) => Err(Error::Io(e)),
        }
    }
}

/// 推流线程 panic 时结束会话, 让订阅者的流关闭
struct ProducerGuard<'a>(&'a HubInner);

impl Drop for ProducerGuard<'_> {
    fn drop(&mut self) {
        // 正常退出时 tx 已在锁内清空, 此时 subscribe 可能正持锁 join 本线程
        if thread::panicking() {
            self.0.state.lock().tx = None;
            tracing::error!("frame producer panicked, stream ended");
        }
    }
}

fn produce(
    inner: Arc<HubInner>,
    mut pipeline: FramePipeline,
    tx: broadcast::Sender<Bytes>,
) -> FramePipeline {
    let _guard = ProducerGuard(&inner);
    loop {
        {
            let mut state = inner.state.lock();
            if tx.receiver_count() == 0 {
                state.tx = None;
                tracing::info!(frame_index = pipeline.frame_index(), "no subscribers, stream paused");
                break;
            }
        }

        match pipeline.next_part() {
            Ok(Some(part)) => {
                // 发送失败只说明订阅者刚好全部断开, 下一轮检查
                let _ = tx.send(part);
            }
            Ok(None) => {
                inner.state.lock().tx = None;
                tracing::info!(frame_index = pipeline.frame_index(), "stream ended");
                break;
            }
            Err(e) => {
                inner.state.lock().tx = None;
                tracing::error!(error = %e, "frame source failed, stream ended");
                break;
            }
        }
    }

    if let Some(source) = pipeline.detach_source() {
        tracing::debug!(source = %source.describe(), "frame source released");
    }
    pipeline
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::{Detection, Detector, DetectorParams, ReplayDetector};
    use crate::input::testing::MemorySource;
    use crate::pipeline::PipelineConfig;
    use crate::presence::PresenceAggregator;
    use crate::renderer::FrameAnnotator;
    use crate::storage::MemoryEventSink;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use image::RgbImage;
    use std::time::{Duration, Instant};
    use tokio::sync::broadcast::error::RecvError;

    struct PanickingDetector;

    impl Detector for PanickingDetector {
        fn detect(&mut self, _frame: &RgbImage, _params: &DetectorParams) -> Result<Vec<Detection>> {
            panic!("detector state corrupted");
        }

        fn name(&self) -> &str {
            "panicking"
        }
    }

    fn pipeline() -> FramePipeline {
        FramePipeline::new(
            PipelineConfig::default(),
            Box::new(ReplayDetector::from_frames(vec![])),
            PresenceAggregator::new(Arc::new(MemoryEventSink::new())),
            FrameAnnotator::new(0.5),
        )
        .unwrap()
    }

    fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    fn drain(rx: &mut broadcast::Receiver<Bytes>) -> usize {
        let mut parts = 0;
        loop {
            match rx.blocking_recv() {
                Ok(_) => parts += 1,
                Err(RecvError::Lagged(n)) => parts += n as usize,
                Err(RecvError::Closed) => return parts,
            }
        }
    }

    #[test]
    fn test_exhaustion_closes_stream_and_restart_resumes() {
        let opened = Arc::new(AtomicUsize::new(0));
        let counter = opened.clone();
        let factory: SourceFactory = Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(MemorySource::frames(3, 32, 32)) as Box<dyn FrameSource>)
        });
        let hub = FrameHub::new(pipeline(), factory, 16);

        let mut rx = hub.subscribe().unwrap();
        drain(&mut rx);
        assert!(wait_until(|| !hub.is_streaming()));

        let mut rx = hub.subscribe().unwrap();
        drain(&mut rx);
        assert!(wait_until(|| !hub.is_streaming()));

        assert_eq!(opened.load(Ordering::SeqCst), 2);
        let stats = hub.stats().snapshot();
        assert_eq!(stats.frames_ingested, 6);
        assert_eq!(stats.sessions, 2);
    }

    #[test]
    fn test_last_subscriber_leaving_releases_source() {
        let dropped: Arc<Mutex<Vec<Arc<AtomicBool>>>> = Arc::new(Mutex::new(Vec::new()));
        let flags = dropped.clone();
        let factory: SourceFactory = Box::new(move || {
            let source = MemorySource::endless(32, 32, Duration::from_millis(2));
            flags.lock().push(source.dropped.clone());
            Ok(Box::new(source) as Box<dyn FrameSource>)
        });
        let hub = FrameHub::new(pipeline(), factory, 4);

        let mut rx = hub.subscribe().unwrap();
        let mut second = hub.subscribe().unwrap();
        assert!(rx.blocking_recv().is_ok());
        assert!(second.blocking_recv().is_ok());
        drop(rx);
        drop(second);

        assert!(wait_until(|| !hub.is_streaming()));
        assert!(wait_until(|| dropped.lock()[0].load(Ordering::SeqCst)));
        let ingested = hub.stats().snapshot().frames_ingested;

        let mut rx = hub.subscribe().unwrap();
        assert!(rx.blocking_recv().is_ok());
        assert_eq!(dropped.lock().len(), 2);
        assert!(hub.stats().snapshot().frames_ingested > ingested);
    }

    #[test]
    fn test_factory_failure_keeps_pipeline() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let factory: SourceFactory = Box::new(move || {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(Error::SourceUnavailable("camera busy".to_string()))
            } else {
                Ok(Box::new(MemorySource::frames(1, 32, 32)) as Box<dyn FrameSource>)
            }
        });
        let hub = FrameHub::new(pipeline(), factory, 4);

        let err = hub.subscribe().unwrap_err();
        assert!(matches!(err, Error::SourceUnavailable(_)));
        assert!(!hub.is_streaming());

        let mut rx = hub.subscribe().unwrap();
        assert_eq!(drain(&mut rx), 1);
    }

    #[test]
    fn test_open_reports_unavailable_source() {
        let factory: SourceFactory =
            Box::new(|| Err(Error::SourceUnavailable("no camera at index 3".to_string())));

        let err = FrameHub::open(pipeline(), factory, 4).err().unwrap();
        assert!(matches!(err, Error::SourceUnavailable(_)));
    }

    #[test]
    fn test_open_source_serves_first_session() {
        let opened = Arc::new(AtomicUsize::new(0));
        let counter = opened.clone();
        let factory: SourceFactory = Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(MemorySource::frames(2, 32, 32)) as Box<dyn FrameSource>)
        });
        let hub = FrameHub::open(pipeline(), factory, 16).unwrap();
        assert_eq!(opened.load(Ordering::SeqCst), 1);
        assert!(!hub.is_streaming());

        let mut rx = hub.subscribe().unwrap();
        assert_eq!(drain(&mut rx), 2);
        assert_eq!(opened.load(Ordering::SeqCst), 1);
        assert!(wait_until(|| !hub.is_streaming()));

        let mut rx = hub.subscribe().unwrap();
        assert_eq!(drain(&mut rx), 2);
        assert_eq!(opened.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_producer_panic_closes_stream() {
        let pipeline = FramePipeline::new(
            PipelineConfig::default(),
            Box::new(PanickingDetector),
            PresenceAggregator::new(Arc::new(MemoryEventSink::new())),
            FrameAnnotator::new(0.5),
        )
        .unwrap();
        let factory: SourceFactory = Box::new(|| {
            Ok(Box::new(MemorySource::endless(32, 32, Duration::from_millis(1))) as Box<dyn FrameSource>)
        });
        let hub = FrameHub::new(pipeline, factory, 4);

        let mut rx = hub.subscribe().unwrap();
        assert_eq!(drain(&mut rx), 0);
        assert!(wait_until(|| !hub.is_streaming()));

        let err = hub.subscribe().unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
        assert!(!hub.is_streaming());
    }
}
