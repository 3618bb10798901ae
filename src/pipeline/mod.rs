/// 人数统计流水线 (Counting Pipeline)
///
/// 每个周期: 取帧 → (跳帧) → 检测 → 匹配 → 聚合 → 清理 → 标注 → 编码 → 输出
///
/// - FramePipeline: 单线程顺序执行, 拥有全部跟踪状态
/// - FrameHub:      多个订阅者共享同一个推流线程
pub mod hub;
pub mod stats;

pub use hub::FrameHub;
pub use stats::{PipelineStats, StatsSnapshot};

use std::collections::HashSet;
use std::sync::Arc;

use bytes::Bytes;
use image::RgbImage;

use crate::detection::{
    filter_by_confidence, CentroidTracker, Detection, Detector, DetectorParams, IdentityId,
    TrackerConfig,
};
use crate::error::{Error, Result};
use crate::input::FrameSource;
use crate::presence::{PresenceAggregator, PresenceChange, StaleMemory};
use crate::renderer::{Coasting, FrameAnnotator, FrameEncoder, Overlay};

// ========== 配置 ==========

/// 连续读帧失败上限, 超过即视为视频源不可用
const MAX_READ_FAILURES: usize = 30;

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub detector: DetectorParams,
    pub tracker: TrackerConfig,
    /// 计数线位置 (画面宽度比例, 仅显示)
    pub line_position: f32,
    /// 每 N 帧处理一帧, 小于 1 按 1 处理
    pub skip_frames: u32,
    /// 最后出现记录保留帧数
    pub stale_retention: u64,
    pub jpeg_quality: u8,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            detector: DetectorParams::default(),
            tracker: TrackerConfig::default(),
            line_position: 0.5,
            skip_frames: 1,
            stale_retention: 90,
            jpeg_quality: 80,
        }
    }
}

impl PipelineConfig {
    pub fn stride(&self) -> u64 {
        u64::from(self.skip_frames.max(1))
    }

    pub fn validate(&self) -> Result<()> {
        let unit = |name: &str, v: f32| {
            if (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(Error::Config(format!("{} must be within [0, 1], got {}", name, v)))
            }
        };
        unit("confidence threshold", self.detector.conf_threshold)?;
        unit("iou threshold", self.detector.iou_threshold)?;
        unit("line position", self.line_position)?;

        if !(self.tracker.max_distance.is_finite() && self.tracker.max_distance > 0.0) {
            return Err(Error::Config(format!(
                "max distance must be positive, got {}",
                self.tracker.max_distance
            )));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(Error::Config(format!(
                "jpeg quality must be within [1, 100], got {}",
                self.jpeg_quality
            )));
        }
        Ok(())
    }
}

// ========== 周期结果 ==========

/// 一个处理周期的结果
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub frame_index: u64,
    pub detections: Vec<Detection>,
    pub assignments: Vec<Option<IdentityId>>,
    pub lobby_count: u32,
    pub change: Option<PresenceChange>,
    pub expired: Vec<IdentityId>,
    pub reaped: Vec<IdentityId>,
}

// ========== 流水线 ==========

pub struct FramePipeline {
    config: PipelineConfig,
    source: Option<Box<dyn FrameSource>>,
    detector: Box<dyn Detector>,
    tracker: CentroidTracker,
    presence: PresenceAggregator,
    memory: StaleMemory,
    annotator: FrameAnnotator,
    encoder: FrameEncoder,
    frame_index: u64,
    stats: Arc<PipelineStats>,
}

impl FramePipeline {
    pub fn new(
        config: PipelineConfig,
        detector: Box<dyn Detector>,
        presence: PresenceAggregator,
        annotator: FrameAnnotator,
    ) -> Result<Self> {
        config.validate()?;

        let stats = Arc::new(PipelineStats::default());
        stats.set_presence(
            presence.recorded(),
            presence.events_emitted(),
            presence.failed_appends(),
        );

        tracing::info!(
            detector = detector.name(),
            stride = config.stride(),
            max_distance = config.tracker.max_distance,
            max_disappeared = config.tracker.max_disappeared,
            lobby_count = presence.recorded(),
            "pipeline ready"
        );

        Ok(Self {
            tracker: CentroidTracker::new(config.tracker),
            memory: StaleMemory::new(config.stale_retention),
            encoder: FrameEncoder::new(config.jpeg_quality),
            config,
            source: None,
            detector,
            presence,
            annotator,
            frame_index: 0,
            stats,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn stats(&self) -> Arc<PipelineStats> {
        self.stats.clone()
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn tracker(&self) -> &CentroidTracker {
        &self.tracker
    }

    pub fn presence(&self) -> &PresenceAggregator {
        &self.presence
    }

    pub fn memory(&self) -> &StaleMemory {
        &self.memory
    }

    pub fn attach_source(&mut self, source: Box<dyn FrameSource>) {
        tracing::info!(source = %source.describe(), "frame source attached");
        self.source = Some(source);
    }

    /// 释放视频源, 跟踪状态保留
    pub fn detach_source(&mut self) -> Option<Box<dyn FrameSource>> {
        self.source.take()
    }

    pub fn has_source(&self) -> bool {
        self.source.is_some()
    }

    /// 按跳帧规则处理一帧; 被跳过的帧返回 None
    pub fn ingest(&mut self, frame: &mut RgbImage) -> Option<CycleReport> {
        self.frame_index += 1;
        self.stats.frame_ingested();
        if self.frame_index % self.config.stride() != 0 {
            return None;
        }
        Some(self.run_cycle(frame))
    }

    /// 不经跳帧判断直接处理一帧 (帧序号照常前进)
    pub fn process_frame(&mut self, frame: &mut RgbImage) -> CycleReport {
        self.frame_index += 1;
        self.stats.frame_ingested();
        self.run_cycle(frame)
    }

    /// 取帧直到产出一个编码分片
    ///
    /// `Ok(None)` 表示视频源结束 (或未挂载视频源); `Err` 只会是终止性的视频源错误.
    pub fn next_part(&mut self) -> Result<Option<Bytes>> {
        let mut read_failures = 0;
        loop {
            let Some(source) = self.source.as_mut() else {
                return Ok(None);
            };
            let mut frame = match source.acquire() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    tracing::info!(frame_index = self.frame_index, "frame source exhausted");
                    return Ok(None);
                }
                Err(e) if e.is_terminal() => return Err(e),
                Err(e) => {
                    read_failures += 1;
                    if read_failures > MAX_READ_FAILURES {
                        return Err(Error::SourceUnavailable(format!(
                            "{} consecutive read failures, last: {}",
                            read_failures, e
                        )));
                    }
                    tracing::warn!(error = %e, "frame read failed, skipping");
                    continue;
                }
            };
            read_failures = 0;

            if self.ingest(&mut frame).is_none() {
                continue;
            }

            match self.encoder.encode_part(&frame) {
                Ok(part) => {
                    self.stats.frame_emitted();
                    return Ok(Some(part));
                }
                Err(e) => {
                    self.stats.encoding_error();
                    tracing::warn!(frame_index = self.frame_index, error = %e, "frame dropped");
                }
            }
        }
    }

    fn run_cycle(&mut self, frame: &mut RgbImage) -> CycleReport {
        let frame_index = self.frame_index;

        // 1. 检测
        let mut detections = match self.detector.detect(frame, &self.config.detector) {
            Ok(d) => d,
            Err(e) => {
                self.stats.detection_error();
                tracing::warn!(frame_index, detector = self.detector.name(), error = %e,
                    "detection failed, treating frame as empty");
                Vec::new()
            }
        };
        filter_by_confidence(&mut detections, self.config.detector.conf_threshold);

        // 2. 匹配
        let centroids: Vec<_> = detections.iter().map(|d| d.centroid).collect();
        let update = self.tracker.update(&centroids);
        for id in update.assignments.iter().flatten() {
            self.memory.touch(*id, frame_index);
        }
        if !update.created.is_empty() || !update.expired.is_empty() {
            tracing::debug!(frame_index, created = ?update.created, expired = ?update.expired,
                "identities changed");
        }

        // 3. 聚合
        let change = self.presence.update(self.tracker.active_count());
        let lobby_count = self.presence.recorded();

        // 4. 清理
        let active: HashSet<IdentityId> = self.tracker.identities().map(|i| i.id).collect();
        let reaped = self.memory.reap(&active, frame_index);

        // 5. 标注
        let coasting: Vec<Coasting> = self
            .tracker
            .identities()
            .filter(|i| i.disappeared > 0)
            .map(|i| Coasting {
                id: i.id,
                centroid: i.last_centroid,
                frames_unseen: self
                    .memory
                    .last_seen(i.id)
                    .map(|seen| frame_index.saturating_sub(seen))
                    .unwrap_or(u64::from(i.disappeared)),
            })
            .collect();
        self.annotator.annotate(
            frame,
            &Overlay {
                detections: &detections,
                assignments: &update.assignments,
                coasting: &coasting,
                lobby_count,
            },
        );

        self.stats.frame_processed();
        self.stats.set_active(active.len());
        self.stats.set_presence(
            lobby_count,
            self.presence.events_emitted(),
            self.presence.failed_appends(),
        );

        CycleReport {
            frame_index,
            detections,
            assignments: update.assignments,
            lobby_count,
            change,
            expired: update.expired,
            reaped,
        }
    }
}

impl Iterator for FramePipeline {
    type Item = Bytes;

    fn next(&mut self) -> Option<Bytes> {
        match self.next_part() {
            Ok(part) => part,
            Err(e) => {
                tracing::error!(error = %e, "frame source failed, ending stream");
                self.source = None;
                None
            }
        }
    }
}
