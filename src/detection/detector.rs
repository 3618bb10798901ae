//! 检测器接口 (Detector)
//! 职责: 帧 → 人体检测框
//!
//! The model itself is a black box behind [`Detector`]; the pipeline only
//! relies on boxes in pixel coordinates with a confidence in `[0, 1]`.

use image::RgbImage;

use super::types::{Detection, PERSON_CLASS_ID};
use crate::error::Result;

/// 检测参数
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorParams {
    /// 置信度阈值
    pub conf_threshold: f32,
    /// NMS IOU 阈值
    pub iou_threshold: f32,
    /// 保留的类别 (默认只保留 person)
    pub classes: Vec<u32>,
}

impl Default for DetectorParams {
    fn default() -> Self {
        Self {
            conf_threshold: 0.5,
            iou_threshold: 0.45,
            classes: vec![PERSON_CLASS_ID],
        }
    }
}

impl DetectorParams {
    pub fn accepts_class(&self, class_id: u32) -> bool {
        self.classes.is_empty() || self.classes.contains(&class_id)
    }
}

/// 统一的检测器接口
///
/// 实现者负责类别过滤和NMS; 管线在此之后仍会再按置信度过滤一次
pub trait Detector: Send {
    fn detect(&mut self, frame: &RgbImage, params: &DetectorParams) -> Result<Vec<Detection>>;

    /// 用于日志的名称
    fn name(&self) -> &str;
}

/// 丢弃低于阈值的检测 (`confidence < threshold` 被丢弃)
pub fn filter_by_confidence(detections: &mut Vec<Detection>, threshold: f32) -> usize {
    let before = detections.len();
    detections.retain(|d| d.confidence >= threshold);
    before - detections.len()
}
