/// 检测系统 (Detection System)
///
/// - Detector: 目标检测 (外部模型, 仅保留 person)
/// - Tracker:  质心跟踪, 跨帧分配持久身份
pub mod detector;
pub mod replay;
pub mod tracker;
pub mod types;
#[cfg(feature = "onnx")]
pub mod yolov8;

pub use detector::{filter_by_confidence, Detector, DetectorParams};
pub use replay::ReplayDetector;
pub use tracker::{CentroidTracker, Identity, IdentityId, TrackUpdate, TrackerConfig};
pub use types::{BBox, Detection, Point};
#[cfg(feature = "onnx")]
pub use yolov8::YoloV8Detector;
