//! 运行参数
//! Command line / environment configuration
//!
//! Every option can also be set through the environment variable named in its
//! `env` attribute.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::detection::{DetectorParams, TrackerConfig};
use crate::input::SourceSettings;
use crate::pipeline::PipelineConfig;

/// 大堂人数统计服务
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "大堂人数统计 (lobby people counter)", long_about = None)]
pub struct Args {
    /// 摄像头索引 (0 = 默认摄像头)
    #[arg(long, env = "CAMERA_INDEX", default_value_t = 0)]
    pub camera_index: usize,

    /// 图片目录, 设置后代替摄像头按文件名顺序回放
    #[arg(long, env = "FRAMES_DIR")]
    pub frames_dir: Option<PathBuf>,

    /// YOLOv8 ONNX 模型路径
    #[arg(long, env = "YOLO_MODEL_PATH", default_value = "yolov8n.onnx")]
    pub model: String,

    /// 检测结果回放文件 (JSON lines), 设置后代替模型
    #[arg(long, env = "DETECTIONS_FILE")]
    pub detections: Option<PathBuf>,

    /// 置信度阈值
    #[arg(long, env = "CONF_THRESHOLD", default_value_t = 0.5)]
    pub conf: f32,

    /// NMS IOU 阈值
    #[arg(long, env = "IOU_THRESHOLD", default_value_t = 0.45)]
    pub iou: f32,

    /// 计数线位置 (画面宽度比例)
    #[arg(long, env = "LINE_POSITION", default_value_t = 0.5)]
    pub line_position: f32,

    #[arg(long, env = "FRAME_WIDTH", default_value_t = 960)]
    pub width: u32,

    #[arg(long, env = "FRAME_HEIGHT", default_value_t = 540)]
    pub height: u32,

    /// 每 N 帧处理一帧 (1 = 每帧)
    #[arg(long, env = "SKIP_FRAMES", default_value_t = 1, allow_negative_numbers = true)]
    pub skip_frames: i64,

    /// 最大匹配距离 (像素)
    #[arg(long, env = "MAX_DISTANCE", default_value_t = 70.0)]
    pub max_distance: f32,

    /// 连续消失多少帧后移除身份
    #[arg(long, env = "MAX_DISAPPEARED", default_value_t = 12)]
    pub max_disappeared: u32,

    /// 最后出现记录保留帧数
    #[arg(long, env = "STALE_RETENTION", default_value_t = 90)]
    pub stale_retention: u64,

    /// 采集帧率 (0 = 不限速)
    #[arg(long, env = "FPS", default_value_t = 30)]
    pub fps: u32,

    /// 解码缓冲深度
    #[arg(long, env = "BUFFER_DEPTH", default_value_t = 1)]
    pub buffer_depth: usize,

    /// SQLite 数据库路径, `:memory:` 不落盘
    #[arg(long, env = "DATABASE_PATH", default_value = "people_counter.db")]
    pub database: String,

    /// HTTP 监听地址
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:5000")]
    pub bind: String,

    /// 事件写入超时 (毫秒)
    #[arg(long, env = "EVENT_TIMEOUT_MS", default_value_t = 500)]
    pub event_timeout_ms: u64,

    #[arg(long, env = "JPEG_QUALITY", default_value_t = 80)]
    pub jpeg_quality: u8,

    /// 标签字体 (TTF/OTF), 不设置则查找 assets/font 与系统字体目录
    #[arg(long, env = "FONT_PATH")]
    pub font: Option<PathBuf>,

    /// 日志过滤 (覆盖 RUST_LOG)
    #[arg(long, env = "LOG_FILTER")]
    pub log: Option<String>,
}

impl Args {
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            detector: DetectorParams {
                conf_threshold: self.conf,
                iou_threshold: self.iou,
                ..Default::default()
            },
            tracker: TrackerConfig {
                max_distance: self.max_distance,
                max_disappeared: self.max_disappeared,
            },
            line_position: self.line_position,
            skip_frames: self.skip_frames.clamp(1, i64::from(u32::MAX)) as u32,
            stale_retention: self.stale_retention,
            jpeg_quality: self.jpeg_quality,
        }
    }

    pub fn source_settings(&self) -> SourceSettings {
        SourceSettings {
            width: self.width,
            height: self.height,
            fps: self.fps,
            buffer_depth: self.buffer_depth.max(1),
        }
    }

    pub fn event_timeout(&self) -> Duration {
        Duration::from_millis(self.event_timeout_ms)
    }
}
