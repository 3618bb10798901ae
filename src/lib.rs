#![allow(clippy::type_complexity)]
// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
pub mod config; // 运行参数
pub mod detection; // 人体检测与身份跟踪
pub mod error; // 错误类型
pub mod input; // 视频输入系统
pub mod pipeline; // 人数统计流水线
pub mod presence; // 人数聚合与事件
pub mod renderer; // 画面标注与编码
pub mod server; // HTTP 接口
pub mod storage; // 事件持久化

pub use crate::config::Args;
pub use crate::error::{Error, Result};
pub use crate::pipeline::{CycleReport, FrameHub, FramePipeline, PipelineConfig};
