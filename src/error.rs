//! 错误类型定义
//! Error types for the counting pipeline
//!
//! Only `SourceUnavailable` may end a pipeline run; every other variant is
//! contained to the frame cycle that raised it.

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// 视频源无法打开/读取
    #[error("Frame source unavailable: {0}")]
    SourceUnavailable(String),

    /// 单帧检测失败 (按零检测处理)
    #[error("Detection failed: {0}")]
    Detection(String),

    /// 事件写入失败或超时
    #[error("Persistence failed: {0}")]
    Persistence(String),

    /// 帧编码失败 (丢弃该帧)
    #[error("Encoding failed: {0}")]
    Encoding(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error ends the pipeline run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Error::SourceUnavailable(_))
    }
}
