/// 视频输入系统 (Video Input System)
///
/// - ImageSequenceSource: 图片目录按文件名顺序回放
/// - CameraSource:        本地摄像头解码器 (V4L2/DirectShow/AVFoundation, feature `ffmpeg`)
pub mod sequence;
#[cfg(feature = "ffmpeg")]
pub mod camera;
#[cfg(feature = "ffmpeg")]
pub mod decode_filter;

pub use sequence::ImageSequenceSource;
#[cfg(feature = "ffmpeg")]
pub use camera::CameraSource;

use image::RgbImage;

use crate::error::Result;

/// 视频源参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceSettings {
    pub width: u32,
    pub height: u32,
    /// 0 = 不限速
    pub fps: u32,
    /// 解码缓冲深度 (帧)
    pub buffer_depth: usize,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            width: 960,
            height: 540,
            fps: 30,
            buffer_depth: 1,
        }
    }
}

/// 帧来源
///
/// `acquire` blocks until a frame is available. `Ok(None)` is end-of-stream;
/// an `Err` means the source broke and the run must end.
pub trait FrameSource: Send {
    fn acquire(&mut self) -> Result<Option<RgbImage>>;

    fn describe(&self) -> String;
}

/// 视频源工厂, 每次推流会话重新打开视频源
pub type SourceFactory = Box<dyn Fn() -> Result<Box<dyn FrameSource>> + Send + Sync>;

/// 内存帧源 (测试用)
#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use image::RgbImage;

    use super::FrameSource;
    use crate::error::Result;

    pub struct MemorySource {
        /// None = 无限帧
        remaining: Option<usize>,
        size: (u32, u32),
        delay: Duration,
        pub dropped: Arc<AtomicBool>,
    }

    impl MemorySource {
        pub fn frames(count: usize, width: u32, height: u32) -> Self {
            Self {
                remaining: Some(count),
                size: (width, height),
                delay: Duration::ZERO,
                dropped: Arc::new(AtomicBool::new(false)),
            }
        }

        pub fn endless(width: u32, height: u32, delay: Duration) -> Self {
            Self {
                remaining: None,
                size: (width, height),
                delay,
                dropped: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    impl FrameSource for MemorySource {
        fn acquire(&mut self) -> Result<Option<RgbImage>> {
            match &mut self.remaining {
                Some(0) => return Ok(None),
                Some(n) => *n -= 1,
                None => {}
            }
            if !self.delay.is_zero() {
                std::thread::sleep(self.delay);
            }
            Ok(Some(RgbImage::new(self.size.0, self.size.1)))
        }

        fn describe(&self) -> String {
            "memory".to_string()
        }
    }

    impl Drop for MemorySource {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::SeqCst);
        }
    }
}
