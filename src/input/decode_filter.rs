//! FFmpeg 解码过滤器
//! FFmpeg frame filter that copies decoded RGB24 frames out of the decoder thread

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::{Sender, TrySendError};
use ez_ffmpeg::filter::frame_filter::FrameFilter;
use ez_ffmpeg::filter::frame_filter_context::FrameFilterContext;
use ez_ffmpeg::{AVMediaType, Frame};
use image::RgbImage;

/// 解码过滤器: scale + format=rgb24 之后的帧 → RgbImage
///
/// 下游处理不过来时丢弃新帧, 通道深度即缓冲深度.
#[derive(Clone)]
pub struct RgbFrameFilter {
    frames: Sender<RgbImage>,
    stop: Arc<AtomicBool>,
    decoded: usize,
    dropped: usize,
    last_report: Instant,
}

impl RgbFrameFilter {
    pub fn new(frames: Sender<RgbImage>, stop: Arc<AtomicBool>) -> Self {
        Self {
            frames,
            stop,
            decoded: 0,
            dropped: 0,
            last_report: Instant::now(),
        }
    }

    fn copy_rgb24(frame: &Frame) -> Option<RgbImage> {
        unsafe {
            let raw = frame.as_ptr();
            if raw.is_null() || frame.is_empty() || frame.is_corrupt() {
                return None;
            }

            let w = (*raw).width;
            let h = (*raw).height;
            if w <= 0 || h <= 0 || w > 4096 || h > 4096 {
                return None;
            }
            let (w, h) = (w as usize, h as usize);

            let plane = (*raw).data[0];
            let stride = (*raw).linesize[0];
            if plane.is_null() || stride < 0 || (stride as usize) < w * 3 {
                return None;
            }
            let stride = stride as usize;

            // 按行拷贝, 去掉 linesize 填充
            let mut pixels = Vec::with_capacity(w * h * 3);
            for row in 0..h {
                let line = std::slice::from_raw_parts(plane.add(row * stride), w * 3);
                pixels.extend_from_slice(line);
            }
            RgbImage::from_raw(w as u32, h as u32, pixels)
        }
    }
}

impl FrameFilter for RgbFrameFilter {
    fn media_type(&self) -> AVMediaType {
        AVMediaType::AVMEDIA_TYPE_VIDEO
    }

    fn init(&mut self, _ctx: &FrameFilterContext) -> Result<(), String> {
        tracing::debug!("decode thread started");
        Ok(())
    }

    fn filter_frame(
        &mut self,
        frame: Frame,
        _ctx: &FrameFilterContext,
    ) -> Result<Option<Frame>, String> {
        // 视频源已释放, 结束解码
        if self.stop.load(Ordering::Relaxed) {
            return Err("camera source closed".to_string());
        }

        let Some(image) = Self::copy_rgb24(&frame) else {
            self.dropped += 1;
            return Ok(None);
        };
        self.decoded += 1;

        match self.frames.try_send(image) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => self.dropped += 1,
            Err(TrySendError::Disconnected(_)) => {
                return Err("camera source closed".to_string());
            }
        }

        let elapsed = self.last_report.elapsed().as_secs_f64();
        if elapsed >= 5.0 {
            tracing::debug!(
                fps = self.decoded as f64 / elapsed,
                dropped = self.dropped,
                "decode stats"
            );
            self.decoded = 0;
            self.dropped = 0;
            self.last_report = Instant::now();
        }

        Ok(Some(frame))
    }

    fn uninit(&mut self, _ctx: &FrameFilterContext) {
        tracing::debug!("decode thread exited");
    }
}
