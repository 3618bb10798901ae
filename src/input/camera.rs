//! 摄像头输入
//!
//! 本地摄像头解码, 支持 DirectShow(Windows) / AVFoundation(macOS) / V4L2(Linux).
//! FFmpeg 负责缩放与 rgb24 转换, 解码线程通过有界通道交付帧.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use ez_ffmpeg::core::context::null_output::create_null_output;
use ez_ffmpeg::filter::frame_pipeline_builder::FramePipelineBuilder;
use ez_ffmpeg::{AVMediaType, FfmpegContext, Input};
use image::RgbImage;

use super::decode_filter::RgbFrameFilter;
use super::{FrameSource, SourceSettings};
use crate::error::{Error, Result};

/// 等待首帧的时间
const FIRST_FRAME_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_RETRIES: usize = 3;

pub struct CameraSource {
    url: String,
    frames: Receiver<RgbImage>,
    stop: Arc<AtomicBool>,
    pending: Option<RgbImage>,
}

impl CameraSource {
    /// 打开摄像头, 直到拿到第一帧才返回
    pub fn open(index: usize, settings: SourceSettings) -> Result<Self> {
        let url = camera_url(index)?;
        let (tx, frames) = bounded(settings.buffer_depth.max(1));
        let stop = Arc::new(AtomicBool::new(false));
        let filter = RgbFrameFilter::new(tx, stop.clone());

        let decode_url = url.clone();
        thread::Builder::new()
            .name(format!("camera-{}", index))
            .spawn(move || decode_camera(&decode_url, settings, filter))?;

        let pending = match frames.recv_timeout(FIRST_FRAME_TIMEOUT) {
            Ok(frame) => frame,
            Err(RecvTimeoutError::Timeout) => {
                stop.store(true, Ordering::Relaxed);
                return Err(Error::SourceUnavailable(format!(
                    "{}: no frame within {:?}",
                    url, FIRST_FRAME_TIMEOUT
                )));
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(Error::SourceUnavailable(format!("{}: cannot open", url)));
            }
        };

        tracing::info!(url = %url, "camera opened");
        Ok(Self {
            url,
            frames,
            stop,
            pending: Some(pending),
        })
    }
}

impl FrameSource for CameraSource {
    fn acquire(&mut self) -> Result<Option<RgbImage>> {
        if let Some(frame) = self.pending.take() {
            return Ok(Some(frame));
        }
        // 解码线程退出后通道断开, 视为流结束
        Ok(self.frames.recv().ok())
    }

    fn describe(&self) -> String {
        format!("camera:{}", self.url)
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

/// 获取可用的摄像头设备列表
pub fn camera_devices() -> Vec<(usize, String)> {
    match ez_ffmpeg::device::get_input_video_devices() {
        Ok(devices) => devices.into_iter().enumerate().collect(),
        Err(e) => {
            tracing::warn!(error = %e, "failed to list cameras");
            vec![]
        }
    }
}

fn input_format() -> &'static str {
    #[cfg(target_os = "windows")]
    {
        "dshow"
    }
    #[cfg(target_os = "macos")]
    {
        "avfoundation"
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        "v4l2"
    }
}

/// 格式化摄像头URL - 根据平台选择
fn camera_url(index: usize) -> Result<String> {
    #[cfg(target_os = "windows")]
    {
        // dshow 按设备名打开
        camera_devices()
            .into_iter()
            .find(|(i, _)| *i == index)
            .map(|(_, name)| format!("video={}", name))
            .ok_or_else(|| Error::SourceUnavailable(format!("no camera at index {}", index)))
    }
    #[cfg(target_os = "macos")]
    {
        Ok(format!("{}", index))
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        Ok(format!("/dev/video{}", index))
    }
}

fn decode_camera(url: &str, settings: SourceSettings, filter: RgbFrameFilter) {
    let format = input_format();
    let framerate = settings.fps.max(1).to_string();
    let video_size = format!("{}x{}", settings.width, settings.height);
    let filter_desc = format!("scale={}:{},format=rgb24", settings.width, settings.height);

    for attempt in 1..=MAX_RETRIES {
        let pipe: FramePipelineBuilder = AVMediaType::AVMEDIA_TYPE_VIDEO.into();
        let pipe = pipe.filter("rgb", Box::new(filter.clone()));
        let out = create_null_output().add_frame_pipeline(pipe);

        let input = Input::new(url)
            .set_format(format)
            .set_input_opts(
                [
                    ("framerate", framerate.as_str()),
                    ("video_size", video_size.as_str()),
                ]
                .into(),
            );

        let ctx = match FfmpegContext::builder()
            .input(input)
            .filter_desc(filter_desc.as_str())
            .output(out)
            .build()
        {
            Ok(ctx) => ctx,
            Err(e) => {
                tracing::warn!(url, attempt, error = %e, "camera busy or unavailable");
                thread::sleep(Duration::from_secs(1));
                continue;
            }
        };

        match ctx.start() {
            Ok(scheduler) => {
                let _ = scheduler.wait();
                tracing::info!(url, "camera decode loop ended");
            }
            Err(e) => tracing::error!(url, error = %e, "camera start failed"),
        }
        return;
    }
    tracing::error!(url, retries = MAX_RETRIES, "camera could not be opened");
}
