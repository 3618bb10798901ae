//! 图片序列输入
//! Plays a directory of still images as a video stream
//!
//! 文件按文件名排序, 尺寸不一致时缩放到配置分辨率. 目录读完即流结束.

use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use image::{imageops, RgbImage};

use super::{FrameSource, SourceSettings};
use crate::error::{Error, Result};

const EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

pub struct ImageSequenceSource {
    dir: PathBuf,
    files: Vec<PathBuf>,
    position: usize,
    settings: SourceSettings,
    next_due: Option<Instant>,
}

impl ImageSequenceSource {
    pub fn open<P: AsRef<Path>>(dir: P, settings: SourceSettings) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let entries = std::fs::read_dir(&dir).map_err(|e| {
            Error::SourceUnavailable(format!("cannot read {}: {}", dir.display(), e))
        })?;

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                    .unwrap_or(false)
            })
            .collect();
        files.sort();

        if files.is_empty() {
            return Err(Error::SourceUnavailable(format!(
                "no images in {}",
                dir.display()
            )));
        }

        tracing::info!(dir = %dir.display(), frames = files.len(), "image sequence opened");

        Ok(Self {
            dir,
            files,
            position: 0,
            settings,
            next_due: None,
        })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// 按 fps 限速
    fn pace(&mut self) {
        if self.settings.fps == 0 {
            return;
        }
        let interval = Duration::from_secs_f64(1.0 / self.settings.fps as f64);
        let now = Instant::now();
        let due = self.next_due.unwrap_or(now);
        if due > now {
            thread::sleep(due - now);
        }
        self.next_due = Some(due.max(now) + interval);
    }
}

impl FrameSource for ImageSequenceSource {
    fn acquire(&mut self) -> Result<Option<RgbImage>> {
        let Some(path) = self.files.get(self.position) else {
            return Ok(None);
        };
        self.position += 1;

        let frame = image::open(path)
            .map_err(|e| Error::SourceUnavailable(format!("{}: {}", path.display(), e)))?
            .to_rgb8();

        let frame = if frame.dimensions() != (self.settings.width, self.settings.height) {
            imageops::resize(
                &frame,
                self.settings.width,
                self.settings.height,
                imageops::FilterType::Triangle,
            )
        } else {
            frame
        };

        self.pace();
        Ok(Some(frame))
    }

    fn describe(&self) -> String {
        format!("images:{}", self.dir.display())
    }
}
