//! 帧标注
//! Draws tracking overlays onto a frame. Presentation only: nothing here feeds
//! back into counting.

use std::path::{Path, PathBuf};

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{
    draw_filled_circle_mut, draw_hollow_circle_mut, draw_hollow_rect_mut, draw_line_segment_mut,
    draw_text_mut,
};
use imageproc::rect::Rect;

use crate::detection::{Detection, IdentityId, Point};
use crate::error::{Error, Result};

// ========== 颜色 ==========

const LINE_COLOR: Rgb<u8> = Rgb([255, 200, 90]);
const BOX_COLOR: Rgb<u8> = Rgb([0, 200, 0]);
const CENTROID_COLOR: Rgb<u8> = Rgb([220, 0, 0]);
const COASTING_COLOR: Rgb<u8> = Rgb([160, 160, 160]);
const COUNT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

/// 未指定字体时依次尝试的位置
const DEFAULT_FONT_PATHS: &[&str] = &[
    "assets/font/msyh.ttc",
    "assets/font/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "/Library/Fonts/Arial.ttf",
    "C:\\Windows\\Fonts\\msyh.ttc",
    "C:\\Windows\\Fonts\\arial.ttf",
];

/// 第一个存在的默认字体文件
pub fn find_default_font() -> Option<PathBuf> {
    DEFAULT_FONT_PATHS
        .iter()
        .map(PathBuf::from)
        .find(|path| path.is_file())
}

const CENTROID_RADIUS: i32 = 4;
const COASTING_RADIUS: i32 = 8;

/// 本帧未匹配但仍在跟踪的身份
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coasting {
    pub id: IdentityId,
    pub centroid: Point,
    pub frames_unseen: u64,
}

/// 一帧的标注内容
pub struct Overlay<'a> {
    pub detections: &'a [Detection],
    /// 与 `detections` 一一对应
    pub assignments: &'a [Option<IdentityId>],
    pub coasting: &'a [Coasting],
    pub lobby_count: u32,
}

pub struct FrameAnnotator {
    line_position: f32,
    font: Option<FontVec>,
    label_scale: PxScale,
    count_scale: PxScale,
}

impl FrameAnnotator {
    /// 不带字体: 只画图形, 不画文字
    pub fn new(line_position: f32) -> Self {
        Self {
            line_position: line_position.clamp(0.0, 1.0),
            font: None,
            label_scale: PxScale::from(18.0),
            count_scale: PxScale::from(28.0),
        }
    }

    /// 加载 TTF/OTF 字体用于标签
    pub fn with_font_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path)?;
        let font = FontVec::try_from_vec(data)
            .map_err(|e| Error::Config(format!("invalid font {}: {}", path.display(), e)))?;
        self.font = Some(font);
        Ok(self)
    }

    /// 尝试加载默认字体; 找不到时保持无文字模式
    pub fn with_default_font(self) -> Self {
        let Some(path) = find_default_font() else {
            tracing::warn!("no default font found, labels and count text are not drawn");
            return self;
        };
        let line_position = self.line_position;
        match self.with_font_file(&path) {
            Ok(annotator) => {
                tracing::info!(font = %path.display(), "label font loaded");
                annotator
            }
            Err(e) => {
                tracing::warn!(font = %path.display(), error = %e, "default font unusable");
                Self::new(line_position)
            }
        }
    }

    pub fn annotate(&self, frame: &mut RgbImage, overlay: &Overlay<'_>) {
        let (width, height) = frame.dimensions();
        if width == 0 || height == 0 {
            return;
        }

        // 计数线 (仅显示)
        let line_x = width as f32 * self.line_position;
        for dx in [0.0, 1.0] {
            let x = (line_x + dx).min((width - 1) as f32);
            draw_line_segment_mut(frame, (x, 0.0), (x, height as f32), LINE_COLOR);
        }

        for (det, id) in overlay.detections.iter().zip(overlay.assignments) {
            let bbox = det.bbox.clamp_to(width, height);
            let x1 = bbox.x1 as i32;
            let y1 = bbox.y1 as i32;
            let w = (bbox.width() as u32).max(1);
            let h = (bbox.height() as u32).max(1);

            draw_hollow_rect_mut(frame, Rect::at(x1, y1).of_size(w, h), BOX_COLOR);
            if w > 2 && h > 2 {
                draw_hollow_rect_mut(frame, Rect::at(x1 + 1, y1 + 1).of_size(w - 2, h - 2), BOX_COLOR);
            }

            let cx = det.centroid.x.clamp(0.0, (width - 1) as f32) as i32;
            let cy = det.centroid.y.clamp(0.0, (height - 1) as f32) as i32;
            draw_filled_circle_mut(frame, (cx, cy), CENTROID_RADIUS, CENTROID_COLOR);

            if let Some(id) = id {
                let label = format!("ID {} {:.2}", id, det.confidence);
                self.text(frame, &label, x1, (y1 - 8).max(20) - 18, self.label_scale, BOX_COLOR);
            }
        }

        for coast in overlay.coasting {
            let center = (coast.centroid.x as i32, coast.centroid.y as i32);
            draw_hollow_circle_mut(frame, center, COASTING_RADIUS, COASTING_COLOR);
            let label = format!("ID {} +{}", coast.id, coast.frames_unseen);
            self.text(
                frame,
                &label,
                center.0 + COASTING_RADIUS + 2,
                center.1 - COASTING_RADIUS,
                self.label_scale,
                COASTING_COLOR,
            );
        }

        let count = format!("In Lobby: {}", overlay.lobby_count);
        self.text(frame, &count, 10, 40 - 28, self.count_scale, COUNT_COLOR);
    }

    fn text(&self, frame: &mut RgbImage, text: &str, x: i32, y: i32, scale: PxScale, color: Rgb<u8>) {
        if let Some(font) = &self.font {
            draw_text_mut(frame, color, x, y, scale, font, text);
        }
    }
}
