// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! YOLOv8 ONNX 人体检测器
//! YOLOv8 person detector on ONNX Runtime (feature `onnx`)
//!
//! 预处理: 等比缩放到 640x640 左上角, 其余填充 144/255
//! 后处理: [1, 4 + nc, anchors] → 类别过滤 → 置信度过滤 → NMS

use std::path::Path;

use image::{imageops, RgbImage};
use ndarray::{s, Array4, Axis};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;

use super::detector::{Detector, DetectorParams};
use super::types::{non_max_suppression, BBox, Detection};
use crate::error::{Error, Result};

/// YOLOv8推理输入尺寸
pub const INF_SIZE: u32 = 640;

const CXYWH_OFFSET: usize = 4;

pub struct YoloV8Detector {
    session: Session,
    input_name: String,
    name: String,
}

impl YoloV8Detector {
    pub fn new<P: AsRef<Path>>(model_path: P) -> Result<Self> {
        let model_path = model_path.as_ref();
        let session = Session::builder()
            .and_then(|b| b.with_optimization_level(GraphOptimizationLevel::Level3))
            .and_then(|b| b.commit_from_file(model_path))
            .map_err(|e| Error::Config(format!("load model {}: {}", model_path.display(), e)))?;

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .unwrap_or_else(|| "images".to_string());

        tracing::info!(model = %model_path.display(), input = %input_name, "YOLOv8 model loaded");

        Ok(Self {
            session,
            input_name,
            name: format!("yolov8:{}", model_path.display()),
        })
    }

    fn scale_wh(w0: f32, h0: f32, w1: f32, h1: f32) -> (f32, f32, f32) {
        let r = (w1 / w0).min(h1 / h0);
        (r, (w0 * r).round(), (h0 * r).round())
    }

    fn preprocess(frame: &RgbImage) -> (Array4<f32>, f32) {
        let (ratio, w_new, h_new) = Self::scale_wh(
            frame.width() as f32,
            frame.height() as f32,
            INF_SIZE as f32,
            INF_SIZE as f32,
        );
        let resized = imageops::resize(
            frame,
            (w_new as u32).max(1),
            (h_new as u32).max(1),
            imageops::FilterType::Triangle,
        );

        let size = INF_SIZE as usize;
        let mut xs = Array4::<f32>::from_elem((1, 3, size, size), 144.0 / 255.0);
        for (x, y, rgb) in resized.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            let [r, g, b] = rgb.0;
            xs[[0, 0, y, x]] = r as f32 / 255.0;
            xs[[0, 1, y, x]] = g as f32 / 255.0;
            xs[[0, 2, y, x]] = b as f32 / 255.0;
        }
        (xs, ratio)
    }
}

impl Detector for YoloV8Detector {
    fn detect(&mut self, frame: &RgbImage, params: &DetectorParams) -> Result<Vec<Detection>> {
        let (xs, ratio) = Self::preprocess(frame);

        let inputs = ort::inputs![self.input_name.as_str() => xs.view()]
            .map_err(|e| Error::Detection(e.to_string()))?;
        let outputs = self
            .session
            .run(inputs)
            .map_err(|e| Error::Detection(e.to_string()))?;
        let preds = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| Error::Detection(e.to_string()))?;

        if preds.ndim() != 3 || preds.shape()[1] <= CXYWH_OFFSET {
            return Err(Error::Detection(format!(
                "unexpected output shape {:?}",
                preds.shape()
            )));
        }

        let (width, height) = (frame.width(), frame.height());
        let anchors = preds.index_axis(Axis(0), 0);
        let mut boxes = Vec::new();
        for pred in anchors.axis_iter(Axis(1)) {
            let clss = pred.slice(s![CXYWH_OFFSET..]);
            let Some((class_id, &confidence)) = clss
                .iter()
                .enumerate()
                .reduce(|max, x| if x.1 > max.1 { x } else { max })
            else {
                continue;
            };

            if confidence < params.conf_threshold || !params.accepts_class(class_id as u32) {
                continue;
            }

            let cx = pred[0] / ratio;
            let cy = pred[1] / ratio;
            let w = pred[2] / ratio;
            let h = pred[3] / ratio;
            let bbox = BBox {
                x1: cx - w / 2.0,
                y1: cy - h / 2.0,
                x2: cx + w / 2.0,
                y2: cy + h / 2.0,
                confidence,
                class_id: class_id as u32,
            };
            boxes.push(bbox.clamp_to(width, height));
        }

        non_max_suppression(&mut boxes, params.iou_threshold);

        Ok(boxes.into_iter().map(Detection::from).collect())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
