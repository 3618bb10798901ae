//! 回放检测器
//! Replays pre-computed detections from a JSON-lines file
//!
//! 每行一个 JSON 数组, 对应一帧被处理的画面:
//! `[{"x1":10,"y1":20,"x2":60,"y2":180,"confidence":0.91,"class_id":0}]`
//!
//! Lines are consumed one per `detect` call. Once the file is exhausted every
//! further frame has no detections.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::Path;

use image::RgbImage;

use super::detector::{Detector, DetectorParams};
use super::types::{non_max_suppression, BBox, Detection};
use crate::error::{Error, Result};

enum ReplayInput {
    File(Lines<BufReader<File>>),
    Memory(VecDeque<Vec<BBox>>),
}

pub struct ReplayDetector {
    input: ReplayInput,
    name: String,
    line: usize,
}

impl ReplayDetector {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        Ok(Self {
            input: ReplayInput::File(BufReader::new(file).lines()),
            name: format!("replay:{}", path.display()),
            line: 0,
        })
    }

    pub fn from_frames(frames: Vec<Vec<BBox>>) -> Self {
        Self {
            input: ReplayInput::Memory(frames.into()),
            name: "replay:memory".to_string(),
            line: 0,
        }
    }

    fn next_boxes(&mut self) -> Result<Vec<BBox>> {
        self.line += 1;
        match &mut self.input {
            ReplayInput::Memory(frames) => Ok(frames.pop_front().unwrap_or_default()),
            ReplayInput::File(lines) => match lines.next() {
                None => Ok(Vec::new()),
                Some(line) => {
                    let line = line.map_err(|e| Error::Detection(e.to_string()))?;
                    let line = line.trim();
                    if line.is_empty() {
                        return Ok(Vec::new());
                    }
                    serde_json::from_str(line).map_err(|e| {
                        Error::Detection(format!("{} line {}: {}", self.name, self.line, e))
                    })
                }
            },
        }
    }
}

impl Detector for ReplayDetector {
    fn detect(&mut self, frame: &RgbImage, params: &DetectorParams) -> Result<Vec<Detection>> {
        let mut boxes: Vec<BBox> = self
            .next_boxes()?
            .into_iter()
            .filter(|b| params.accepts_class(b.class_id))
            .filter(|b| b.confidence >= params.conf_threshold)
            .map(|b| b.clamp_to(frame.width(), frame.height()))
            .collect();

        non_max_suppression(&mut boxes, params.iou_threshold);

        Ok(boxes.into_iter().map(Detection::from).collect())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_replay_from_file_filters_class_and_confidence() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"[{{"x1":10,"y1":10,"x2":50,"y2":90,"confidence":0.9,"class_id":0}},{{"x1":100,"y1":10,"x2":140,"y2":90,"confidence":0.95,"class_id":2}},{{"x1":200,"y1":10,"x2":240,"y2":90,"confidence":0.2}}]"#
        )
        .unwrap();
        writeln!(file).unwrap();

        let mut detector = ReplayDetector::open(file.path()).unwrap();
        let frame = RgbImage::new(320, 240);
        let params = DetectorParams::default();

        let first = detector.detect(&frame, &params).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].centroid.x, 30.0);

        assert!(detector.detect(&frame, &params).unwrap().is_empty());
        // 文件结束后不再有检测
        assert!(detector.detect(&frame, &params).unwrap().is_empty());
    }

    #[test]
    fn test_replay_bad_line_is_detection_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "not json").unwrap();

        let mut detector = ReplayDetector::open(file.path()).unwrap();
        let err = detector
            .detect(&RgbImage::new(8, 8), &DetectorParams::default())
            .unwrap_err();
        assert!(matches!(err, Error::Detection(_)));
    }

    #[test]
    fn test_replay_from_memory_applies_nms() {
        let mut detector = ReplayDetector::from_frames(vec![vec![
            BBox::new(10.0, 10.0, 50.0, 90.0, 0.7),
            BBox::new(12.0, 10.0, 52.0, 90.0, 0.8),
        ]]);
        let dets = detector
            .detect(&RgbImage::new(320, 240), &DetectorParams::default())
            .unwrap();
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].confidence, 0.8);
    }
}
