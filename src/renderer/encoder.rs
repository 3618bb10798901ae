//! JPEG 编码与 multipart 分片
//!
//! Each part is self-delimited:
//! `--frame\r\nContent-Type: image/jpeg\r\nContent-Length: N\r\n\r\n<jpeg>\r\n`

use bytes::{BufMut, Bytes, BytesMut};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;

use crate::error::{Error, Result};

/// multipart/x-mixed-replace 分隔符
pub const MULTIPART_BOUNDARY: &str = "frame";

pub struct FrameEncoder {
    quality: u8,
}

impl Default for FrameEncoder {
    fn default() -> Self {
        Self::new(80)
    }
}

impl FrameEncoder {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    pub fn content_type() -> String {
        format!("multipart/x-mixed-replace; boundary={}", MULTIPART_BOUNDARY)
    }

    pub fn encode_jpeg(&self, frame: &RgbImage) -> Result<Vec<u8>> {
        let mut jpeg = Vec::with_capacity(frame.as_raw().len() / 8);
        JpegEncoder::new_with_quality(&mut jpeg, self.quality)
            .encode_image(frame)
            .map_err(|e| Error::Encoding(e.to_string()))?;
        Ok(jpeg)
    }

    /// 编码一帧并封装为 multipart 分片
    pub fn encode_part(&self, frame: &RgbImage) -> Result<Bytes> {
        let jpeg = self.encode_jpeg(frame)?;
        Ok(multipart_part(&jpeg))
    }
}

pub fn multipart_part(jpeg: &[u8]) -> Bytes {
    let header = format!(
        "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        MULTIPART_BOUNDARY,
        jpeg.len()
    );
    let mut part = BytesMut::with_capacity(header.len() + jpeg.len() + 2);
    part.put_slice(header.as_bytes());
    part.put_slice(jpeg);
    part.put_slice(b"\r\n");
    part.freeze()
}
