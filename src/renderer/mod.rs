/// 画面渲染 (Frame rendering)
///
/// - FrameAnnotator: 在帧上绘制检测框, 身份标签, 计数线与人数
/// - FrameEncoder:   JPEG 编码并封装为 multipart 分片
pub mod annotator;
pub mod encoder;

pub use annotator::{Coasting, FrameAnnotator, Overlay};
pub use encoder::{multipart_part, FrameEncoder, MULTIPART_BOUNDARY};
