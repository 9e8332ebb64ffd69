use std::sync::Arc;

use crate::error::Result;
use crate::types::VideoKey;

/// 探测得到的流信息
#[derive(Debug, Clone, PartialEq)]
pub struct StreamInfo {
    pub width: u32,
    pub height: u32,
    pub frame_count: u64,
    /// 升序排列的关键帧索引，至少包含 0
    pub keyframes: Vec<u64>,
    pub fps: f64,
}

impl StreamInfo {
    /// 一帧 NV12 的字节数
    pub fn frame_bytes(&self) -> u64 {
        let luma = self.width as u64 * self.height as u64;
        luma + 2 * (self.width.div_ceil(2) as u64 * self.height.div_ceil(2) as u64)
    }

    /// 不晚于 `index` 的最近关键帧
    pub fn keyframe_at_or_before(&self, index: u64) -> u64 {
        match self.keyframes.binary_search(&index) {
            Ok(pos) => self.keyframes[pos],
            Err(0) => 0,
            Err(pos) => self.keyframes[pos - 1],
        }
    }
}

/// 一帧解码后的 NV12 数据（Y 平面 + 交错的 UV 平面，均无行填充）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub index: u64,
    pub width: u32,
    pub height: u32,
    pub y: Vec<u8>,
    pub uv: Vec<u8>,
}

impl RawFrame {
    pub fn chroma_width(&self) -> usize {
        self.width.div_ceil(2) as usize
    }

    pub fn chroma_height(&self) -> usize {
        self.height.div_ceil(2) as usize
    }

    /// 从 I420 三平面（带 stride）打包成 NV12
    pub fn from_i420(
        index: u64,
        width: u32,
        height: u32,
        planes: (&[u8], &[u8], &[u8]),
        strides: (usize, usize, usize),
    ) -> Self {
        let (y_plane, u_plane, v_plane) = planes;
        let (y_stride, u_stride, v_stride) = strides;
        let w = width as usize;
        let h = height as usize;
        let cw = width.div_ceil(2) as usize;
        let ch = height.div_ceil(2) as usize;

        let mut y = Vec::with_capacity(w * h);
        for row in 0..h {
            let start = row * y_stride;
            y.extend_from_slice(&y_plane[start..start + w]);
        }

        let mut uv = Vec::with_capacity(cw * ch * 2);
        for row in 0..ch {
            let u_row = &u_plane[row * u_stride..row * u_stride + cw];
            let v_row = &v_plane[row * v_stride..row * v_stride + cw];
            for (u, v) in u_row.iter().zip(v_row) {
                uv.push(*u);
                uv.push(*v);
            }
        }

        Self {
            index,
            width,
            height,
            y,
            uv,
        }
    }
}

/// 一个已打开源的解码会话，由解码上下文独占
pub trait DecodeSession: Send {
    fn info(&self) -> &StreamInfo;

    /// 下一次 `decode_next` 将返回的帧索引
    fn next_index(&self) -> u64;

    /// 定位到不晚于 `index` 的最近关键帧，返回该关键帧索引
    fn seek_keyframe(&mut self, index: u64) -> Result<u64>;

    fn decode_next(&mut self) -> Result<RawFrame>;
}

/// 解码后端，进程内所有池和转换器共用
pub trait DecoderBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// 在 `device_id` 上打开源并探测流信息
    fn open(&self, key: &VideoKey, device_id: u32) -> Result<Box<dyn DecodeSession>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Synthetic,
    #[cfg(feature = "mp4-mode")]
    Mp4,
    #[cfg(feature = "ffmpeg-mode")]
    Ffmpeg,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Synthetic => "synthetic",
            #[cfg(feature = "mp4-mode")]
            BackendKind::Mp4 => "mp4",
            #[cfg(feature = "ffmpeg-mode")]
            BackendKind::Ffmpeg => "ffmpeg",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            BackendKind::Synthetic => "按帧索引生成确定性测试图案",
            #[cfg(feature = "mp4-mode")]
            BackendKind::Mp4 => "使用mp4解封装 + OpenH264解码",
            #[cfg(feature = "ffmpeg-mode")]
            BackendKind::Ffmpeg => "使用FFmpeg解封装和解码",
        }
    }
}

pub struct DecoderFactory;

impl DecoderFactory {
    pub fn create_backend(kind: BackendKind) -> Arc<dyn DecoderBackend> {
        match kind {
            BackendKind::Synthetic => Arc::new(SyntheticBackend::new()),
            #[cfg(feature = "mp4-mode")]
            BackendKind::Mp4 => Arc::new(Mp4Backend),
            #[cfg(feature = "ffmpeg-mode")]
            BackendKind::Ffmpeg => Arc::new(FfmpegBackend),
        }
    }

    pub fn available_backends() -> Vec<BackendKind> {
        let mut kinds = vec![BackendKind::Synthetic];

        #[cfg(feature = "mp4-mode")]
        kinds.push(BackendKind::Mp4);

        #[cfg(feature = "ffmpeg-mode")]
        kinds.push(BackendKind::Ffmpeg);

        kinds
    }
}

pub mod synthetic_decoder;
#[cfg(feature = "mp4-mode")]
pub mod mp4_decoder;
#[cfg(feature = "ffmpeg-mode")]
pub mod ffmpeg_decoder;

pub use synthetic_decoder::{SyntheticBackend, SyntheticSource};
#[cfg(feature = "mp4-mode")]
pub use mp4_decoder::Mp4Backend;
#[cfg(feature = "ffmpeg-mode")]
pub use ffmpeg_decoder::FfmpegBackend;

#[cfg(test)]
mod tests {
    use super::*;

    fn info(keyframes: Vec<u64>) -> StreamInfo {
        StreamInfo {
            width: 4,
            height: 2,
            frame_count: 100,
            keyframes,
            fps: 25.0,
        }
    }

    #[test]
    fn keyframe_lookup() {
        let info = info(vec![0, 10, 20]);
        assert_eq!(info.keyframe_at_or_before(0), 0);
        assert_eq!(info.keyframe_at_or_before(9), 0);
        assert_eq!(info.keyframe_at_or_before(10), 10);
        assert_eq!(info.keyframe_at_or_before(99), 20);
    }

    #[test]
    fn nv12_frame_bytes() {
        assert_eq!(info(vec![0]).frame_bytes(), 4 * 2 + 2 * 2);
    }

    #[test]
    fn i420_is_interleaved_into_nv12() {
        let y = [1u8, 2, 3, 4, 0, 0, 5, 6, 7, 8, 0, 0];
        let u = [10u8, 11, 0];
        let v = [20u8, 21, 0];
        let frame = RawFrame::from_i420(3, 4, 2, (&y, &u, &v), (6, 3, 3));
        assert_eq!(frame.y, vec![1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(frame.uv, vec![10, 20, 11, 21]);
    }
}
