use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::{DecodeSession, DecoderBackend, RawFrame, StreamInfo};
use crate::error::{Result, StreamError};
use crate::types::VideoKey;

/// 合成源的参数
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticSource {
    pub width: u32,
    pub height: u32,
    pub frame_count: u64,
    /// 关键帧间隔（GOP长度），0 表示只有第 0 帧是关键帧
    pub gop: u64,
    /// 模拟打开文件/网络流的耗时
    pub open_delay: Duration,
    /// 打开时返回 `SourceUnavailable`
    pub unavailable: bool,
    /// 前 N 次打开返回 `SourceUnavailable`，之后正常
    pub flaky_opens: u64,
    /// 解码到该帧时返回 `DecodeError`
    pub fail_decode_at: Option<u64>,
}

impl Default for SyntheticSource {
    fn default() -> Self {
        Self {
            width: 64,
            height: 48,
            frame_count: 120,
            gop: 12,
            open_delay: Duration::ZERO,
            unavailable: false,
            flaky_opens: 0,
            fail_decode_at: None,
        }
    }
}

/// 合成帧的亮度值：随帧索引和坐标变化，读结果可以反推出帧索引
pub fn synthetic_luma(index: u64, x: u32, y: u32) -> u8 {
    (16 + (index + x as u64 + 2 * y as u64) % 220) as u8
}

/// 合成帧在色度块 `(cx, cy)` 处的 `(U, V)`
pub fn synthetic_chroma(index: u64, cx: u32, cy: u32) -> (u8, u8) {
    let u = 64 + (index * 3 + cx as u64) % 128;
    let v = 64 + (index * 5 + cy as u64) % 128;
    (u as u8, v as u8)
}

#[derive(Debug, Default)]
struct Counters {
    opened: AtomicU64,
    closed: AtomicU64,
    decoded: AtomicU64,
    seeks: AtomicU64,
    attempts: Mutex<HashMap<VideoKey, u64>>,
}

/// 内存中的确定性后端
///
/// 未单独配置的源都使用默认 [`SyntheticSource`]；计数器在克隆间共享。
#[derive(Debug, Clone, Default)]
pub struct SyntheticBackend {
    default_source: SyntheticSource,
    sources: HashMap<VideoKey, SyntheticSource>,
    counters: Arc<Counters>,
}

impl SyntheticBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default(mut self, source: SyntheticSource) -> Self {
        self.default_source = source;
        self
    }

    pub fn with_source(mut self, key: impl Into<VideoKey>, source: SyntheticSource) -> Self {
        self.sources.insert(key.into(), source);
        self
    }

    pub fn opened(&self) -> u64 {
        self.counters.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> u64 {
        self.counters.closed.load(Ordering::SeqCst)
    }

    pub fn decoded_frames(&self) -> u64 {
        self.counters.decoded.load(Ordering::SeqCst)
    }

    pub fn seeks(&self) -> u64 {
        self.counters.seeks.load(Ordering::SeqCst)
    }

    fn source_for(&self, key: &VideoKey) -> &SyntheticSource {
        self.sources.get(key).unwrap_or(&self.default_source)
    }
}

impl DecoderBackend for SyntheticBackend {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn open(&self, key: &VideoKey, _device_id: u32) -> Result<Box<dyn DecodeSession>> {
        let source = self.source_for(key).clone();
        if !source.open_delay.is_zero() {
            std::thread::sleep(source.open_delay);
        }
        let attempt = {
            let mut attempts = self.counters.attempts.lock();
            let n = attempts.entry(key.clone()).or_insert(0);
            *n += 1;
            *n
        };
        if attempt <= source.flaky_opens {
            return Err(StreamError::SourceUnavailable {
                key: key.clone(),
                reason: format!("synthetic source not ready (attempt {attempt})"),
            });
        }
        if source.unavailable {
            return Err(StreamError::SourceUnavailable {
                key: key.clone(),
                reason: "synthetic source marked unavailable".to_string(),
            });
        }
        if source.width == 0 || source.height == 0 || source.frame_count == 0 {
            return Err(StreamError::SourceUnavailable {
                key: key.clone(),
                reason: "synthetic source has no frames".to_string(),
            });
        }

        let keyframes = if source.gop == 0 {
            vec![0]
        } else {
            (0..source.frame_count).step_by(source.gop as usize).collect()
        };
        let info = StreamInfo {
            width: source.width,
            height: source.height,
            frame_count: source.frame_count,
            keyframes,
            fps: 25.0,
        };

        self.counters.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SyntheticSession {
            key: key.clone(),
            info,
            fail_decode_at: source.fail_decode_at,
            next: 0,
            counters: Arc::clone(&self.counters),
        }))
    }
}

struct SyntheticSession {
    key: VideoKey,
    info: StreamInfo,
    fail_decode_at: Option<u64>,
    next: u64,
    counters: Arc<Counters>,
}

impl SyntheticSession {
    fn render(&self, index: u64) -> RawFrame {
        let width = self.info.width;
        let height = self.info.height;
        let y = (0..height)
            .flat_map(|row| (0..width).map(move |col| synthetic_luma(index, col, row)))
            .collect();
        let uv = (0..height.div_ceil(2))
            .flat_map(|cy| {
                (0..width.div_ceil(2)).flat_map(move |cx| {
                    let (u, v) = synthetic_chroma(index, cx, cy);
                    [u, v]
                })
            })
            .collect();
        RawFrame {
            index,
            width,
            height,
            y,
            uv,
        }
    }
}

impl DecodeSession for SyntheticSession {
    fn info(&self) -> &StreamInfo {
        &self.info
    }

    fn next_index(&self) -> u64 {
        self.next
    }

    fn seek_keyframe(&mut self, index: u64) -> Result<u64> {
        self.counters.seeks.fetch_add(1, Ordering::SeqCst);
        let keyframe = self.info.keyframe_at_or_before(index);
        self.next = keyframe;
        Ok(keyframe)
    }

    fn decode_next(&mut self) -> Result<RawFrame> {
        let index = self.next;
        if index >= self.info.frame_count {
            return Err(StreamError::DecodeError {
                key: self.key.clone(),
                index,
                reason: "end of stream".to_string(),
            });
        }
        if self.fail_decode_at == Some(index) {
            return Err(StreamError::DecodeError {
                key: self.key.clone(),
                index,
                reason: "injected decode failure".to_string(),
            });
        }
        self.counters.decoded.fetch_add(1, Ordering::SeqCst);
        self.next += 1;
        Ok(self.render(index))
    }
}

impl Drop for SyntheticSession {
    fn drop(&mut self) {
        self.counters.closed.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_decodes_forward_from_keyframe() {
        let backend = SyntheticBackend::new();
        let mut session = backend.open(&VideoKey::new("a.mp4"), 0).unwrap();
        assert_eq!(session.seek_keyframe(15).unwrap(), 12);
        let frame = session.decode_next().unwrap();
        assert_eq!(frame.index, 12);
        assert_eq!(frame.y[0], synthetic_luma(12, 0, 0));
        assert_eq!(session.next_index(), 13);
    }

    #[test]
    fn counters_track_open_and_close() {
        let backend = SyntheticBackend::new();
        let session = backend.open(&VideoKey::new("a.mp4"), 0).unwrap();
        assert_eq!(backend.opened(), 1);
        drop(session);
        assert_eq!(backend.closed(), 1);
    }

    #[test]
    fn unavailable_source_fails_to_open() {
        let backend = SyntheticBackend::new().with_source(
            "missing.mp4",
            SyntheticSource {
                unavailable: true,
                ..Default::default()
            },
        );
        let err = backend.open(&VideoKey::new("missing.mp4"), 0).err().unwrap();
        assert!(matches!(err, StreamError::SourceUnavailable { .. }));
        assert_eq!(backend.opened(), 0);
    }

    #[test]
    fn flaky_source_recovers() {
        let backend = SyntheticBackend::new().with_default(SyntheticSource {
            flaky_opens: 2,
            ..Default::default()
        });
        let key = VideoKey::new("live.mp4");
        assert!(backend.open(&key, 0).is_err());
        assert!(backend.open(&key, 0).is_err());
        assert!(backend.open(&key, 0).is_ok());
        assert_eq!(backend.opened(), 1);
    }

    #[test]
    fn odd_dimensions_round_chroma_up() {
        let backend = SyntheticBackend::new().with_default(SyntheticSource {
            width: 5,
            height: 3,
            ..Default::default()
        });
        let mut session = backend.open(&VideoKey::new("odd.mp4"), 0).unwrap();
        let frame = session.decode_next().unwrap();
        assert_eq!(frame.y.len(), 15);
        assert_eq!(frame.uv.len(), 3 * 2 * 2);
    }
}
