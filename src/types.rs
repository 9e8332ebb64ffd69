use std::fmt;
use std::sync::Arc;

/// 视频源的规范化标识（本地路径或URL）
///
/// 同一个视频无论写成 `./a//b.mp4` 还是 `a\b.mp4` 都映射到同一个key，
/// 这样流池里每个源最多只有一个解码会话。
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VideoKey(Arc<str>);

impl VideoKey {
    pub fn new(source: &str) -> Self {
        Self(normalize_source(source).into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn normalize_source(source: &str) -> String {
    let trimmed = source.trim().replace('\\', "/");
    let (scheme, rest) = match trimmed.find("://") {
        Some(pos) => trimmed.split_at(pos + 3),
        None => ("", trimmed.as_str()),
    };

    let mut out = String::with_capacity(trimmed.len());
    out.push_str(scheme);
    let mut previous_slash = false;
    for ch in rest.chars() {
        if ch == '/' {
            if previous_slash {
                continue;
            }
            previous_slash = true;
        } else {
            previous_slash = false;
        }
        out.push(ch);
    }

    if scheme.is_empty() {
        while let Some(stripped) = out.strip_prefix("./") {
            out = stripped.to_string();
        }
    }
    out
}

impl From<&str> for VideoKey {
    fn from(source: &str) -> Self {
        Self::new(source)
    }
}

impl From<String> for VideoKey {
    fn from(source: String) -> Self {
        Self::new(&source)
    }
}

impl From<&VideoKey> for VideoKey {
    fn from(key: &VideoKey) -> Self {
        key.clone()
    }
}

impl fmt::Display for VideoKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for VideoKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VideoKey({:?})", &*self.0)
    }
}

/// 输出像素格式（FourCC）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PixelFormat {
    #[default]
    Rgb24,
    Bgr24,
    Y800,
    Nv12,
    Uyvy,
    Yuv444,
    Hsv,
}

impl PixelFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            PixelFormat::Rgb24 => "RGB24",
            PixelFormat::Bgr24 => "BGR24",
            PixelFormat::Y800 => "Y800",
            PixelFormat::Nv12 => "NV12",
            PixelFormat::Uyvy => "UYVY",
            PixelFormat::Yuv444 => "YUV444",
            PixelFormat::Hsv => "HSV",
        }
    }

    /// 是否为每像素三个分量的格式（只有这些格式受 `Planes` 影响）
    pub fn is_three_channel(&self) -> bool {
        matches!(
            self,
            PixelFormat::Rgb24 | PixelFormat::Bgr24 | PixelFormat::Yuv444 | PixelFormat::Hsv
        )
    }

    /// 请求未指定时的默认归一化
    pub fn default_normalization(&self) -> bool {
        matches!(self, PixelFormat::Hsv)
    }
}

/// 三通道格式的平面排列方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Planes {
    /// 每个通道一个独立平面
    Planar,
    /// 每个像素的通道交错存放
    #[default]
    Merged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResizeType {
    #[default]
    Nearest,
    Bilinear,
    Bicubic,
    Area,
}

impl ResizeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResizeType::Nearest => "NEAREST",
            ResizeType::Bilinear => "BILINEAR",
            ResizeType::Bicubic => "BICUBIC",
            ResizeType::Area => "AREA",
        }
    }
}

/// 裁剪矩形：左上角 `(x1, y1)`（含）到右下角 `(x2, y2)`（不含），全零表示不裁剪
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CropRect {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl CropRect {
    pub const NONE: CropRect = CropRect {
        x1: 0,
        y1: 0,
        x2: 0,
        y2: 0,
    };

    pub fn new(x1: u32, y1: u32, x2: u32, y2: u32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn is_none(&self) -> bool {
        *self == Self::NONE
    }

    pub fn width(&self) -> u32 {
        self.x2.saturating_sub(self.x1)
    }

    pub fn height(&self) -> u32 {
        self.y2.saturating_sub(self.y1)
    }
}

impl From<(u32, u32, u32, u32)> for CropRect {
    fn from((x1, y1, x2, y2): (u32, u32, u32, u32)) -> Self {
        Self::new(x1, y1, x2, y2)
    }
}

/// `read_absolute` 的转换参数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReadParams {
    pub pixel_format: PixelFormat,
    /// 0 表示保持源宽度
    pub width: u32,
    /// 0 表示保持源高度
    pub height: u32,
    pub crop: CropRect,
    /// `None` 时由像素格式决定
    pub normalization: Option<bool>,
    pub planes: Planes,
    pub resize_type: ResizeType,
}

/// 单帧输出的样本数据
#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    U8(Vec<u8>),
    F32(Vec<f32>),
}

impl TensorData {
    pub fn len(&self) -> usize {
        match self {
            TensorData::U8(data) => data.len(),
            TensorData::F32(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_u8(&self) -> Option<&[u8]> {
        match self {
            TensorData::U8(data) => Some(data),
            TensorData::F32(_) => None,
        }
    }

    pub fn as_f32(&self) -> Option<&[f32]> {
        match self {
            TensorData::F32(data) => Some(data),
            TensorData::U8(_) => None,
        }
    }

    /// 原始字节视图（f32 按小端序展开），用于比较和导出
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            TensorData::U8(data) => data.clone(),
            TensorData::F32(data) => data.iter().flat_map(|v| v.to_le_bytes()).collect(),
        }
    }
}

/// 一帧输出张量
///
/// `shape()` 总是 `[height, width, channels]`；三通道格式在
/// `Planes::Planar` 下按 `[channels, height, width]` 的内存顺序存放。
/// NV12 输出为单通道、高度为 `1.5 × height` 的张量，UYVY 为双通道。
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub index: u64,
    pub height: usize,
    pub width: usize,
    pub channels: usize,
    pub format: PixelFormat,
    pub planes: Planes,
    pub data: TensorData,
}

impl Frame {
    pub fn shape(&self) -> [usize; 3] {
        [self.height, self.width, self.channels]
    }
}

/// 按请求顺序排列的一批帧
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReadResult {
    pub frames: Vec<Frame>,
}

impl ReadResult {
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn indices(&self) -> Vec<u64> {
        self.frames.iter().map(|f| f.index).collect()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Frame> {
        self.frames.iter()
    }
}

impl IntoIterator for ReadResult {
    type Item = Frame;
    type IntoIter = std::vec::IntoIter<Frame>;

    fn into_iter(self) -> Self::IntoIter {
        self.frames.into_iter()
    }
}

/// 日志详细程度
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LogDestination {
    #[default]
    Console,
    File,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn video_key_normalizes_local_paths() {
        assert_eq!(VideoKey::new("./data//1.mp4"), VideoKey::new("data/1.mp4"));
        assert_eq!(VideoKey::new(" D:\\Work\\1.mp4 "), VideoKey::new("D:/Work/1.mp4"));
    }

    #[test]
    fn video_key_keeps_url_scheme() {
        let key = VideoKey::new("rtmp://host:1935//vod/a.mp4");
        assert_eq!(key.as_str(), "rtmp://host:1935/vod/a.mp4");
    }

    #[test]
    fn crop_none_is_all_zero() {
        assert!(CropRect::default().is_none());
        assert!(!CropRect::new(0, 0, 4, 4).is_none());
    }

    #[test]
    fn f32_bytes_are_little_endian() {
        let data = TensorData::F32(vec![1.0]);
        assert_eq!(data.to_bytes(), 1.0f32.to_le_bytes().to_vec());
    }
}
