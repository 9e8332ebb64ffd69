use std::time::Duration;

use crate::types::{PixelFormat, VideoKey};

/// `read_absolute` 请求校验失败的具体原因
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    #[error("batch is empty")]
    EmptyBatch,

    #[error("crop ({x1},{y1})-({x2},{y2}) is not a valid rectangle")]
    MalformedCrop { x1: u32, y1: u32, x2: u32, y2: u32 },

    #[error("crop ({x1},{y1})-({x2},{y2}) exceeds the {width}x{height} source frame")]
    CropOutOfBounds {
        x1: u32,
        y1: u32,
        x2: u32,
        y2: u32,
        width: u32,
        height: u32,
    },

    #[error("{format:?} output requires {requirement}, got {width}x{height}")]
    UnsupportedDimensions {
        format: PixelFormat,
        requirement: &'static str,
        width: u32,
        height: u32,
    },
}

/// 流池、转换器和转换流程的错误
///
/// 可克隆：首次初始化失败时要交给所有等待同一个源的线程
#[derive(Debug, Clone, thiserror::Error)]
pub enum StreamError {
    #[error("source {key} unavailable: {reason}")]
    SourceUnavailable { key: VideoKey, reason: String },

    #[error("source {key} was never cached in this pool")]
    NotCached { key: VideoKey },

    #[error("source {key} is cached on device {cached}, cannot bind from device {requested}")]
    DeviceMismatch {
        key: VideoKey,
        cached: u32,
        requested: u32,
    },

    #[error(
        "device {device_id} cannot reserve {requested} bytes for {key}: {in_use} of {limit} bytes in use"
    )]
    ResourceExhausted {
        key: VideoKey,
        device_id: u32,
        requested: u64,
        in_use: u64,
        limit: u64,
    },

    #[error("converter for {key} is already initialized")]
    AlreadyInitialized { key: VideoKey },

    #[error("converter for {key} is not initialized (or already stopped)")]
    NotInitialized { key: VideoKey },

    #[error("stream pool must be bound before initialize (converter for {key})")]
    InvalidBindingOrder { key: VideoKey },

    #[error("invalid request for {key}: {reason}")]
    InvalidRequest { key: VideoKey, reason: RequestError },

    #[error("frame index {index} out of range for {key} ({frame_count} frames)")]
    FrameIndexOutOfRange {
        key: VideoKey,
        index: u64,
        frame_count: u64,
    },

    #[error("decode of frame {index} from {key} failed: {reason}")]
    DecodeError {
        key: VideoKey,
        index: u64,
        reason: String,
    },

    #[error("conversion of frame {index} from {key} failed: {reason}")]
    ConversionFailed {
        key: VideoKey,
        index: u64,
        reason: String,
    },

    #[error("conversion workers for {key} could not start: {reason}")]
    WorkersUnavailable { key: VideoKey, reason: String },

    #[error("timed out after {waited:?} waiting for {key} on device {device_id}")]
    Timeout {
        key: VideoKey,
        device_id: u32,
        waited: Duration,
    },

    #[error("source {key} still has {refs} active binding(s)")]
    StillReferenced { key: VideoKey, refs: usize },

    #[error("stream pool is closed (requested {key})")]
    PoolClosed { key: VideoKey },
}

impl StreamError {
    /// `initialize(repeat_number)` 中值得重试的错误
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StreamError::SourceUnavailable { .. } | StreamError::Timeout { .. }
        )
    }

    pub fn key(&self) -> &VideoKey {
        match self {
            StreamError::SourceUnavailable { key, .. }
            | StreamError::NotCached { key }
            | StreamError::DeviceMismatch { key, .. }
            | StreamError::ResourceExhausted { key, .. }
            | StreamError::AlreadyInitialized { key }
            | StreamError::NotInitialized { key }
            | StreamError::InvalidBindingOrder { key }
            | StreamError::InvalidRequest { key, .. }
            | StreamError::FrameIndexOutOfRange { key, .. }
            | StreamError::DecodeError { key, .. }
            | StreamError::ConversionFailed { key, .. }
            | StreamError::WorkersUnavailable { key, .. }
            | StreamError::Timeout { key, .. }
            | StreamError::StillReferenced { key, .. }
            | StreamError::PoolClosed { key } => key,
        }
    }
}

pub type Result<T> = std::result::Result<T, StreamError>;
