pub mod budget;
pub mod converter;
pub mod decoders;
pub mod dump;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod pool;
pub mod types;

pub use budget::{DeviceMemoryBudget, Reservation};
pub use converter::{Converter, ConverterOptions, ConverterState, INITIAL_RETRY_DELAY};
pub use decoders::{BackendKind, DecoderBackend, DecoderFactory, StreamInfo, SyntheticBackend, SyntheticSource};
pub use error::{RequestError, Result, StreamError};
pub use pool::{ContextLease, DecodeContext, PoolConfig, PoolStats, StreamPool};
pub use types::{
    CropRect, Frame, LogDestination, LogLevel, PixelFormat, Planes, ReadParams, ReadResult,
    ResizeType, TensorData, VideoKey,
};
