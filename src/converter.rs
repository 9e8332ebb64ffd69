use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::budget::DeviceMemoryBudget;
use crate::decoders::{DecoderBackend, StreamInfo};
use crate::dump;
use crate::error::{Result, StreamError};
use crate::logging::{EventLog, CONVERTER_TARGET};
use crate::pipeline::{self, ConversionPlan};
use crate::pool::{ContextLease, DecodeContext, SeekCursor, StreamPool, WeakStreamPool};
use crate::types::{Frame, LogLevel, ReadParams, ReadResult, VideoKey};
use crate::{log_event, log_failure};

/// 初始化重试的首次等待时间，之后每次翻倍
pub const INITIAL_RETRY_DELAY: Duration = Duration::from_millis(10);
const MAX_RETRY_DELAY: Duration = Duration::from_millis(500);

fn retry_delay(attempt: u32) -> Duration {
    INITIAL_RETRY_DELAY
        .saturating_mul(1 << attempt.saturating_sub(1).min(16))
        .min(MAX_RETRY_DELAY)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConverterState {
    Uninitialized,
    Initialized,
    Streaming,
    Idle,
    Stopped,
}

impl ConverterState {
    fn is_active(&self) -> bool {
        matches!(
            self,
            ConverterState::Initialized | ConverterState::Streaming | ConverterState::Idle
        )
    }
}

/// 构造参数
#[derive(Debug, Clone, Default)]
pub struct ConverterOptions {
    pub device_id: u32,
    /// 直连上下文预留的帧缓冲数量，0 表示默认值；池化上下文用池的配置
    pub buffer_size: usize,
    /// 转换线程数，0 表示使用全部CPU核心
    pub thread_pool_size: usize,
    pub log_level: Option<LogLevel>,
    /// 直连上下文使用的显存预算
    pub budget: DeviceMemoryBudget,
}

enum Binding {
    Pooled(ContextLease),
    Direct(Arc<DecodeContext>),
}

impl Binding {
    fn context(&self) -> &Arc<DecodeContext> {
        match self {
            Binding::Pooled(lease) => lease.context(),
            Binding::Direct(context) => context,
        }
    }

    fn is_pooled(&self) -> bool {
        matches!(self, Binding::Pooled(_))
    }
}

pub struct Converter {
    options: ConverterOptions,
    backend: Arc<dyn DecoderBackend>,
    state: ConverterState,
    current_source: VideoKey,
    pool: Option<WeakStreamPool>,
    binding: Option<Binding>,
    batch_optimization: bool,
    cursor: SeekCursor,
    workers: Option<rayon::ThreadPool>,
    log: EventLog,
}

impl Converter {
    pub fn new(
        source: impl Into<VideoKey>,
        options: ConverterOptions,
        backend: Arc<dyn DecoderBackend>,
    ) -> Self {
        let log = EventLog::new(options.log_level);
        Self {
            options,
            backend,
            state: ConverterState::Uninitialized,
            current_source: source.into(),
            pool: None,
            binding: None,
            batch_optimization: false,
            cursor: SeekCursor::default(),
            workers: None,
            log,
        }
    }

    pub fn state(&self) -> ConverterState {
        self.state
    }

    pub fn current_source(&self) -> &VideoKey {
        &self.current_source
    }

    pub fn device_id(&self) -> u32 {
        self.options.device_id
    }

    pub fn batch_optimization_enabled(&self) -> bool {
        self.batch_optimization
    }

    pub fn is_pooled(&self) -> bool {
        self.binding.as_ref().is_some_and(Binding::is_pooled)
    }

    /// 当前源的流信息；未初始化或已停止时为 `None`
    pub fn stream_info(&self) -> Option<&StreamInfo> {
        self.binding.as_ref().map(|b| b.context().info())
    }

    /// 设置日志级别。需要在 `initialize` 之前调用才能记录初始化过程。
    pub fn enable_logs(&mut self, level: LogLevel) {
        self.options.log_level = Some(level);
        self.log = EventLog::new(Some(level));
    }

    /// 绑定流池，只能在 `initialize` 之前调用，重复调用以最后一次为准
    pub fn add_stream_pool(&mut self, pool: &StreamPool) -> Result<()> {
        if self.state != ConverterState::Uninitialized {
            return Err(StreamError::InvalidBindingOrder {
                key: self.current_source.clone(),
            });
        }
        self.pool = Some(pool.downgrade());
        log_event!(self.log, Medium, target: CONVERTER_TARGET, key = %self.current_source, device_id = self.options.device_id, "stream pool bound");
        Ok(())
    }

    /// 获取当前源的解码上下文并启动转换线程
    ///
    /// `repeat_number` 为获取上下文的尝试次数，只有 `SourceUnavailable`、`Timeout` 会重试，
    /// 两次尝试之间按指数退避等待。
    pub fn initialize(&mut self, repeat_number: u32) -> Result<()> {
        if self.state != ConverterState::Uninitialized {
            return Err(StreamError::AlreadyInitialized {
                key: self.current_source.clone(),
            });
        }

        let attempts = repeat_number.max(1);
        let key = self.current_source.clone();
        let mut attempt = 1;
        let binding = loop {
            match self.bind(&key) {
                Ok(binding) => break binding,
                Err(err) if err.is_transient() && attempt < attempts => {
                    let delay = retry_delay(attempt);
                    log_failure!(self.log, target: CONVERTER_TARGET, key = %key, attempt, delay = ?delay, error = %err, "initialize attempt failed, retrying");
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(err) => {
                    log_failure!(self.log, target: CONVERTER_TARGET, key = %key, attempt, error = %err, "initialize failed");
                    return Err(err);
                }
            }
        };

        let threads = match self.options.thread_pool_size {
            0 => num_cpus::get(),
            n => n,
        };
        let workers = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("tensor-stream-convert-{i}"))
            .build()
            .map_err(|e| StreamError::WorkersUnavailable {
                key: key.clone(),
                reason: e.to_string(),
            })?;

        log_event!(
            self.log,
            Low,
            target: CONVERTER_TARGET,
            key = %key,
            device_id = self.options.device_id,
            pooled = binding.is_pooled(),
            threads,
            attempts = attempt,
            "converter initialized"
        );
        self.binding = Some(binding);
        self.workers = Some(workers);
        self.cursor.clear();
        self.state = ConverterState::Initialized;
        Ok(())
    }

    fn bind(&self, key: &VideoKey) -> Result<Binding> {
        match &self.pool {
            Some(pool) => {
                let pool = pool
                    .upgrade()
                    .ok_or_else(|| StreamError::PoolClosed { key: key.clone() })?;
                let lease = pool.acquire(key, self.options.device_id)?;
                Ok(Binding::Pooled(lease))
            }
            None => {
                let context = DecodeContext::open(
                    self.backend.as_ref(),
                    key,
                    self.options.device_id,
                    self.options.buffer_size,
                    &self.options.budget,
                )?;
                log_event!(
                    self.log,
                    Low,
                    target: CONVERTER_TARGET,
                    key = %key,
                    device_id = self.options.device_id,
                    bytes = context.reserved_bytes(),
                    "direct decode context created"
                );
                Ok(Binding::Direct(Arc::new(context)))
            }
        }
    }

    /// 读取时在同一个源上延续解码位置，避免每批都回到关键帧
    pub fn enable_batch_optimization(&mut self) {
        self.batch_optimization = true;
        log_event!(self.log, Medium, target: CONVERTER_TARGET, key = %self.current_source, "batch optimization enabled");
    }

    /// 切换到另一个源
    ///
    /// 绑定了池时新源必须已经缓存，否则直接打开。先拿到新上下文再释放旧的，失败时仍停留在原来的源上。
    pub fn reset(&mut self, source: impl Into<VideoKey>) -> Result<()> {
        let key = source.into();
        if !self.state.is_active() {
            return Err(StreamError::NotInitialized { key });
        }
        if key == self.current_source {
            return Ok(());
        }

        let binding = self.bind(&key).inspect_err(|err| {
            log_failure!(self.log, target: CONVERTER_TARGET, key = %key, error = %err, "reset failed");
        })?;
        log_event!(
            self.log,
            Medium,
            target: CONVERTER_TARGET,
            from = %self.current_source,
            to = %key,
            "converter reset"
        );
        self.binding = Some(binding);
        self.current_source = key;
        self.cursor.clear();
        Ok(())
    }

    /// 从当前源读取 `batch`（绝对帧索引）
    ///
    /// 解码前先校验整个请求；结果顺序与 `batch` 一致，任一帧失败则整批失败。
    pub fn read_absolute(&mut self, batch: &[u64], params: &ReadParams) -> Result<ReadResult> {
        let not_initialized = || StreamError::NotInitialized {
            key: self.current_source.clone(),
        };
        if !self.state.is_active() {
            return Err(not_initialized());
        }
        let context = Arc::clone(self.binding.as_ref().ok_or_else(not_initialized)?.context());
        let workers = self.workers.as_ref().ok_or_else(not_initialized)?;
        let key = context.key();

        pipeline::validate_batch(key, batch, context.info())?;
        let plan = ConversionPlan::resolve(key, params, context.info())?;

        self.state = ConverterState::Streaming;
        let cursor = if self.batch_optimization {
            Some(&mut self.cursor)
        } else {
            None
        };
        let result = context
            .decode_batch(batch, cursor, &self.log)
            .and_then(|raw| pipeline::convert_batch(key, &raw, &plan, workers));
        self.state = ConverterState::Idle;

        let frames = result?;
        log_event!(
            self.log,
            High,
            target: CONVERTER_TARGET,
            key = %key,
            frames = frames.len(),
            format = plan.format.as_str(),
            "batch read"
        );
        Ok(ReadResult { frames })
    }

    /// 把一帧写到磁盘，格式由扩展名决定（见 [`dump::dump_frame`]）
    pub fn dump(&self, frame: &Frame, path: impl AsRef<Path>) -> anyhow::Result<()> {
        dump::dump_frame(frame, path.as_ref())
    }

    /// 释放上下文并停止转换线程，重复调用无副作用
    pub fn stop(&mut self) {
        if self.state == ConverterState::Stopped {
            return;
        }
        let binding = self.binding.take();
        self.workers = None;
        self.cursor.clear();
        self.state = ConverterState::Stopped;
        drop(binding);
        log_event!(self.log, Low, target: CONVERTER_TARGET, key = %self.current_source, "converter stopped");
    }
}

impl Drop for Converter {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Converter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Converter")
            .field("state", &self.state)
            .field("source", &self.current_source)
            .field("device_id", &self.options.device_id)
            .field("pooled", &self.is_pooled())
            .field("batch_optimization", &self.batch_optimization)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoders::SyntheticBackend;

    fn direct(backend: &SyntheticBackend) -> Converter {
        Converter::new(
            "1.mp4",
            ConverterOptions {
                thread_pool_size: 1,
                ..Default::default()
            },
            Arc::new(backend.clone()),
        )
    }

    #[test]
    fn initialize_twice_fails() {
        let mut converter = direct(&SyntheticBackend::new());
        converter.initialize(1).unwrap();
        assert!(matches!(
            converter.initialize(1).unwrap_err(),
            StreamError::AlreadyInitialized { .. }
        ));
    }

    #[test]
    fn read_before_initialize_fails() {
        let mut converter = direct(&SyntheticBackend::new());
        let err = converter.read_absolute(&[0], &ReadParams::default()).unwrap_err();
        assert!(matches!(err, StreamError::NotInitialized { .. }));
        assert_eq!(converter.state(), ConverterState::Uninitialized);
    }

    #[test]
    fn read_moves_to_idle() {
        let mut converter = direct(&SyntheticBackend::new());
        converter.initialize(1).unwrap();
        assert_eq!(converter.state(), ConverterState::Initialized);
        converter.read_absolute(&[0, 1], &ReadParams::default()).unwrap();
        assert_eq!(converter.state(), ConverterState::Idle);
    }

    #[test]
    fn direct_reset_closes_previous_context() {
        let backend = SyntheticBackend::new();
        let mut converter = direct(&backend);
        converter.initialize(1).unwrap();
        converter.reset("2.mp4").unwrap();
        assert_eq!(backend.opened(), 2);
        assert_eq!(backend.closed(), 1);
        assert_eq!(converter.current_source().as_str(), "2.mp4");
    }

    #[test]
    fn stop_is_idempotent_and_terminal() {
        let backend = SyntheticBackend::new();
        let mut converter = direct(&backend);
        converter.initialize(1).unwrap();
        converter.stop();
        converter.stop();
        assert_eq!(backend.closed(), 1);
        assert_eq!(converter.state(), ConverterState::Stopped);
        assert!(matches!(
            converter.reset("2.mp4").unwrap_err(),
            StreamError::NotInitialized { .. }
        ));
    }

    #[test]
    fn retry_delay_doubles_up_to_a_cap() {
        assert_eq!(retry_delay(1), INITIAL_RETRY_DELAY);
        assert_eq!(retry_delay(2), INITIAL_RETRY_DELAY * 2);
        assert_eq!(retry_delay(3), INITIAL_RETRY_DELAY * 4);
        assert_eq!(retry_delay(19), MAX_RETRY_DELAY);
        assert_eq!(retry_delay(u32::MAX), MAX_RETRY_DELAY);
    }

    #[test]
    fn worker_start_failure_is_not_retried() {
        let err = StreamError::WorkersUnavailable {
            key: VideoKey::new("1.mp4"),
            reason: "no threads".to_string(),
        };
        assert!(!err.is_transient());
    }
}
