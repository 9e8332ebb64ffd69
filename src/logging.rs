use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

use crate::types::{LogDestination, LogLevel};

pub const POOL_TARGET: &str = "tensor_stream::pool";
pub const CONVERTER_TARGET: &str = "tensor_stream::converter";
pub const DECODE_TARGET: &str = "tensor_stream::decode";

/// 默认日志文件名（`LogDestination::File`）
pub const LOG_FILE: &str = "tensor_stream.log";

/// 每个实例自己的日志级别，`None` 表示不输出
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventLog {
    level: Option<LogLevel>,
}

impl EventLog {
    pub fn new(level: Option<LogLevel>) -> Self {
        Self { level }
    }

    pub fn level(&self) -> Option<LogLevel> {
        self.level
    }

    pub fn enabled(&self, at: LogLevel) -> bool {
        self.level.is_some_and(|level| level >= at)
    }
}

/// 按实例日志级别发出 `tracing` 事件
///
/// 用法：`log_event!(self.log, Medium, target: POOL_TARGET, key = %key, "cache hit")`
#[macro_export]
macro_rules! log_event {
    ($log:expr, $level:ident, $($arg:tt)+) => {
        if $log.enabled($crate::types::LogLevel::$level) {
            ::tracing::info!($($arg)+);
        }
    };
}

/// 同 `log_event!`，但以 warn 级别发出（用于失败事件）
#[macro_export]
macro_rules! log_failure {
    ($log:expr, $($arg:tt)+) => {
        if $log.enabled($crate::types::LogLevel::Low) {
            ::tracing::warn!($($arg)+);
        }
    };
}

/// 安装全局日志订阅者，需在创建池和转换器之前调用；`RUST_LOG` 可覆盖默认的 `info`
pub fn init(destination: LogDestination) -> anyhow::Result<()> {
    init_with_file(destination, Path::new(LOG_FILE))
}

pub fn init_with_file(destination: LogDestination, file: &Path) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);

    match destination {
        LogDestination::Console => builder
            .with_writer(std::io::stderr)
            .try_init()
            .map_err(|e| anyhow::anyhow!("failed to install log subscriber: {e}")),
        LogDestination::File => {
            let file = OpenOptions::new().create(true).append(true).open(file)?;
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
                .map_err(|e| anyhow::anyhow!("failed to install log subscriber: {e}"))
        }
    }
}
