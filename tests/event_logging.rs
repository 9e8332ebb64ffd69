mod common;

use std::io;
use std::sync::{Arc, Mutex};

use common::{direct_converter, pooled_converter, shared, y800};
use tensor_stream::{
    DeviceMemoryBudget, LogLevel, PoolConfig, StreamPool, SyntheticBackend, SyntheticSource,
};

#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl Captured {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn capture<R>(f: impl FnOnce() -> R) -> (R, String) {
    let sink = Captured::default();
    let writer = sink.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    let result = tracing::subscriber::with_default(subscriber, f);
    (result, sink.text())
}

fn pool_with(backend: &SyntheticBackend, level: Option<LogLevel>) -> StreamPool {
    StreamPool::with_config(
        shared(backend),
        PoolConfig {
            log_level: level,
            ..PoolConfig::default()
        },
        DeviceMemoryBudget::unlimited(),
    )
}

#[test]
fn low_level_logs_lifecycle_only() {
    let backend = SyntheticBackend::new();
    let (_, logs) = capture(|| {
        let pool = pool_with(&backend, Some(LogLevel::Low));
        pool.cache_stream("1.mp4").unwrap();
        pool.cache_stream("1.mp4").unwrap();
    });
    assert!(logs.contains("decode context created"), "{logs}");
    assert!(logs.contains("tensor_stream::pool"), "{logs}");
    assert!(!logs.contains("stream cache hit"), "{logs}");
}

#[test]
fn medium_level_adds_cache_hits() {
    let backend = SyntheticBackend::new();
    let (_, logs) = capture(|| {
        let pool = pool_with(&backend, Some(LogLevel::Medium));
        pool.cache_stream("1.mp4").unwrap();
        pool.cache_stream("1.mp4").unwrap();
    });
    assert!(logs.contains("stream cache miss"), "{logs}");
    assert!(logs.contains("stream cache hit"), "{logs}");
}

#[test]
fn silent_instances_emit_nothing() {
    let backend = SyntheticBackend::new().with_source(
        "bad.mp4",
        SyntheticSource {
            unavailable: true,
            ..Default::default()
        },
    );
    let (_, logs) = capture(|| {
        let pool = pool_with(&backend, None);
        pool.cache_stream("1.mp4").unwrap();
        assert!(pool.cache_stream("bad.mp4").is_err());
    });
    assert!(logs.is_empty(), "{logs}");
}

#[test]
fn failures_are_logged_as_warnings() {
    let backend = SyntheticBackend::new().with_source(
        "bad.mp4",
        SyntheticSource {
            unavailable: true,
            ..Default::default()
        },
    );
    let (_, logs) = capture(|| {
        let pool = pool_with(&backend, Some(LogLevel::Low));
        assert!(pool.cache_stream("bad.mp4").is_err());
    });
    assert!(logs.contains("WARN"), "{logs}");
    assert!(logs.contains("bad.mp4"), "{logs}");
}

#[test]
fn converter_logs_set_before_initialize_capture_setup() {
    let backend = SyntheticBackend::new();
    let pool = pool_with(&backend, None);
    pool.cache_stream("1.mp4").unwrap();

    let (_, logs) = capture(|| {
        let mut converter = pooled_converter("1.mp4", 0, &backend, &pool);
        converter.enable_logs(LogLevel::High);
        converter.initialize(1).unwrap();
        converter.enable_batch_optimization();
        converter.read_absolute(&[0, 1], &y800()).unwrap();
        converter.stop();
    });
    assert!(logs.contains("converter initialized"), "{logs}");
    assert!(logs.contains("tensor_stream::decode"), "{logs}");
    assert!(logs.contains("continue decoding"), "{logs}");
    assert!(logs.contains("converter stopped"), "{logs}");
}

#[test]
fn direct_converter_logs_context_creation() {
    let backend = SyntheticBackend::new();
    let (_, logs) = capture(|| {
        let mut converter = direct_converter("1.mp4", &backend);
        converter.enable_logs(LogLevel::Low);
        converter.initialize(1).unwrap();
    });
    assert!(logs.contains("direct decode context created"), "{logs}");
}
