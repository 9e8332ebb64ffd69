mod common;

use std::time::Instant;

use common::{direct_converter, options, pooled_converter, shared, y800};
use tensor_stream::{
    Converter, ConverterOptions, ConverterState, DeviceMemoryBudget, StreamError, StreamPool,
    SyntheticBackend, SyntheticSource, INITIAL_RETRY_DELAY,
};

fn assert_send<T: Send>() {}

#[test]
fn converter_can_move_to_another_thread() {
    assert_send::<Converter>();
    assert_send::<StreamPool>();
}

#[test]
fn stopped_converter_rejects_reads() {
    let backend = SyntheticBackend::new();
    let mut converter = direct_converter("1.mp4", &backend);
    converter.initialize(1).unwrap();
    converter.read_absolute(&[0], &y800()).unwrap();

    converter.stop();
    converter.stop();
    assert_eq!(converter.state(), ConverterState::Stopped);
    assert!(matches!(
        converter.read_absolute(&[0], &y800()).unwrap_err(),
        StreamError::NotInitialized { .. }
    ));
    assert!(converter.stream_info().is_none());
}

#[test]
fn stopped_converter_cannot_be_reinitialized() {
    let backend = SyntheticBackend::new();
    let mut converter = direct_converter("1.mp4", &backend);
    converter.initialize(1).unwrap();
    converter.stop();
    assert!(matches!(
        converter.initialize(1).unwrap_err(),
        StreamError::AlreadyInitialized { .. }
    ));
}

#[test]
fn pool_must_be_bound_before_initialize() {
    let backend = SyntheticBackend::new();
    let pool = StreamPool::new(shared(&backend));
    let mut converter = direct_converter("1.mp4", &backend);
    converter.initialize(1).unwrap();

    assert!(matches!(
        converter.add_stream_pool(&pool).unwrap_err(),
        StreamError::InvalidBindingOrder { .. }
    ));
    assert!(!converter.is_pooled());
}

#[test]
fn pooled_initialize_requires_cached_key() {
    let backend = SyntheticBackend::new();
    let pool = StreamPool::new(shared(&backend));
    let mut converter = pooled_converter("1.mp4", 0, &backend, &pool);
    assert!(matches!(
        converter.initialize(3).unwrap_err(),
        StreamError::NotCached { .. }
    ));
    assert_eq!(backend.opened(), 0);
}

#[test]
fn reset_moves_the_binding_between_pooled_keys() {
    let backend = SyntheticBackend::new();
    let pool = StreamPool::new(shared(&backend));
    pool.cache_stream("1.mp4").unwrap();
    pool.cache_stream("2.mp4").unwrap();

    let mut converter = pooled_converter("1.mp4", 0, &backend, &pool);
    converter.initialize(1).unwrap();
    converter.reset("2.mp4").unwrap();

    assert_eq!(pool.ref_count("1.mp4"), Some(0));
    assert_eq!(pool.ref_count("2.mp4"), Some(1));
    assert_eq!(converter.current_source().as_str(), "2.mp4");
    assert_eq!(backend.opened(), 2);
    assert_eq!(backend.closed(), 0);
}

#[test]
fn failed_reset_keeps_the_current_source() {
    let backend = SyntheticBackend::new();
    let pool = StreamPool::new(shared(&backend));
    pool.cache_stream("1.mp4").unwrap();

    let mut converter = pooled_converter("1.mp4", 0, &backend, &pool);
    converter.initialize(1).unwrap();
    assert!(matches!(
        converter.reset("missing.mp4").unwrap_err(),
        StreamError::NotCached { .. }
    ));

    assert_eq!(converter.current_source().as_str(), "1.mp4");
    assert_eq!(pool.ref_count("1.mp4"), Some(1));
    assert_eq!(converter.read_absolute(&[1], &y800()).unwrap().len(), 1);
}

#[test]
fn reset_before_initialize_fails() {
    let backend = SyntheticBackend::new();
    let mut converter = direct_converter("1.mp4", &backend);
    assert!(matches!(
        converter.reset("2.mp4").unwrap_err(),
        StreamError::NotInitialized { .. }
    ));
}

#[test]
fn transient_failures_are_retried() {
    let backend = SyntheticBackend::new().with_default(SyntheticSource {
        flaky_opens: 2,
        ..Default::default()
    });
    let mut converter = direct_converter("live.mp4", &backend);
    converter.initialize(3).unwrap();
    assert_eq!(backend.opened(), 1);
    assert_eq!(converter.state(), ConverterState::Initialized);
}

#[test]
fn retries_back_off_between_attempts() {
    let backend = SyntheticBackend::new().with_default(SyntheticSource {
        flaky_opens: 2,
        ..Default::default()
    });
    let mut converter = direct_converter("live.mp4", &backend);
    let started = Instant::now();
    converter.initialize(3).unwrap();
    // 两次重试：10ms + 20ms
    assert!(started.elapsed() >= INITIAL_RETRY_DELAY * 3);
}

#[test]
fn retries_stop_at_repeat_number() {
    let backend = SyntheticBackend::new().with_default(SyntheticSource {
        flaky_opens: 5,
        ..Default::default()
    });
    let mut converter = direct_converter("live.mp4", &backend);
    assert!(matches!(
        converter.initialize(2).unwrap_err(),
        StreamError::SourceUnavailable { .. }
    ));
    assert_eq!(converter.state(), ConverterState::Uninitialized);

    // 0 次与 1 次相同：只尝试一次
    let backend = SyntheticBackend::new().with_default(SyntheticSource {
        flaky_opens: 1,
        ..Default::default()
    });
    let mut converter = direct_converter("live.mp4", &backend);
    assert!(converter.initialize(0).is_err());
}

#[test]
fn direct_context_respects_the_budget() {
    let backend = SyntheticBackend::new();
    let budget = DeviceMemoryBudget::with_device_limits([(1, 4608 * 4)]);
    let make = |source: &str| {
        Converter::new(
            source,
            ConverterOptions {
                device_id: 1,
                buffer_size: 4,
                budget: budget.clone(),
                ..options(1)
            },
            shared(&backend),
        )
    };

    let mut first = make("1.mp4");
    first.initialize(1).unwrap();
    assert_eq!(budget.in_use(1), 4608 * 4);

    let mut second = make("2.mp4");
    assert!(matches!(
        second.initialize(1).unwrap_err(),
        StreamError::ResourceExhausted { device_id: 1, .. }
    ));

    first.stop();
    assert_eq!(budget.in_use(1), 0);
    second.initialize(1).unwrap();
}

#[test]
fn dropping_a_converter_releases_its_binding() {
    let backend = SyntheticBackend::new();
    let pool = StreamPool::new(shared(&backend));
    pool.cache_stream("1.mp4").unwrap();
    {
        let mut converter = pooled_converter("1.mp4", 0, &backend, &pool);
        converter.initialize(1).unwrap();
        assert_eq!(pool.ref_count("1.mp4"), Some(1));
    }
    assert_eq!(pool.ref_count("1.mp4"), Some(0));
}

#[test]
fn stream_info_describes_the_current_source() {
    let backend = SyntheticBackend::new().with_source(
        "small.mp4",
        SyntheticSource {
            width: 16,
            height: 8,
            frame_count: 30,
            gop: 10,
            ..Default::default()
        },
    );
    let mut converter = direct_converter("1.mp4", &backend);
    converter.initialize(1).unwrap();
    assert_eq!(converter.stream_info().unwrap().frame_count, 120);

    converter.reset("small.mp4").unwrap();
    let info = converter.stream_info().unwrap();
    assert_eq!((info.width, info.height), (16, 8));
    assert_eq!(info.keyframes, vec![0, 10, 20]);
}
