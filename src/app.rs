use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use tabled::{Table, Tabled};
use tensor_stream::{
    dump, Converter, ConverterOptions, DecoderBackend, DecoderFactory, DeviceMemoryBudget, LogLevel,
    PoolConfig, ReadParams, StreamPool,
};

use crate::cli::Cli;

pub fn list_available_backends() {
    println!("\n📋 可用的解码后端:");

    for kind in DecoderFactory::available_backends() {
        println!("  ✅ {}: {}", kind.as_str(), kind.description());
    }

    println!("\n💡 使用方法:");
    println!("  cargo run -- --readers 6 --devices 2            # 多读取器共享流池");
    println!("  cargo run -- --fourcc y800 --batch 37,2,15      # 指定格式和帧");
    println!("  cargo run -- --benchmark                        # 对比批量读取优化");
    println!("  cargo run --features mp4-mode -- --backend mp4 -i a.mp4");
}

/// 每个读取器的运行结果
#[derive(Tabled)]
pub struct ReaderReport {
    #[tabled(rename = "读取器")]
    pub reader: usize,
    #[tabled(rename = "设备")]
    pub device: u32,
    #[tabled(rename = "批次")]
    pub batches: usize,
    #[tabled(rename = "帧数")]
    pub frames: usize,
    #[tabled(rename = "耗时", display_with = "display_duration")]
    pub elapsed: Duration,
}

pub fn display_duration(d: &Duration) -> String {
    format!("{:.2}ms", d.as_secs_f64() * 1000.0)
}

/// 设备 → 流池，每个池预先缓存全部输入
pub fn build_pools(
    cli: &Cli,
    backend: &Arc<dyn DecoderBackend>,
    log_level: LogLevel,
) -> Result<Vec<StreamPool>> {
    if cli.devices == 0 {
        bail!("设备数量必须大于 0");
    }
    let mut pools = Vec::with_capacity(cli.devices as usize);
    for device_id in 0..cli.devices {
        let config = PoolConfig {
            device_id,
            log_level: Some(log_level),
            ..PoolConfig::default()
        };
        let pool = StreamPool::with_config(Arc::clone(backend), config, DeviceMemoryBudget::unlimited());
        for input in &cli.input {
            pool.cache_stream(input.as_str())
                .with_context(|| format!("设备 {device_id} 缓存 {input} 失败"))?;
        }
        pools.push(pool);
    }
    Ok(pools)
}

struct ReaderJob {
    reader: usize,
    pool: StreamPool,
    backend: Arc<dyn DecoderBackend>,
    inputs: Vec<String>,
    batch: Vec<u64>,
    params: ReadParams,
    options: ConverterOptions,
    repeat: u32,
    iterations: usize,
    batch_optimization: bool,
    dump_to: Option<PathBuf>,
}

fn run_reader(job: ReaderJob) -> Result<ReaderReport> {
    let device = job.options.device_id;
    let log_level = job.options.log_level;
    let mut reader = Converter::new(job.inputs[0].as_str(), job.options, job.backend);
    reader.add_stream_pool(&job.pool)?;
    // 初始化阶段的日志需要在 initialize 之前开启
    if let Some(level) = log_level {
        reader.enable_logs(level);
    }
    reader.initialize(job.repeat)?;
    if job.batch_optimization {
        reader.enable_batch_optimization();
    }

    let start = Instant::now();
    let mut batches = 0;
    let mut frames = 0;
    for _ in 0..job.iterations {
        for input in &job.inputs {
            reader.reset(input.as_str())?;
            let result = reader.read_absolute(&job.batch, &job.params)?;
            if batches == 0 {
                if let Some(path) = &job.dump_to {
                    dump_batch(&reader, &result, path, job.reader)?;
                }
            }
            batches += 1;
            frames += result.len();
        }
    }
    let elapsed = start.elapsed();
    reader.stop();

    Ok(ReaderReport {
        reader: job.reader,
        device,
        batches,
        frames,
        elapsed,
    })
}

fn dump_batch(
    reader: &Converter,
    result: &tensor_stream::ReadResult,
    path: &Path,
    reader_id: usize,
) -> Result<()> {
    let is_image = dump::is_image_path(path);
    for frame in result.iter() {
        let target = if is_image {
            let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("frame");
            let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("png");
            path.with_file_name(format!("{stem}_{reader_id}_{}.{ext}", frame.index))
        } else {
            path.to_path_buf()
        };
        reader.dump(frame, &target)?;
    }
    Ok(())
}

pub async fn run_demo(cli: &Cli) -> Result<()> {
    if cli.input.is_empty() {
        bail!("至少需要一个输入");
    }
    let backend = DecoderFactory::create_backend(cli.backend.into());
    let log_level: LogLevel = cli.verbose.into();
    let pools = build_pools(cli, &backend, log_level)?;

    println!(
        "🚀 {} 个读取器，{} 个设备，后端 {}，每批 {} 帧",
        cli.readers,
        cli.devices,
        backend.name(),
        cli.batch.len()
    );

    let mut tasks = Vec::with_capacity(cli.readers);
    for reader in 0..cli.readers {
        let device_id = reader as u32 % cli.devices;
        let job = ReaderJob {
            reader,
            pool: pools[device_id as usize].clone(),
            backend: Arc::clone(&backend),
            inputs: cli.input.clone(),
            batch: cli.batch.clone(),
            params: cli.read_params(),
            options: ConverterOptions {
                device_id,
                thread_pool_size: cli.threads,
                log_level: Some(log_level),
                ..ConverterOptions::default()
            },
            repeat: cli.repeat,
            iterations: cli.iterations,
            batch_optimization: !cli.no_batch_optimization,
            dump_to: if reader == 0 {
                cli.output.as_ref().map(PathBuf::from)
            } else {
                None
            },
        };
        tasks.push(tokio::task::spawn_blocking(move || run_reader(job)));
    }

    let reports = futures::future::try_join_all(tasks)
        .await
        .map_err(|e| anyhow::anyhow!("读取任务失败: {}", e))?
        .into_iter()
        .collect::<Result<Vec<_>>>()?;

    println!("{}", Table::new(&reports));
    for (device_id, pool) in pools.iter().enumerate() {
        let stats = pool.stats();
        println!(
            "设备 {}: {} 个上下文，打开 {} 次，命中 {} 次，预留 {} 字节",
            device_id, stats.entries, stats.sessions_opened, stats.cache_hits, stats.reserved_bytes
        );
    }
    for pool in &pools {
        pool.close()?;
    }
    Ok(())
}
