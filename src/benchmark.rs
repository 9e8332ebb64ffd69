use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use tabled::{Table, Tabled};
use tensor_stream::{
    Converter, ConverterOptions, DecoderBackend, DecoderFactory, DeviceMemoryBudget, PoolConfig,
    ReadResult, StreamPool,
};

use crate::app::display_duration;
use crate::cli::Cli;

#[derive(Tabled)]
struct BenchmarkRow {
    #[tabled(rename = "批量优化")]
    mode: &'static str,
    #[tabled(rename = "批次")]
    batches: usize,
    #[tabled(rename = "帧数")]
    frames: usize,
    #[tabled(rename = "耗时", display_with = "display_duration")]
    elapsed: Duration,
    #[tabled(rename = "帧/秒")]
    fps: String,
}

struct Run {
    row: BenchmarkRow,
    /// 第一轮的全部输出，用于比较两种模式
    first_pass: Vec<ReadResult>,
}

fn run_once(cli: &Cli, backend: &Arc<dyn DecoderBackend>, optimized: bool) -> Result<Run> {
    let pool = StreamPool::with_config(
        Arc::clone(backend),
        PoolConfig::default(),
        DeviceMemoryBudget::unlimited(),
    );
    for input in &cli.input {
        pool.cache_stream(input.as_str())?;
    }

    let options = ConverterOptions {
        thread_pool_size: cli.threads,
        ..ConverterOptions::default()
    };
    let mut reader = Converter::new(cli.input[0].as_str(), options, Arc::clone(backend));
    reader.add_stream_pool(&pool)?;
    reader.initialize(cli.repeat)?;
    if optimized {
        reader.enable_batch_optimization();
    }

    let params = cli.read_params();
    let mut first_pass = Vec::new();
    let mut batches = 0;
    let mut frames = 0;
    let start = Instant::now();
    for iteration in 0..cli.iterations.max(1) {
        for input in &cli.input {
            reader.reset(input.as_str())?;
            let result = reader.read_absolute(&cli.batch, &params)?;
            batches += 1;
            frames += result.len();
            if iteration == 0 {
                first_pass.push(result);
            }
        }
    }
    let elapsed = start.elapsed();
    reader.stop();
    pool.close()?;

    Ok(Run {
        row: BenchmarkRow {
            mode: if optimized { "开" } else { "关" },
            batches,
            frames,
            elapsed,
            fps: format!("{:.1}", frames as f64 / elapsed.as_secs_f64().max(f64::EPSILON)),
        },
        first_pass,
    })
}

pub async fn run_benchmark(cli: &Cli) -> Result<()> {
    if cli.input.is_empty() {
        bail!("至少需要一个输入");
    }
    let backend = DecoderFactory::create_backend(cli.backend.into());
    println!(
        "⏱️  对比批量读取优化：后端 {}，{} 个输入 × {} 轮，批次 {:?}",
        backend.name(),
        cli.input.len(),
        cli.iterations.max(1),
        cli.batch
    );

    let plain = run_once(cli, &backend, false)?;
    let optimized = run_once(cli, &backend, true)?;

    if plain.first_pass != optimized.first_pass {
        bail!("批量优化开启后输出不一致");
    }
    println!("✅ 两种模式输出一致");
    println!("{}", Table::new([plain.row, optimized.row]));
    Ok(())
}
