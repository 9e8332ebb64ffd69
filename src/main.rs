use anyhow::Result;
use clap::Parser;
#[cfg(feature = "ffmpeg-mode")]
use ffmpeg_next as ffmpeg;

mod app;
mod benchmark;
mod cli;

use app::{list_available_backends, run_demo};
use benchmark::run_benchmark;
use cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tensor_stream::logging::init(cli.verbose_destination.into())?;

    // 初始化 FFmpeg，日志级别跟随 --verbose
    #[cfg(feature = "ffmpeg-mode")]
    {
        ffmpeg::init()?;
        if cli.verbose >= cli::LogLevelArg::Medium {
            ffmpeg::util::log::set_level(ffmpeg::util::log::Level::Info);
        } else {
            ffmpeg::util::log::set_level(ffmpeg::util::log::Level::Error);
        }
    }

    if cli.list_backends {
        list_available_backends();
        return Ok(());
    }

    if cli.benchmark {
        run_benchmark(&cli).await?;
    } else {
        run_demo(&cli).await?;
    }

    Ok(())
}
