use clap::{Parser, ValueEnum};
use tensor_stream::{
    BackendKind, CropRect, LogDestination, LogLevel, PixelFormat, Planes, ReadParams, ResizeType,
};

#[derive(Parser)]
#[command(name = "tensor-stream")]
#[command(about = "tensor-stream - 多读取器共享解码缓存的批量取帧工具")]
#[command(version = "0.1.0")]
pub struct Cli {
    /// 输入视频（可重复），每个都会预先缓存到各设备的流池
    #[arg(short, long, num_args = 1.., default_values = ["1.mp4", "2.mp4", "3.mp4"])]
    pub input: Vec<String>,

    /// 输出文件：.png/.jpg 按帧保存图片，其他扩展名追加原始字节
    #[arg(short, long)]
    pub output: Option<String>,

    /// 每次读取的帧索引，如 0,10,20
    #[arg(short, long, value_delimiter = ',', default_value = "0,1,2,3")]
    pub batch: Vec<u64>,

    /// 输出宽度（0 表示与源/裁剪区域一致）
    #[arg(short = 'W', long, default_value = "0")]
    pub width: u32,

    /// 输出高度（0 表示与源/裁剪区域一致）
    #[arg(short = 'H', long, default_value = "0")]
    pub height: u32,

    /// 输出像素格式
    #[arg(long, value_enum, default_value = "rgb24")]
    pub fourcc: FourccArg,

    /// 是否归一化到 [0,1]，不指定时由像素格式决定
    #[arg(long)]
    pub normalize: Option<bool>,

    #[arg(long, value_enum, default_value = "merged")]
    pub planes: PlanesArg,

    #[arg(long, value_enum, default_value = "nearest")]
    pub resize_type: ResizeTypeArg,

    /// 裁剪区域 x1,y1,x2,y2（默认不裁剪）
    #[arg(long, value_parser = parse_crop)]
    pub crop: Option<CropRect>,

    /// 日志级别
    #[arg(short, long, value_enum, default_value = "low")]
    pub verbose: LogLevelArg,

    /// 日志输出位置
    #[arg(long, value_enum, default_value = "console")]
    pub verbose_destination: LogDestinationArg,

    /// 解码后端
    #[arg(long, value_enum, default_value = "synthetic")]
    pub backend: BackendArg,

    /// 读取器数量
    #[arg(short, long, default_value = "6")]
    pub readers: usize,

    /// 设备数量，读取器按编号轮流分配
    #[arg(short, long, default_value = "2")]
    pub devices: u32,

    /// 每个读取器轮询全部输入的次数
    #[arg(long, default_value = "10")]
    pub iterations: usize,

    /// 初始化时的尝试次数
    #[arg(long, default_value = "20")]
    pub repeat: u32,

    /// 每个读取器的转换线程数（0 表示全部CPU核心）
    #[arg(long, default_value = "0")]
    pub threads: usize,

    /// 关闭批量读取优化
    #[arg(long)]
    pub no_batch_optimization: bool,

    /// 对比批量读取优化开/关的耗时并校验输出一致
    #[arg(long)]
    pub benchmark: bool,

    /// 列出可用的解码后端
    #[arg(short, long)]
    pub list_backends: bool,
}

impl Cli {
    pub fn read_params(&self) -> ReadParams {
        ReadParams {
            pixel_format: self.fourcc.into(),
            width: self.width,
            height: self.height,
            crop: self.crop.unwrap_or(CropRect::NONE),
            normalization: self.normalize,
            planes: self.planes.into(),
            resize_type: self.resize_type.into(),
        }
    }
}

fn parse_crop(s: &str) -> Result<CropRect, String> {
    let coords = s
        .split(',')
        .map(|part| part.trim().parse::<u32>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| "裁剪坐标格式应为 x1,y1,x2,y2".to_string())?;
    match coords.as_slice() {
        &[x1, y1, x2, y2] => Ok(CropRect::new(x1, y1, x2, y2)),
        _ => Err("裁剪坐标格式应为 x1,y1,x2,y2".to_string()),
    }
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum FourccArg {
    Rgb24,
    Bgr24,
    Y800,
    Nv12,
    Uyvy,
    Yuv444,
    Hsv,
}

impl From<FourccArg> for PixelFormat {
    fn from(arg: FourccArg) -> Self {
        match arg {
            FourccArg::Rgb24 => PixelFormat::Rgb24,
            FourccArg::Bgr24 => PixelFormat::Bgr24,
            FourccArg::Y800 => PixelFormat::Y800,
            FourccArg::Nv12 => PixelFormat::Nv12,
            FourccArg::Uyvy => PixelFormat::Uyvy,
            FourccArg::Yuv444 => PixelFormat::Yuv444,
            FourccArg::Hsv => PixelFormat::Hsv,
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum PlanesArg {
    /// 通道交错存放（HWC）
    Merged,
    /// 通道分平面存放（CHW）
    Planar,
}

impl From<PlanesArg> for Planes {
    fn from(arg: PlanesArg) -> Self {
        match arg {
            PlanesArg::Merged => Planes::Merged,
            PlanesArg::Planar => Planes::Planar,
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum ResizeTypeArg {
    Nearest,
    Bilinear,
    Bicubic,
    Area,
}

impl From<ResizeTypeArg> for ResizeType {
    fn from(arg: ResizeTypeArg) -> Self {
        match arg {
            ResizeTypeArg::Nearest => ResizeType::Nearest,
            ResizeTypeArg::Bilinear => ResizeType::Bilinear,
            ResizeTypeArg::Bicubic => ResizeType::Bicubic,
            ResizeTypeArg::Area => ResizeType::Area,
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum LogLevelArg {
    Low,
    Medium,
    High,
}

impl From<LogLevelArg> for LogLevel {
    fn from(arg: LogLevelArg) -> Self {
        match arg {
            LogLevelArg::Low => LogLevel::Low,
            LogLevelArg::Medium => LogLevel::Medium,
            LogLevelArg::High => LogLevel::High,
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum LogDestinationArg {
    Console,
    /// 写入 tensor_stream.log
    File,
}

impl From<LogDestinationArg> for LogDestination {
    fn from(arg: LogDestinationArg) -> Self {
        match arg {
            LogDestinationArg::Console => LogDestination::Console,
            LogDestinationArg::File => LogDestination::File,
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum BackendArg {
    /// 内置合成视频源，不读取文件
    Synthetic,
    /// 使用 mp4 + openh264 进行CPU解码
    #[cfg(feature = "mp4-mode")]
    Mp4,
    /// 使用 FFmpeg 解码
    #[cfg(feature = "ffmpeg-mode")]
    Ffmpeg,
}

impl From<BackendArg> for BackendKind {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Synthetic => BackendKind::Synthetic,
            #[cfg(feature = "mp4-mode")]
            BackendArg::Mp4 => BackendKind::Mp4,
            #[cfg(feature = "ffmpeg-mode")]
            BackendArg::Ffmpeg => BackendKind::Ffmpeg,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_and_crop_parsing() {
        let cli = Cli::parse_from(["tensor-stream", "--batch", "37,2,15"]);
        assert_eq!(cli.batch, vec![37, 2, 15]);
        assert!(Cli::try_parse_from(["tensor-stream", "--batch", "1,x"]).is_err());
        assert_eq!(parse_crop("0,0,32,16").unwrap(), CropRect::new(0, 0, 32, 16));
        assert!(parse_crop("0,0,32").is_err());
    }

    #[test]
    fn defaults_match_demo_script() {
        let cli = Cli::parse_from(["tensor-stream"]);
        assert_eq!(cli.input.len(), 3);
        assert_eq!(cli.repeat, 20);
        let params = cli.read_params();
        assert_eq!(params.pixel_format, PixelFormat::Rgb24);
        assert!(params.crop.is_none());
        assert_eq!(params.normalization, None);
    }
}
