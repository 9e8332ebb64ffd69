use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use anyhow::{bail, Context, Result};
use image::{GrayImage, RgbImage};

use crate::types::{Frame, PixelFormat, Planes, TensorData};

/// `.png`/`.jpg`/`.jpeg` 按图片保存，其余追加原始字节
pub fn is_image_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| matches!(ext.to_ascii_lowercase().as_str(), "png" | "jpg" | "jpeg"))
        .unwrap_or(false)
}

pub fn dump_frame(frame: &Frame, path: &Path) -> Result<()> {
    if is_image_path(path) {
        save_image(frame, path)
    } else {
        append_raw(frame, path)
    }
}

/// 追加原始字节（f32 为小端序）
pub fn append_raw(frame: &Frame, path: &Path) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("无法打开输出文件: {}", path.display()))?;
    file.write_all(&frame.data.to_bytes())
        .with_context(|| format!("写入失败: {}", path.display()))?;
    Ok(())
}

pub fn save_image(frame: &Frame, path: &Path) -> Result<()> {
    let TensorData::U8(samples) = &frame.data else {
        bail!("帧 {} 是浮点数据，无法保存为图片", frame.index);
    };
    let (w, h) = (frame.width as u32, frame.height as u32);

    match (frame.channels, frame.planes) {
        (3, Planes::Merged) => {
            let mut rgb = samples.clone();
            if frame.format == PixelFormat::Bgr24 {
                for px in rgb.chunks_exact_mut(3) {
                    px.swap(0, 2);
                }
            }
            let image = RgbImage::from_raw(w, h, rgb)
                .with_context(|| format!("帧 {} 的数据长度与尺寸不符", frame.index))?;
            image.save(path)?;
        }
        (1, _) => {
            let image = GrayImage::from_raw(w, h, samples.clone())
                .with_context(|| format!("帧 {} 的数据长度与尺寸不符", frame.index))?;
            image.save(path)?;
        }
        (channels, planes) => bail!(
            "不支持保存 {} 通道 {:?} 排列的 {} 帧",
            channels,
            planes,
            frame.format.as_str()
        ),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(data: TensorData, channels: usize) -> Frame {
        Frame {
            index: 3,
            height: 2,
            width: 2,
            channels,
            format: if channels == 3 {
                PixelFormat::Rgb24
            } else {
                PixelFormat::Y800
            },
            planes: Planes::Merged,
            data,
        }
    }

    fn temp_path(name: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("tensor-stream-{}-{name}", std::process::id()));
        let _ = std::fs::remove_file(&path);
        path
    }

    #[test]
    fn image_extensions_ignore_case() {
        assert!(is_image_path(Path::new("out/frame.PNG")));
        assert!(is_image_path(Path::new("frame.jpeg")));
        assert!(!is_image_path(Path::new("frames.bin")));
        assert!(!is_image_path(Path::new("frames")));
    }

    #[test]
    fn raw_dumps_append() {
        let path = temp_path("append.bin");
        let f = frame(TensorData::U8(vec![1, 2, 3, 4]), 1);
        dump_frame(&f, &path).unwrap();
        dump_frame(&f, &path).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), vec![1, 2, 3, 4, 1, 2, 3, 4]);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn png_round_trips_through_image() {
        let path = temp_path("frame.png");
        let f = frame(TensorData::U8((0..12).collect()), 3);
        dump_frame(&f, &path).unwrap();
        let decoded = image::open(&path).unwrap().to_rgb8();
        assert_eq!(decoded.into_raw(), (0..12).collect::<Vec<u8>>());
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn float_frames_are_not_images() {
        let path = temp_path("float.png");
        let f = frame(TensorData::F32(vec![0.5; 12]), 3);
        assert!(dump_frame(&f, &path).is_err());
    }
}
