use fast_image_resize::images::Image;
use fast_image_resize::{FilterType, PixelType, ResizeAlg, ResizeOptions, Resizer};

use crate::types::ResizeType;

fn resize_alg(kind: ResizeType) -> ResizeAlg {
    match kind {
        ResizeType::Nearest => ResizeAlg::Nearest,
        ResizeType::Bilinear => ResizeAlg::Convolution(FilterType::Bilinear),
        // Keys 三次卷积（a = -0.5）
        ResizeType::Bicubic => ResizeAlg::Convolution(FilterType::CatmullRom),
        // 缩小时按覆盖面积取平均
        ResizeType::Area => ResizeAlg::Convolution(FilterType::Box),
    }
}

/// 缩放一个 `u8` 平面，`src` 为 `src_w × src_h` 行主序、无填充
pub fn resize_plane(
    src: Vec<u8>,
    src_w: u32,
    src_h: u32,
    dst_w: u32,
    dst_h: u32,
    kind: ResizeType,
) -> Result<Vec<u8>, String> {
    if (src_w, src_h) == (dst_w, dst_h) {
        return Ok(src);
    }

    let src_image = Image::from_vec_u8(src_w, src_h, src, PixelType::U8)
        .map_err(|e| format!("resize source {src_w}x{src_h} rejected: {e}"))?;
    let mut dst_image = Image::new(dst_w, dst_h, PixelType::U8);
    let options = ResizeOptions::new().resize_alg(resize_alg(kind));
    Resizer::new()
        .resize(&src_image, &mut dst_image, &options)
        .map_err(|e| format!("resize to {dst_w}x{dst_h} failed: {e}"))?;
    Ok(dst_image.into_vec())
}
