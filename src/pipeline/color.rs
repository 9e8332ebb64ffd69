use rayon::prelude::*;

use crate::types::{PixelFormat, Planes};

/// 全分辨率三平面 YUV
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Yuv444 {
    pub width: usize,
    pub height: usize,
    pub y: Vec<u8>,
    pub u: Vec<u8>,
    pub v: Vec<u8>,
}

/// 转换结果：每个采样一个 `u8`，以及张量形状 `(height, width, channels)`
pub struct Packed {
    pub height: usize,
    pub width: usize,
    pub channels: usize,
    pub samples: Vec<u8>,
}

#[inline]
fn clamp_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

/// BT.601 有限范围：R = 1.164(Y-16) + 1.596(V-128)
#[inline]
pub fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = 1.164 * (y as f32 - 16.0);
    let d = u as f32 - 128.0;
    let e = v as f32 - 128.0;
    [
        clamp_u8(c + 1.596 * e),
        clamp_u8(c - 0.392 * d - 0.813 * e),
        clamp_u8(c + 2.017 * d),
    ]
}

/// RGB → HSV，三个分量都落在 `[0, 1]`（色相按 360° 归一）
#[inline]
pub fn rgb_to_hsv(rgb: [u8; 3]) -> [f32; 3] {
    let [r, g, b] = rgb.map(|c| c as f32 / 255.0);
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let hue = if delta == 0.0 {
        0.0
    } else if max == r {
        60.0 * ((g - b) / delta).rem_euclid(6.0)
    } else if max == g {
        60.0 * ((b - r) / delta + 2.0)
    } else {
        60.0 * ((r - g) / delta + 4.0)
    };
    let saturation = if max == 0.0 { 0.0 } else { delta / max };
    [hue / 360.0, saturation, max]
}

fn three_channel(
    frame: &Yuv444,
    planes: Planes,
    pixel: impl Fn(u8, u8, u8) -> [u8; 3] + Sync,
) -> Vec<u8> {
    let area = frame.width * frame.height;
    let mut merged = vec![0u8; area * 3];
    merged
        .par_chunks_mut(frame.width * 3)
        .enumerate()
        .for_each(|(row, out)| {
            let base = row * frame.width;
            for x in 0..frame.width {
                let i = base + x;
                let px = pixel(frame.y[i], frame.u[i], frame.v[i]);
                out[x * 3..x * 3 + 3].copy_from_slice(&px);
            }
        });

    match planes {
        Planes::Merged => merged,
        Planes::Planar => {
            let mut planar = vec![0u8; area * 3];
            for (i, px) in merged.chunks_exact(3).enumerate() {
                planar[i] = px[0];
                planar[area + i] = px[1];
                planar[2 * area + i] = px[2];
            }
            planar
        }
    }
}

fn average(a: u8, b: u8) -> u8 {
    ((a as u16 + b as u16 + 1) / 2) as u8
}

/// 把 YUV444 组装成请求的格式。调用方保证 NV12 宽高均为偶数、UYVY 宽为偶数。
pub fn pack(frame: &Yuv444, format: PixelFormat, planes: Planes) -> Packed {
    let (w, h) = (frame.width, frame.height);
    match format {
        PixelFormat::Rgb24 => Packed {
            height: h,
            width: w,
            channels: 3,
            samples: three_channel(frame, planes, yuv_to_rgb),
        },
        PixelFormat::Bgr24 => Packed {
            height: h,
            width: w,
            channels: 3,
            samples: three_channel(frame, planes, |y, u, v| {
                let [r, g, b] = yuv_to_rgb(y, u, v);
                [b, g, r]
            }),
        },
        PixelFormat::Yuv444 => Packed {
            height: h,
            width: w,
            channels: 3,
            samples: three_channel(frame, planes, |y, u, v| [y, u, v]),
        },
        PixelFormat::Hsv => Packed {
            height: h,
            width: w,
            channels: 3,
            samples: three_channel(frame, planes, |y, u, v| {
                rgb_to_hsv(yuv_to_rgb(y, u, v)).map(|c| clamp_u8(c * 255.0))
            }),
        },
        PixelFormat::Y800 => Packed {
            height: h,
            width: w,
            channels: 1,
            samples: frame.y.clone(),
        },
        PixelFormat::Nv12 => {
            let mut samples = Vec::with_capacity(w * h * 3 / 2);
            samples.extend_from_slice(&frame.y);
            for cy in 0..h / 2 {
                for cx in 0..w / 2 {
                    let idx = [
                        2 * cy * w + 2 * cx,
                        2 * cy * w + 2 * cx + 1,
                        (2 * cy + 1) * w + 2 * cx,
                        (2 * cy + 1) * w + 2 * cx + 1,
                    ];
                    let u: u16 = idx.iter().map(|&i| frame.u[i] as u16).sum();
                    let v: u16 = idx.iter().map(|&i| frame.v[i] as u16).sum();
                    samples.push(((u + 2) / 4) as u8);
                    samples.push(((v + 2) / 4) as u8);
                }
            }
            Packed {
                height: h * 3 / 2,
                width: w,
                channels: 1,
                samples,
            }
        }
        PixelFormat::Uyvy => {
            let mut samples = Vec::with_capacity(w * h * 2);
            for row in 0..h {
                let base = row * w;
                for x in (0..w).step_by(2) {
                    let (i, j) = (base + x, base + x + 1);
                    samples.push(average(frame.u[i], frame.u[j]));
                    samples.push(frame.y[i]);
                    samples.push(average(frame.v[i], frame.v[j]));
                    samples.push(frame.y[j]);
                }
            }
            Packed {
                height: h,
                width: w,
                channels: 2,
                samples,
            }
        }
    }
}

/// HSV 的归一化输出直接由浮点结果给出，避免先量化到 8 位
pub fn hsv_normalized(frame: &Yuv444, planes: Planes) -> Vec<f32> {
    let area = frame.width * frame.height;
    let pixels: Vec<[f32; 3]> = (0..area)
        .into_par_iter()
        .map(|i| rgb_to_hsv(yuv_to_rgb(frame.y[i], frame.u[i], frame.v[i])))
        .collect();
    match planes {
        Planes::Merged => pixels.into_iter().flatten().collect(),
        Planes::Planar => (0..3)
            .flat_map(|c| pixels.iter().map(move |px| px[c]))
            .collect(),
    }
}
