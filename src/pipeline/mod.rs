use rayon::prelude::*;

use crate::decoders::{RawFrame, StreamInfo};
use crate::error::{RequestError, Result, StreamError};
use crate::types::{CropRect, Frame, PixelFormat, Planes, ReadParams, ResizeType, TensorData, VideoKey};

pub mod color;
pub mod resize;

use color::Yuv444;

/// 输出宽高的上限，超出时在解码前拒绝
pub const MAX_OUTPUT_SIDE: u32 = 8192;

/// 校验通过、参数已解析的转换计划
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConversionPlan {
    /// 源坐标系下的裁剪区域（未裁剪时为整帧）
    pub crop: CropRect,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub planes: Planes,
    pub resize: ResizeType,
    pub normalize: bool,
}

impl ConversionPlan {
    pub fn resolve(key: &VideoKey, params: &ReadParams, info: &StreamInfo) -> Result<Self> {
        let invalid = |reason| StreamError::InvalidRequest {
            key: key.clone(),
            reason,
        };

        let crop = if params.crop.is_none() {
            CropRect::new(0, 0, info.width, info.height)
        } else {
            let CropRect { x1, y1, x2, y2 } = params.crop;
            if x1 >= x2 || y1 >= y2 {
                return Err(invalid(RequestError::MalformedCrop { x1, y1, x2, y2 }));
            }
            if x2 > info.width || y2 > info.height {
                return Err(invalid(RequestError::CropOutOfBounds {
                    x1,
                    y1,
                    x2,
                    y2,
                    width: info.width,
                    height: info.height,
                }));
            }
            params.crop
        };

        let width = if params.width == 0 { crop.width() } else { params.width };
        let height = if params.height == 0 { crop.height() } else { params.height };

        let requirement = match params.pixel_format {
            _ if width > MAX_OUTPUT_SIDE || height > MAX_OUTPUT_SIDE => {
                Some("width and height of at most 8192")
            }
            PixelFormat::Nv12 if width % 2 != 0 || height % 2 != 0 => Some("even width and height"),
            PixelFormat::Uyvy if width % 2 != 0 => Some("an even width"),
            _ => None,
        };
        if let Some(requirement) = requirement {
            return Err(invalid(RequestError::UnsupportedDimensions {
                format: params.pixel_format,
                requirement,
                width,
                height,
            }));
        }

        Ok(Self {
            crop,
            width,
            height,
            format: params.pixel_format,
            planes: params.planes,
            resize: params.resize_type,
            normalize: params
                .normalization
                .unwrap_or_else(|| params.pixel_format.default_normalization()),
        })
    }
}

/// 批次本身的校验：非空，且每个索引都在源帧数之内
pub fn validate_batch(key: &VideoKey, batch: &[u64], info: &StreamInfo) -> Result<()> {
    if batch.is_empty() {
        return Err(StreamError::InvalidRequest {
            key: key.clone(),
            reason: RequestError::EmptyBatch,
        });
    }
    if let Some(&index) = batch.iter().find(|&&index| index >= info.frame_count) {
        return Err(StreamError::FrameIndexOutOfRange {
            key: key.clone(),
            index,
            frame_count: info.frame_count,
        });
    }
    Ok(())
}

/// 从 NV12 中取出裁剪区域并把色度上采样到全分辨率
fn crop_to_yuv444(raw: &RawFrame, crop: &CropRect) -> Yuv444 {
    let width = crop.width() as usize;
    let height = crop.height() as usize;
    let frame_w = raw.width as usize;
    let chroma_w = raw.chroma_width();

    let mut y = Vec::with_capacity(width * height);
    let mut u = Vec::with_capacity(width * height);
    let mut v = Vec::with_capacity(width * height);

    for row in crop.y1 as usize..crop.y2 as usize {
        let x1 = crop.x1 as usize;
        let x2 = crop.x2 as usize;
        y.extend_from_slice(&raw.y[row * frame_w + x1..row * frame_w + x2]);
        let chroma_row = &raw.uv[(row / 2) * chroma_w * 2..(row / 2 + 1) * chroma_w * 2];
        for col in x1..x2 {
            u.push(chroma_row[(col / 2) * 2]);
            v.push(chroma_row[(col / 2) * 2 + 1]);
        }
    }

    Yuv444 {
        width,
        height,
        y,
        u,
        v,
    }
}

/// 单帧转换
pub fn convert_frame(key: &VideoKey, raw: &RawFrame, plan: &ConversionPlan) -> Result<Frame> {
    if plan.crop.x2 > raw.width || plan.crop.y2 > raw.height {
        return Err(StreamError::DecodeError {
            key: key.clone(),
            index: raw.index,
            reason: format!(
                "decoded frame is {}x{}, smaller than the probed stream",
                raw.width, raw.height
            ),
        });
    }

    let cropped = crop_to_yuv444(raw, &plan.crop);
    let (dst_w, dst_h) = (plan.width as usize, plan.height as usize);
    let resized = if (cropped.width, cropped.height) == (dst_w, dst_h) {
        cropped
    } else {
        let (src_w, src_h) = (plan.crop.width(), plan.crop.height());
        let scale = |plane: Vec<u8>| {
            resize::resize_plane(plane, src_w, src_h, plan.width, plan.height, plan.resize).map_err(
                |reason| StreamError::ConversionFailed {
                    key: key.clone(),
                    index: raw.index,
                    reason,
                },
            )
        };
        Yuv444 {
            width: dst_w,
            height: dst_h,
            y: scale(cropped.y)?,
            u: scale(cropped.u)?,
            v: scale(cropped.v)?,
        }
    };

    let (height, width, channels, data) = if plan.normalize && plan.format == PixelFormat::Hsv {
        (
            resized.height,
            resized.width,
            3,
            TensorData::F32(color::hsv_normalized(&resized, plan.planes)),
        )
    } else {
        let packed = color::pack(&resized, plan.format, plan.planes);
        let data = if plan.normalize {
            TensorData::F32(packed.samples.iter().map(|&s| s as f32 / 255.0).collect())
        } else {
            TensorData::U8(packed.samples)
        };
        (packed.height, packed.width, packed.channels, data)
    };

    Ok(Frame {
        index: raw.index,
        height,
        width,
        channels,
        format: plan.format,
        planes: if plan.format.is_three_channel() {
            plan.planes
        } else {
            Planes::Merged
        },
        data,
    })
}

/// 并行转换一批帧；结果顺序与输入顺序一致，任一帧失败则整批失败
pub fn convert_batch(
    key: &VideoKey,
    frames: &[RawFrame],
    plan: &ConversionPlan,
    workers: &rayon::ThreadPool,
) -> Result<Vec<Frame>> {
    workers.install(|| {
        frames
            .par_iter()
            .map(|raw| convert_frame(key, raw, plan))
            .collect()
    })
}
