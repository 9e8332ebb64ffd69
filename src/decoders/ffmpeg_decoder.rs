use std::path::Path;

use ffmpeg_next as ffmpeg;
use ffmpeg::format::Pixel;
use ffmpeg::media::Type;
use ffmpeg::software::scaling::{Context as Scaler, Flags};
use ffmpeg::util::frame::video::Video;

use super::{DecodeSession, DecoderBackend, RawFrame, StreamInfo};
use crate::error::{Result, StreamError};
use crate::types::VideoKey;

#[derive(Debug, Default, Clone, Copy)]
pub struct FfmpegBackend;

impl DecoderBackend for FfmpegBackend {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    fn open(&self, key: &VideoKey, _device_id: u32) -> Result<Box<dyn DecodeSession>> {
        Ok(Box::new(FfmpegSession::open(key)?))
    }
}

fn unavailable(key: &VideoKey, reason: impl std::fmt::Display) -> StreamError {
    StreamError::SourceUnavailable {
        key: key.clone(),
        reason: reason.to_string(),
    }
}

struct FfmpegSession {
    key: VideoKey,
    info: StreamInfo,
    input: ffmpeg::format::context::Input,
    decoder: ffmpeg::decoder::Video,
    stream_index: usize,
    /// 时间基 (num, den)
    time_base: (i32, i32),
    /// 按显示顺序排列的 pts，下标即帧索引
    pts: Vec<i64>,
    next_output: u64,
    eof: bool,
}

fn open_decoder(
    key: &VideoKey,
    input: &ffmpeg::format::context::Input,
) -> Result<(usize, ffmpeg::decoder::Video, (i32, i32), f64)> {
    let stream = input
        .streams()
        .best(Type::Video)
        .ok_or_else(|| unavailable(key, "未找到视频流"))?;
    let mut context = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
        .map_err(|e| unavailable(key, e))?;
    context.set_threading(ffmpeg::threading::Config {
        kind: ffmpeg::threading::Type::Frame,
        count: 0,
    });
    let decoder = context.decoder().video().map_err(|e| unavailable(key, e))?;

    let rate = stream.avg_frame_rate();
    let fps = if rate.denominator() > 0 {
        rate.numerator() as f64 / rate.denominator() as f64
    } else {
        0.0
    };
    let tb = stream.time_base();
    Ok((stream.index(), decoder, (tb.numerator(), tb.denominator()), fps))
}

impl FfmpegSession {
    fn open(key: &VideoKey) -> Result<Self> {
        ffmpeg::init().map_err(|e| unavailable(key, e))?;
        let path = Path::new(key.as_str());

        // 先完整解复用一次，收集 pts 和关键帧
        let mut probe = ffmpeg::format::input(&path).map_err(|e| unavailable(key, e))?;
        let (stream_index, _, _, _) = open_decoder(key, &probe)?;
        let mut packets: Vec<(i64, bool)> = Vec::new();
        for (stream, packet) in probe.packets() {
            if stream.index() == stream_index {
                let pts = packet.pts().or(packet.dts()).unwrap_or(packets.len() as i64);
                packets.push((pts, packet.is_key()));
            }
        }
        if packets.is_empty() {
            return Err(unavailable(key, "video stream has no packets"));
        }

        let mut pts: Vec<i64> = packets.iter().map(|&(p, _)| p).collect();
        pts.sort_unstable();
        let mut keyframes: Vec<u64> = packets
            .iter()
            .filter(|&&(_, is_key)| is_key)
            .filter_map(|&(p, _)| pts.binary_search(&p).ok().map(|i| i as u64))
            .collect();
        keyframes.sort_unstable();
        keyframes.dedup();
        if keyframes.first() != Some(&0) {
            keyframes.insert(0, 0);
        }

        let input = ffmpeg::format::input(&path).map_err(|e| unavailable(key, e))?;
        let (stream_index, decoder, time_base, fps) = open_decoder(key, &input)?;
        let info = StreamInfo {
            width: decoder.width(),
            height: decoder.height(),
            frame_count: pts.len() as u64,
            keyframes,
            fps,
        };

        Ok(Self {
            key: key.clone(),
            info,
            input,
            decoder,
            stream_index,
            time_base,
            pts,
            next_output: 0,
            eof: false,
        })
    }

    fn decode_error(&self, reason: impl std::fmt::Display) -> StreamError {
        StreamError::DecodeError {
            key: self.key.clone(),
            index: self.next_output,
            reason: reason.to_string(),
        }
    }

    fn frame_index(&self, frame: &Video) -> u64 {
        frame
            .timestamp()
            .or(frame.pts())
            .and_then(|ts| self.pts.binary_search(&ts).ok())
            .map(|i| i as u64)
            .unwrap_or(self.next_output)
    }

    fn to_raw(&self, index: u64, frame: &Video) -> Result<RawFrame> {
        let (width, height) = (frame.width(), frame.height());
        let planes = |f: &Video| {
            RawFrame::from_i420(
                index,
                width,
                height,
                (f.data(0), f.data(1), f.data(2)),
                (f.stride(0), f.stride(1), f.stride(2)),
            )
        };
        if frame.format() == Pixel::YUV420P {
            return Ok(planes(frame));
        }

        let mut scaler = Scaler::get(frame.format(), width, height, Pixel::YUV420P, width, height, Flags::BILINEAR)
            .map_err(|e| self.decode_error(e))?;
        let mut converted = Video::empty();
        scaler
            .run(frame, &mut converted)
            .map_err(|e| self.decode_error(e))?;
        Ok(planes(&converted))
    }
}

impl DecodeSession for FfmpegSession {
    fn info(&self) -> &StreamInfo {
        &self.info
    }

    fn next_index(&self) -> u64 {
        self.next_output
    }

    fn seek_keyframe(&mut self, index: u64) -> Result<u64> {
        let keyframe = self.info.keyframe_at_or_before(index);
        let pts = self.pts[keyframe as usize];
        // 转换到 AV_TIME_BASE（微秒）
        let (num, den) = self.time_base;
        let ts = if den > 0 {
            pts * num as i64 * 1_000_000 / den as i64
        } else {
            pts
        };
        self.input
            .seek(ts, ..=ts)
            .map_err(|e| self.decode_error(format!("seek to frame {keyframe}: {e}")))?;
        self.decoder.flush();
        self.eof = false;
        self.next_output = keyframe;
        Ok(keyframe)
    }

    fn decode_next(&mut self) -> Result<RawFrame> {
        let mut decoded = Video::empty();
        loop {
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                let index = self.frame_index(&decoded);
                // seek 落在关键帧之前时丢弃多余的帧
                if index < self.next_output {
                    continue;
                }
                let frame = self.to_raw(index, &decoded)?;
                self.next_output = index + 1;
                return Ok(frame);
            }
            if self.eof {
                return Err(self.decode_error("end of stream"));
            }

            let stream_index = self.stream_index;
            let packet = self
                .input
                .packets()
                .find(|(stream, _)| stream.index() == stream_index)
                .map(|(_, packet)| packet);
            match packet {
                Some(packet) => self
                    .decoder
                    .send_packet(&packet)
                    .map_err(|e| self.decode_error(e))?,
                None => {
                    self.decoder.send_eof().map_err(|e| self.decode_error(e))?;
                    self.eof = true;
                }
            }
        }
    }
}
