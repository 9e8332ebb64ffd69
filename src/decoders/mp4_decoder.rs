use std::fs::File;
use std::io::BufReader;

use openh264::decoder::{Decoder as H264Decoder, DecoderConfig, Flush};
use openh264::formats::YUVSource;
use openh264::OpenH264API;

use super::{DecodeSession, DecoderBackend, RawFrame, StreamInfo};
use crate::error::{Result, StreamError};
use crate::types::VideoKey;

const NAL_IDR_SLICE: u8 = 5;
const NAL_SPS: u8 = 7;
const NAL_PPS: u8 = 8;
const NAL_SLICE: u8 = 1;

/// 从 `stream` 开头切出一个带长度前缀的 NAL 单元
fn next_nal(stream: &[u8], length_size: u8) -> Option<(&[u8], &[u8])> {
    let length_size = length_size as usize;
    if stream.len() < length_size {
        return None;
    }
    let nal_size = stream[..length_size]
        .iter()
        .fold(0usize, |acc, &b| (acc << 8) | b as usize);
    let rest = &stream[length_size..];
    if nal_size == 0 || nal_size > rest.len() {
        return None;
    }
    Some(rest.split_at(nal_size))
}

/// 长度前缀 NAL 转 Annex B，IDR 前补上轨道头里的 SPS/PPS
pub struct Mp4BitstreamConverter {
    length_size: u8,
    sps: Vec<Vec<u8>>,
    pps: Vec<Vec<u8>>,
    new_idr: bool,
    sps_seen: bool,
    pps_seen: bool,
}

impl Mp4BitstreamConverter {
    fn for_mp4_track(key: &VideoKey, track: &mp4::Mp4Track) -> Result<Self> {
        let avcc = &track
            .trak
            .mdia
            .minf
            .stbl
            .stsd
            .avc1
            .as_ref()
            .ok_or_else(|| StreamError::SourceUnavailable {
                key: key.clone(),
                reason: "track has no AVC1 configuration".to_string(),
            })?
            .avcc;

        Ok(Self {
            length_size: avcc.length_size_minus_one + 1,
            sps: avcc.sequence_parameter_sets.iter().map(|v| v.bytes.clone()).collect(),
            pps: avcc.picture_parameter_sets.iter().map(|v| v.bytes.clone()).collect(),
            new_idr: true,
            sps_seen: false,
            pps_seen: false,
        })
    }

    /// 重新从关键帧开始时调用
    fn restart(&mut self) {
        self.new_idr = true;
        self.sps_seen = false;
        self.pps_seen = false;
    }

    fn convert_packet(&mut self, packet: &[u8], out: &mut Vec<u8>) {
        let mut stream = packet;
        out.clear();

        while let Some((unit, rest)) = next_nal(stream, self.length_size) {
            stream = rest;
            let nal_type = unit[0] & 0x1F;

            match nal_type {
                NAL_SPS => self.sps_seen = true,
                NAL_PPS => self.pps_seen = true,
                NAL_IDR_SLICE => {
                    // first_mb_in_slice == 0 表示新的 IDR 图像
                    if !self.new_idr && unit.len() > 1 && unit[1] & 0x80 != 0 {
                        self.new_idr = true;
                    }
                    if self.new_idr && !self.sps_seen {
                        for sps in &self.sps {
                            out.extend([0, 0, 1]);
                            out.extend(sps);
                        }
                    }
                    if self.new_idr && !self.pps_seen {
                        for pps in &self.pps {
                            out.extend([0, 0, 1]);
                            out.extend(pps);
                        }
                    }
                    self.new_idr = false;
                }
                _ => {}
            }

            out.extend([0, 0, 1]);
            out.extend(unit);

            if !self.new_idr && nal_type == NAL_SLICE {
                self.new_idr = true;
                self.sps_seen = false;
                self.pps_seen = false;
            }
        }
    }
}

/// 基于 `mp4` + `openh264` 的解码后端，`device_id` 被忽略
#[derive(Debug, Default, Clone, Copy)]
pub struct Mp4Backend;

impl DecoderBackend for Mp4Backend {
    fn name(&self) -> &'static str {
        "mp4"
    }

    fn open(&self, key: &VideoKey, _device_id: u32) -> Result<Box<dyn DecodeSession>> {
        Ok(Box::new(Mp4Session::open(key)?))
    }
}

struct Mp4Session {
    key: VideoKey,
    info: StreamInfo,
    reader: mp4::Mp4Reader<BufReader<File>>,
    track_id: u32,
    bitstream: Mp4BitstreamConverter,
    decoder: H264Decoder,
    /// 下一个要送入解码器的样本（0 起）
    next_sample: u64,
    /// 下一个解码器输出帧的索引
    next_output: u64,
    buffer: Vec<u8>,
}

fn unavailable(key: &VideoKey, reason: impl std::fmt::Display) -> StreamError {
    StreamError::SourceUnavailable {
        key: key.clone(),
        reason: reason.to_string(),
    }
}

fn new_decoder(key: &VideoKey) -> Result<H264Decoder> {
    let config = DecoderConfig::new().flush_after_decode(Flush::Flush);
    H264Decoder::with_api_config(OpenH264API::from_source(), config)
        .map_err(|e| unavailable(key, format!("openh264: {e}")))
}

impl Mp4Session {
    fn open(key: &VideoKey) -> Result<Self> {
        let file = File::open(key.as_str()).map_err(|e| unavailable(key, e))?;
        let size = file.metadata().map_err(|e| unavailable(key, e))?.len();
        let reader =
            mp4::Mp4Reader::read_header(BufReader::new(file), size).map_err(|e| unavailable(key, e))?;

        let (track_id, track) = reader
            .tracks()
            .iter()
            .find(|(_, t)| matches!(t.media_type(), Ok(mp4::MediaType::H264)))
            .ok_or_else(|| unavailable(key, "no H.264 video track"))?;
        let track_id = *track_id;

        let frame_count = reader
            .sample_count(track_id)
            .map_err(|e| unavailable(key, e))? as u64;
        if frame_count == 0 {
            return Err(unavailable(key, "video track has no samples"));
        }

        // stss 条目从 1 开始；没有 stss 时每个样本都是同步样本
        let keyframes = match &track.trak.mdia.minf.stbl.stss {
            Some(stss) => {
                let mut frames: Vec<u64> =
                    stss.entries.iter().map(|&n| n.saturating_sub(1) as u64).collect();
                frames.sort_unstable();
                frames.dedup();
                if frames.first() != Some(&0) {
                    frames.insert(0, 0);
                }
                frames
            }
            None => (0..frame_count).collect(),
        };

        let seconds = track.duration().as_secs_f64();
        let info = StreamInfo {
            width: track.width() as u32,
            height: track.height() as u32,
            frame_count,
            keyframes,
            fps: if seconds > 0.0 {
                frame_count as f64 / seconds
            } else {
                0.0
            },
        };
        let bitstream = Mp4BitstreamConverter::for_mp4_track(key, track)?;

        Ok(Self {
            key: key.clone(),
            info,
            reader,
            track_id,
            bitstream,
            decoder: new_decoder(key)?,
            next_sample: 0,
            next_output: 0,
            buffer: Vec::new(),
        })
    }

    fn decode_error(&self, reason: impl std::fmt::Display) -> StreamError {
        StreamError::DecodeError {
            key: self.key.clone(),
            index: self.next_output,
            reason: reason.to_string(),
        }
    }
}

impl DecodeSession for Mp4Session {
    fn info(&self) -> &StreamInfo {
        &self.info
    }

    fn next_index(&self) -> u64 {
        self.next_output
    }

    fn seek_keyframe(&mut self, index: u64) -> Result<u64> {
        let keyframe = self.info.keyframe_at_or_before(index);
        self.decoder = new_decoder(&self.key)?;
        self.bitstream.restart();
        self.next_sample = keyframe;
        self.next_output = keyframe;
        Ok(keyframe)
    }

    fn decode_next(&mut self) -> Result<RawFrame> {
        while self.next_sample < self.info.frame_count {
            let sample_id = self.next_sample as u32 + 1;
            self.next_sample += 1;

            let sample = self
                .reader
                .read_sample(self.track_id, sample_id)
                .map_err(|e| self.decode_error(e))?;
            let Some(sample) = sample else {
                continue;
            };
            self.bitstream.convert_packet(&sample.bytes, &mut self.buffer);

            let decoded = self
                .decoder
                .decode(&self.buffer)
                .map_err(|e| StreamError::DecodeError {
                    key: self.key.clone(),
                    index: self.next_output,
                    reason: e.to_string(),
                })?;
            if let Some(image) = decoded {
                let (width, height) = image.dimensions();
                let frame = RawFrame::from_i420(
                    self.next_output,
                    width as u32,
                    height as u32,
                    (image.y(), image.u(), image.v()),
                    image.strides(),
                );
                self.next_output += 1;
                return Ok(frame);
            }
        }
        Err(self.decode_error("end of stream"))
    }
}
