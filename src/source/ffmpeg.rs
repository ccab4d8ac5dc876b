//! FFmpeg-backed frame source.
//!
//! Decodes the best video stream of a container and scales every frame to a
//! single GRAY8 plane. Open failures map to `SourceUnreadable`; decode
//! failures mid-stream map to `SourceTruncated` so the collector can keep
//! the partial series.

use anyhow::{Context, Result};
use ffmpeg_next as ffmpeg;

use super::{Frame, SourceInfo};
use crate::ScenedupError;

pub(crate) struct FfmpegSource {
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    info: SourceInfo,
    frame_count: usize,
    flushed: bool,
}

impl FfmpegSource {
    pub(crate) fn open(path: &str) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let input = ffmpeg::format::input(&path).map_err(|e| {
            ScenedupError::SourceUnreadable(format!("'{}': {}", path, e))
        })?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| ScenedupError::SourceUnreadable(format!("'{}': no video track", path)))?;
        let stream_index = input_stream.index();

        let rate = input_stream.avg_frame_rate();
        let fps = if rate.denominator() != 0 {
            rate.numerator() as f64 / rate.denominator() as f64
        } else {
            0.0
        };
        if fps <= 0.0 {
            return Err(ScenedupError::SourceUnreadable(format!(
                "'{}': container reports no frame rate",
                path
            ))
            .into());
        }

        let duration = if input.duration() > 0 {
            Some(input.duration() as f64 / f64::from(ffmpeg::ffi::AV_TIME_BASE))
        } else {
            None
        };
        let nframes = if input_stream.frames() > 0 {
            input_stream.frames() as u64
        } else {
            duration.map(|d| (d * fps) as u64).unwrap_or(0)
        };

        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .context("load video decoder parameters")?;
        let decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;

        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::GRAY8,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        Ok(Self {
            input,
            stream_index,
            decoder,
            scaler,
            info: SourceInfo {
                fps,
                duration,
                nframes,
            },
            frame_count: 0,
            flushed: false,
        })
    }

    pub(crate) fn info(&self) -> SourceInfo {
        self.info
    }

    pub(crate) fn next_frame(&mut self) -> Result<Option<Frame>> {
        loop {
            if let Some(frame) = self.receive_one()? {
                return Ok(Some(frame));
            }
            if self.flushed {
                return Ok(None);
            }

            // Feed the next packet of our stream, or flush at container EOF.
            let mut fed = false;
            for (stream, packet) in self.input.packets() {
                if stream.index() != self.stream_index {
                    continue;
                }
                self.decoder.send_packet(&packet).map_err(|e| {
                    ScenedupError::SourceTruncated {
                        frames: self.frame_count,
                        reason: format!("send packet: {}", e),
                    }
                })?;
                fed = true;
                break;
            }
            if !fed {
                self.decoder.send_eof().map_err(|e| {
                    ScenedupError::SourceTruncated {
                        frames: self.frame_count,
                        reason: format!("flush decoder: {}", e),
                    }
                })?;
                self.flushed = true;
            }
        }
    }

    fn receive_one(&mut self) -> Result<Option<Frame>> {
        let mut decoded = ffmpeg::frame::Video::empty();
        if self.decoder.receive_frame(&mut decoded).is_err() {
            return Ok(None);
        }

        let mut gray = ffmpeg::frame::Video::empty();
        self.scaler
            .run(&decoded, &mut gray)
            .map_err(|e| ScenedupError::SourceTruncated {
                frames: self.frame_count,
                reason: format!("scale frame: {}", e),
            })?;

        let frame = plane_to_frame(&gray)?;
        self.frame_count += 1;
        Ok(Some(frame))
    }
}

fn plane_to_frame(frame: &ffmpeg::frame::Video) -> Result<Frame> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = width as usize;
    let stride = frame.stride(0);
    let data = frame.data(0);

    let pixels = if stride == row_bytes {
        data.to_vec()
    } else {
        let mut pixels = Vec::with_capacity(row_bytes * height as usize);
        for row in 0..height as usize {
            let start = row * stride;
            let end = start + row_bytes;
            pixels.extend_from_slice(
                data.get(start..end)
                    .context("ffmpeg frame row is out of bounds")?,
            );
        }
        pixels
    };

    Ok(Frame {
        pixels,
        width,
        height,
    })
}
