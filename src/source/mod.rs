//! Frame sources.
//!
//! A `VideoSource` exposes container metadata and a finite lazy sequence of
//! decoded grayscale frames. Two backends:
//! - Synthetic (`stub://` paths and an explicit-series constructor, testing)
//! - FFmpeg (real containers, feature: `decode-ffmpeg`)
//!
//! Open failures surface as `SourceUnreadable`; a decode failure mid-stream
//! surfaces as `SourceTruncated`, which the brightness collector downgrades
//! to a partial series.

use anyhow::Result;

use crate::ScenedupError;
use crate::config::REPAIR_DURATION_CAP_SECS;

#[cfg(feature = "decode-ffmpeg")]
pub(crate) mod ffmpeg;
pub mod remux;
pub(crate) mod synthetic;

use synthetic::SyntheticSource;

/// One decoded frame, reduced to a single gray plane.
#[derive(Debug)]
pub struct Frame {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Container metadata. `duration` is `None` when the container does not
/// report one; `nframes` may overestimate what is actually decodable.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SourceInfo {
    pub fps: f64,
    pub duration: Option<f64>,
    pub nframes: u64,
}

/// A file's frame stream.
#[derive(Debug)]
pub struct VideoSource {
    backend: SourceBackend,
}

#[derive(Debug)]
enum SourceBackend {
    Synthetic(SyntheticSource),
    #[cfg(feature = "decode-ffmpeg")]
    Ffmpeg(ffmpeg::FfmpegSource),
}

impl VideoSource {
    pub fn open(path: &str) -> Result<Self> {
        if path.starts_with("stub://") {
            return Ok(Self {
                backend: SourceBackend::Synthetic(SyntheticSource::from_url(path)?),
            });
        }
        #[cfg(feature = "decode-ffmpeg")]
        {
            Ok(Self {
                backend: SourceBackend::Ffmpeg(ffmpeg::FfmpegSource::open(path)?),
            })
        }
        #[cfg(not(feature = "decode-ffmpeg"))]
        {
            Err(ScenedupError::SourceUnreadable(format!(
                "'{}': built without the decode-ffmpeg feature",
                path
            ))
            .into())
        }
    }

    /// Source backed by an explicit brightness series, one uniform frame per
    /// value. Values are clamped to the u8 grid.
    pub fn synthetic(fps: f64, values: Vec<f32>) -> Self {
        Self {
            backend: SourceBackend::Synthetic(SyntheticSource::from_series(fps, values)),
        }
    }

    pub fn info(&self) -> SourceInfo {
        match &self.backend {
            SourceBackend::Synthetic(source) => source.info(),
            #[cfg(feature = "decode-ffmpeg")]
            SourceBackend::Ffmpeg(source) => source.info(),
        }
    }

    /// Next frame, or `None` at end of stream.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        match &mut self.backend {
            SourceBackend::Synthetic(source) => source.next_frame(),
            #[cfg(feature = "decode-ffmpeg")]
            SourceBackend::Ffmpeg(source) => source.next_frame(),
        }
    }
}

/// True when the repair policy applies: the container reports no duration,
/// or one past the plausibility cap.
pub fn needs_repair(info: &SourceInfo) -> bool {
    match info.duration {
        None => true,
        Some(duration) => duration > REPAIR_DURATION_CAP_SECS,
    }
}
