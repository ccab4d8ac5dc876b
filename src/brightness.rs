//! Brightness collection.
//!
//! Reduces every decoded frame to its arithmetic mean intensity. No
//! smoothing, no gamma correction; the series is aligned with the frame
//! stream and may fall short of the container's frame count when the stream
//! is truncated.

use anyhow::Result;

use crate::import::StopToken;
use crate::source::{Frame, VideoSource};
use crate::ScenedupError;

/// Mean intensity of one frame as `f32`.
pub fn frame_mean(frame: &Frame) -> f32 {
    if frame.pixels.is_empty() {
        return 0.0;
    }
    let sum: u64 = frame.pixels.iter().map(|&p| p as u64).sum();
    sum as f32 / frame.pixels.len() as f32
}

/// Drain a source into its per-frame brightness series. A truncated stream
/// is accepted with a warning; any other failure propagates. An interrupt on
/// `cancel` aborts the collection.
pub fn collect(source: &mut VideoSource, cancel: &StopToken) -> Result<Vec<f32>> {
    let mut series = Vec::with_capacity(source.info().nframes as usize);
    loop {
        if cancel.is_interrupted() {
            return Err(ScenedupError::Interrupted.into());
        }
        match source.next_frame() {
            Ok(Some(frame)) => series.push(frame_mean(&frame)),
            Ok(None) => break,
            Err(err) => match err.downcast::<ScenedupError>() {
                Ok(ScenedupError::SourceTruncated { frames, reason }) => {
                    log::warn!(
                        "source truncated after {} frames ({}); keeping partial series",
                        frames,
                        reason
                    );
                    break;
                }
                Ok(other) => return Err(other.into()),
                Err(other) => return Err(other),
            },
        }
    }
    Ok(series)
}
