//! Deterministic stub frame source.
//!
//! `stub://` URLs describe a brightness pattern played back as uniform gray
//! frames, so the whole pipeline can run without a decoder. Recognized
//! forms:
//!
//! - `stub://pulse?fps=25&frames=750&period=125&phase=50`
//! - `stub://ramp?fps=25&frames=750`
//! - `stub://flat?fps=25&frames=750&value=50`
//!
//! An optional `truncate=<n>` fails the stream after `n` frames, emulating a
//! broken container tail.

use anyhow::Result;

use super::{Frame, SourceInfo};
use crate::ScenedupError;

const FRAME_SIDE: u32 = 16;

#[derive(Debug)]
pub(crate) struct SyntheticSource {
    fps: f64,
    values: Vec<f32>,
    cursor: usize,
    truncate_at: Option<usize>,
}

impl SyntheticSource {
    pub(crate) fn from_series(fps: f64, values: Vec<f32>) -> Self {
        Self {
            fps,
            values,
            cursor: 0,
            truncate_at: None,
        }
    }

    pub(crate) fn from_url(url: &str) -> Result<Self> {
        let rest = url.trim_start_matches("stub://");
        let (kind, query) = match rest.split_once('?') {
            Some((kind, query)) => (kind, query),
            None => (rest, ""),
        };

        let mut fps = 25.0f64;
        let mut frames = 0usize;
        let mut period = 125usize;
        let mut phase = 0usize;
        let mut value = 50.0f32;
        let mut truncate_at = None;
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, raw) = pair.split_once('=').ok_or_else(|| {
                ScenedupError::SourceUnreadable(format!("'{}': malformed query '{}'", url, pair))
            })?;
            let parse_err = || {
                ScenedupError::SourceUnreadable(format!("'{}': bad value for '{}'", url, key))
            };
            match key {
                "fps" => fps = raw.parse().map_err(|_| parse_err())?,
                "frames" => frames = raw.parse().map_err(|_| parse_err())?,
                "period" => period = raw.parse().map_err(|_| parse_err())?,
                "phase" => phase = raw.parse().map_err(|_| parse_err())?,
                "value" => value = raw.parse().map_err(|_| parse_err())?,
                "truncate" => truncate_at = Some(raw.parse().map_err(|_| parse_err())?),
                other => {
                    return Err(ScenedupError::SourceUnreadable(format!(
                        "'{}': unknown parameter '{}'",
                        url, other
                    ))
                    .into())
                }
            }
        }
        if fps <= 0.0 || frames == 0 {
            return Err(ScenedupError::SourceUnreadable(format!(
                "'{}': fps and frames must be positive",
                url
            ))
            .into());
        }

        let values: Vec<f32> = match kind {
            "pulse" => {
                let period = period.max(1);
                (0..frames)
                    .map(|i| if i % period == phase { 200.0 } else { 10.0 })
                    .collect()
            }
            "ramp" => (0..frames).map(|i| (i % 256) as f32).collect(),
            "flat" => vec![value; frames],
            other => {
                return Err(ScenedupError::SourceUnreadable(format!(
                    "'{}': unknown stub pattern '{}'",
                    url, other
                ))
                .into())
            }
        };

        let mut source = Self::from_series(fps, values);
        source.truncate_at = truncate_at;
        Ok(source)
    }

    pub(crate) fn info(&self) -> SourceInfo {
        SourceInfo {
            fps: self.fps,
            duration: Some(self.values.len() as f64 / self.fps),
            nframes: self.values.len() as u64,
        }
    }

    pub(crate) fn next_frame(&mut self) -> Result<Option<Frame>> {
        if let Some(limit) = self.truncate_at {
            if self.cursor >= limit {
                return Err(ScenedupError::SourceTruncated {
                    frames: self.cursor,
                    reason: "stub truncation point reached".into(),
                }
                .into());
            }
        }
        let Some(&value) = self.values.get(self.cursor) else {
            return Ok(None);
        };
        self.cursor += 1;

        let level = value.clamp(0.0, 255.0).round() as u8;
        Ok(Some(Frame {
            pixels: vec![level; (FRAME_SIDE * FRAME_SIDE) as usize],
            width: FRAME_SIDE,
            height: FRAME_SIDE,
        }))
    }
}
