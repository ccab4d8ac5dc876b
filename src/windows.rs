//! Window construction.
//!
//! Stored extrema gaps are sliced into fixed-width overlapping windows; the
//! resulting vectors are what the ANN index searches over. Each window keeps
//! a back reference to its file and anchor frame so a hit can be projected
//! to a scene offset.

use anyhow::Result;

use crate::config::SearchParams;
use crate::store::Store;
use crate::FileInfo;

/// Files contributing fewer gaps than this are skipped outright.
pub const MIN_GAPS_PER_FILE: usize = 5;

/// Normalization target for `--fixspeed`: windows are scaled to mean 128.
const SPEED_NORM_MEAN: f32 = 128.0;

/// Back reference from a window to its origin.
#[derive(Clone, Debug)]
pub struct WindowRef {
    pub file: FileInfo,
    pub anchor_frame: u32,
}

impl WindowRef {
    /// Scene offset reported for a hit on this window.
    pub fn offset_seconds(&self) -> f64 {
        self.anchor_frame as f64 / self.file.fps
    }
}

/// Parallel tables indexed by window number.
#[derive(Default)]
pub struct WindowSet {
    pub items: Vec<Vec<f32>>,
    pub refs: Vec<WindowRef>,
}

impl WindowSet {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Build the window tables for every stored file under `params`.
pub fn build(store: &Store, params: &SearchParams) -> Result<WindowSet> {
    let length = params.index_length;
    let mut set = WindowSet::default();

    for fi in store.get_file_infos()? {
        let min_frame = (params.ignore_start * fi.fps).max(0.0) as u32;
        let considered_end = (fi.duration - params.ignore_end) * fi.fps;
        let max_frame = considered_end.max(0.0) as u32;
        let (frames, gaps) = store.get_hashes(fi.fid, min_frame, max_frame)?;

        if gaps.len() < MIN_GAPS_PER_FILE {
            log::debug!(
                "skipping {} ({} gaps in considered region)",
                fi.name,
                gaps.len()
            );
            continue;
        }
        if gaps.len() <= length {
            continue;
        }

        for k in 0..gaps.len() - length {
            let mut window = gaps[k..k + length].to_vec();
            clamp_scene_length(&mut window, params.scene_length);
            if params.fix_speed && !speed_normalize(&mut window) {
                continue;
            }
            set.items.push(window);
            set.refs.push(WindowRef {
                file: fi.clone(),
                anchor_frame: frames[k],
            });
        }
    }

    Ok(set)
}

/// Zero every position at and after the first index where the running sum
/// of the ORIGINAL gap values exceeds `budget` seconds.
pub fn clamp_scene_length(window: &mut [f32], budget: f32) {
    let mut total = 0.0f32;
    let mut cut = None;
    for (i, &gap) in window.iter().enumerate() {
        total += gap;
        if total > budget {
            cut = Some(i);
            break;
        }
    }
    if let Some(i) = cut {
        for value in &mut window[i..] {
            *value = 0.0;
        }
    }
}

/// Scale the window to mean `SPEED_NORM_MEAN`. Returns false for a zero-mean
/// window, which the caller must drop.
pub fn speed_normalize(window: &mut [f32]) -> bool {
    if window.is_empty() {
        return false;
    }
    let mean = window.iter().sum::<f32>() / window.len() as f32;
    if mean == 0.0 {
        return false;
    }
    let scale = SPEED_NORM_MEAN / mean;
    for value in window.iter_mut() {
        *value *= scale;
    }
    true
}
