//! scenedup - duplicate-scene detection across a video library
//!
//! The pipeline derives a compact perceptual fingerprint of each video from
//! the temporal pattern of its frame-brightness local maxima, persists the
//! fingerprints in SQLite, and surfaces groups of files sharing similar
//! scenes via a k-nearest-neighbor vector search.
//!
//! # Module Structure
//!
//! - `source`: frame sources (synthetic stub, ffmpeg behind `decode-ffmpeg`)
//! - `brightness`: per-frame mean-luma collection
//! - `extrema`: brightness local-maximum detection and gap projection
//! - `store`: SQLite gateway (files, brightness, hashes, whitelist, locks)
//! - `windows`: fixed-width gap windows under a scene-length budget
//! - `knn`: pluggable vector index (forest, kd-tree, HNSW graph)
//! - `search`: duplicate-group assembly over the index
//! - `results`: YAML round trip of search results
//! - `maintenance`: purge, rename, fix-moved, whitelist, migrate
//! - `import`: per-file import pipeline with locking and stop signaling

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::Path;
use thiserror::Error;

pub mod brightness;
pub mod config;
pub mod extrema;
pub mod import;
pub mod knn;
pub mod maintenance;
pub mod results;
pub mod search;
pub mod source;
pub mod store;
pub mod windows;

pub use config::{ImportOptions, KnnBackendKind, SearchParams};
pub use import::StopToken;
pub use search::{MatchGroup, SceneMatch};
pub use store::Store;

/// Minimum spacing between reported extrema, in seconds. The local-maximum
/// window is `round(INDEX_DIST_SECS * fps)` frames to either side.
pub const INDEX_DIST_SECS: f64 = 10.0;

/// Per-file metadata as persisted in the store. `fid` is store-assigned and
/// never reused; `name` is an absolute path, unique among live rows.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FileInfo {
    pub fid: i64,
    pub name: String,
    pub fps: f64,
    pub duration: f64,
}

/// Error kinds that callers dispatch on. Everything else travels as a plain
/// `anyhow::Error`.
#[derive(Debug, Error)]
pub enum ScenedupError {
    #[error("source unreadable: {0}")]
    SourceUnreadable(String),
    #[error("source truncated after {frames} frames: {reason}")]
    SourceTruncated { frames: usize, reason: String },
    #[error("import lock already held for {0}")]
    AlreadyLocked(String),
    #[error("transient store error: {0}")]
    StoreTransient(String),
    #[error("fatal store error: {0}")]
    StoreFatal(String),
    #[error("unknown knn backend '{0}'")]
    UnknownBackend(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("interrupted")]
    Interrupted,
}

/// True when the path can actually be opened for reading, which is the test
/// purge and result reloading apply. Existence alone is not enough.
pub fn is_readable(path: &Path) -> bool {
    File::open(path).is_ok()
}

/// Render a scene offset as `HH:MM:SS` for `ffplay -ss`.
pub fn format_offset(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    format!(
        "{:02}:{:02}:{:02}",
        total / 3600,
        (total % 3600) / 60,
        total % 60
    )
}
