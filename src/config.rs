use std::str::FromStr;
use std::time::Duration;

use anyhow::Result;

use crate::ScenedupError;

pub const DEFAULT_DB_PATH: &str = "scenedup.db";
pub const DEFAULT_INDEX_LENGTH: usize = 10;
pub const DEFAULT_SCENE_LENGTH_SECS: f32 = 300.0;
pub const DEFAULT_RADIUS: f32 = 3.0;
pub const DEFAULT_STEP: usize = 1;
pub const DEFAULT_KNN_BACKEND: &str = "forest";
pub const DEFAULT_VIDEO_EXTENSIONS: &str = "mp4,mkv,avi,ts,asf,wmv";
pub const DEFAULT_NICE_LEVEL: i32 = 5;
pub const DEFAULT_LOCK_TTL_SECS: u64 = 3600;

/// Directory entries modified more recently than this are assumed to still
/// be downloading and are skipped by the importer.
pub const FRESH_FILE_GUARD_SECS: u64 = 36;

/// Containers reporting no duration, or one above this cap, are candidates
/// for the remux repair pass.
pub const REPAIR_DURATION_CAP_SECS: f64 = 3.0 * 3600.0;

/// Vector index implementation selected via `--knnlib`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KnnBackendKind {
    Forest,
    KdTree,
    Graph,
}

impl KnnBackendKind {
    pub fn name(&self) -> &'static str {
        match self {
            KnnBackendKind::Forest => "forest",
            KnnBackendKind::KdTree => "kdtree",
            KnnBackendKind::Graph => "graph",
        }
    }
}

impl FromStr for KnnBackendKind {
    type Err = ScenedupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "forest" => Ok(KnnBackendKind::Forest),
            "kdtree" => Ok(KnnBackendKind::KdTree),
            "graph" => Ok(KnnBackendKind::Graph),
            other => Err(ScenedupError::UnknownBackend(other.to_string())),
        }
    }
}

/// Knobs for the window builder and search driver.
#[derive(Clone, Debug)]
pub struct SearchParams {
    /// Window dimension `L`.
    pub index_length: usize,
    /// Per-window time budget in seconds; gaps past it are zeroed.
    pub scene_length: f32,
    /// L2 distance cutoff for neighbor hits.
    pub radius: f32,
    /// Query stride over window indices.
    pub step: usize,
    /// Seconds trimmed from the start of each file's considered region.
    pub ignore_start: f64,
    /// Seconds trimmed from the end of each file's considered region.
    pub ignore_end: f64,
    /// Mean-normalize each window to 128 before indexing.
    pub fix_speed: bool,
    pub backend: KnnBackendKind,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            index_length: DEFAULT_INDEX_LENGTH,
            scene_length: DEFAULT_SCENE_LENGTH_SECS,
            radius: DEFAULT_RADIUS,
            step: DEFAULT_STEP,
            ignore_start: 0.0,
            ignore_end: 0.0,
            fix_speed: false,
            backend: KnnBackendKind::Forest,
        }
    }
}

impl SearchParams {
    pub fn validate(&self) -> Result<()> {
        if self.index_length == 0 {
            return Err(ScenedupError::InvalidInput("indexlength must be >= 1".into()).into());
        }
        if self.step == 0 {
            return Err(ScenedupError::InvalidInput("step must be >= 1".into()).into());
        }
        if !(self.radius > 0.0) {
            return Err(ScenedupError::InvalidInput("radius must be > 0".into()).into());
        }
        if !(self.scene_length > 0.0) {
            return Err(ScenedupError::InvalidInput("scenelength must be > 0".into()).into());
        }
        if self.ignore_start < 0.0 || self.ignore_end < 0.0 {
            return Err(
                ScenedupError::InvalidInput("ignore bounds must be >= 0".into()).into(),
            );
        }
        Ok(())
    }
}

/// Knobs for the import coordinator.
#[derive(Clone, Debug)]
pub struct ImportOptions {
    /// Re-import paths already known to the store, preserving whitelists.
    pub refresh: bool,
    /// Remux-and-retry containers with missing or implausible durations.
    pub repair: bool,
    /// Lowercased extensions considered during directory enumeration.
    pub extensions: Vec<String>,
    pub lock_ttl: Duration,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            refresh: false,
            repair: false,
            extensions: parse_extensions(DEFAULT_VIDEO_EXTENSIONS),
            lock_ttl: Duration::from_secs(DEFAULT_LOCK_TTL_SECS),
        }
    }
}

/// Split a `--vidext` style comma list into lowercased extensions.
pub fn parse_extensions(list: &str) -> Vec<String> {
    list.split(',')
        .map(|ext| ext.trim().trim_start_matches('.').to_lowercase())
        .filter(|ext| !ext.is_empty())
        .collect()
}
