//! Vector index capability.
//!
//! A `VectorIndex` answers radius queries over the window vectors. The
//! backend is a closed set of variants dispatched by exhaustive match:
//!
//! - `forest`: random-hyperplane tree ensemble; approximate candidate
//!   generation with exact post-filtering
//! - `kdtree`: exact kd-tree radius search
//! - `graph`: HNSW; k-nearest retrieval filtered down to the radius
//!
//! Approximate recall is acceptable; the search driver applies its own final
//! filtering and grouping.

use anyhow::Result;

use crate::config::KnnBackendKind;
use crate::ScenedupError;

pub mod forest;
pub mod graph;
pub mod kdtree;

pub use forest::ForestIndex;
pub use graph::GraphIndex;
pub use kdtree::KdTreeIndex;

/// k requested from backends that only expose k-nearest-neighbor queries;
/// results beyond the radius are filtered out afterwards.
pub const KNN_CANDIDATES: usize = 20;

pub(crate) fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum::<f32>()
        .sqrt()
}

pub enum VectorIndex {
    Forest(ForestIndex),
    KdTree(KdTreeIndex),
    Graph(GraphIndex),
}

impl VectorIndex {
    /// Construct the selected backend over the window vectors.
    pub fn build(kind: KnnBackendKind, items: Vec<Vec<f32>>) -> Self {
        match kind {
            KnnBackendKind::Forest => VectorIndex::Forest(ForestIndex::build(items)),
            KnnBackendKind::KdTree => VectorIndex::KdTree(KdTreeIndex::build(items)),
            KnnBackendKind::Graph => VectorIndex::Graph(GraphIndex::build(items)),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            VectorIndex::Forest(index) => index.len(),
            VectorIndex::KdTree(index) => index.len(),
            VectorIndex::Graph(index) => index.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Indices of vectors within L2 `radius` of item `n`, ascending. Always
    /// contains `n` itself.
    pub fn query(&self, n: usize, radius: f32) -> Result<Vec<usize>> {
        if n >= self.len() {
            return Err(ScenedupError::InvalidInput(format!(
                "query index {} out of bounds ({} items)",
                n,
                self.len()
            ))
            .into());
        }
        let mut hits = match self {
            VectorIndex::Forest(index) => index.query(n, radius),
            VectorIndex::KdTree(index) => index.query(n, radius),
            VectorIndex::Graph(index) => index.query(n, radius),
        };
        if !hits.contains(&n) {
            hits.push(n);
        }
        hits.sort_unstable();
        hits.dedup();
        Ok(hits)
    }

    /// Read back a stored vector (diagnostics).
    pub fn row(&self, n: usize) -> Result<Vec<f32>> {
        let items = match self {
            VectorIndex::Forest(index) => index.items(),
            VectorIndex::KdTree(index) => index.items(),
            VectorIndex::Graph(index) => index.items(),
        };
        items.get(n).cloned().ok_or_else(|| {
            ScenedupError::InvalidInput(format!(
                "row index {} out of bounds ({} items)",
                n,
                items.len()
            ))
            .into()
        })
    }
}
