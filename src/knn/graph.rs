//! HNSW graph backend.
//!
//! High recall at scale; `ef_construction` 100 with moderate layer degrees.
//! The graph only answers k-nearest queries, so a radius query retrieves
//! `KNN_CANDIDATES` neighbors and exact-filters them. `space::Metric`
//! requires an unsigned distance unit, hence the fixed-point scaling of the
//! f32 L2 distance.

use hnsw::{Hnsw, Params, Searcher};
use rand_pcg::Pcg64;
use space::{Metric, Neighbor};

use super::{l2_distance, KNN_CANDIDATES};

const DISTANCE_SCALE: f32 = 100_000.0;
const EF_SEARCH: usize = 64;

#[derive(Clone, Copy, Debug, Default)]
struct Euclid;

impl Metric<Vec<f32>> for Euclid {
    type Unit = u32;

    fn distance(&self, a: &Vec<f32>, b: &Vec<f32>) -> u32 {
        (l2_distance(a, b) * DISTANCE_SCALE).min(u32::MAX as f32) as u32
    }
}

pub struct GraphIndex {
    graph: Hnsw<Euclid, Vec<f32>, Pcg64, 12, 24>,
    items: Vec<Vec<f32>>,
}

impl GraphIndex {
    pub(crate) fn build(items: Vec<Vec<f32>>) -> Self {
        let params = Params::new().ef_construction(100);
        let mut graph = Hnsw::new_params(Euclid, params);
        let mut searcher = Searcher::default();
        for item in &items {
            graph.insert(item.clone(), &mut searcher);
        }
        Self { graph, items }
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    pub(crate) fn items(&self) -> &[Vec<f32>] {
        &self.items
    }

    pub(crate) fn query(&self, n: usize, radius: f32) -> Vec<usize> {
        if self.items.len() <= 1 {
            return vec![n];
        }
        let query = &self.items[n];
        let mut searcher: Searcher<u32> = Searcher::default();
        let want = KNN_CANDIDATES.min(self.items.len());
        let ef = EF_SEARCH.max(want).min(self.items.len());
        let mut dest = vec![
            Neighbor {
                index: !0,
                distance: 0u32,
            };
            ef
        ];
        let found = self.graph.nearest(query, ef, &mut searcher, &mut dest);

        found
            .iter()
            .take(want)
            .map(|neighbor| neighbor.index)
            .filter(|&m| l2_distance(query, &self.items[m]) < radius)
            .collect()
    }
}
