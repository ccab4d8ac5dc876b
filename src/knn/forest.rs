//! Random-hyperplane tree ensemble.
//!
//! Each tree recursively partitions the items by a hyperplane through the
//! midpoint of two randomly chosen members, stopping at small leaves. A
//! query descends every tree to one leaf, unions the leaf members, and
//! exact-filters them by true L2 distance. Trees are seeded by their ordinal
//! so the ensemble is deterministic.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_pcg::Pcg64;
use rayon::prelude::*;

use super::l2_distance;

const TREE_COUNT: usize = 20;
const LEAF_SIZE: usize = 16;

pub struct ForestIndex {
    items: Vec<Vec<f32>>,
    trees: Vec<Tree>,
}

struct Tree {
    nodes: Vec<Node>,
    root: u32,
}

enum Node {
    Leaf(Vec<u32>),
    Split {
        normal: Vec<f32>,
        threshold: f32,
        left: u32,
        right: u32,
    },
}

impl ForestIndex {
    pub(crate) fn build(items: Vec<Vec<f32>>) -> Self {
        let trees = if items.is_empty() {
            Vec::new()
        } else {
            (0..TREE_COUNT)
                .into_par_iter()
                .map(|ordinal| build_tree(&items, ordinal as u64))
                .collect()
        };
        Self { items, trees }
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    pub(crate) fn items(&self) -> &[Vec<f32>] {
        &self.items
    }

    pub(crate) fn query(&self, n: usize, radius: f32) -> Vec<usize> {
        let query = &self.items[n];
        let mut candidates: Vec<u32> = Vec::new();
        for tree in &self.trees {
            let mut node = tree.root;
            loop {
                match &tree.nodes[node as usize] {
                    Node::Leaf(members) => {
                        candidates.extend_from_slice(members);
                        break;
                    }
                    Node::Split {
                        normal,
                        threshold,
                        left,
                        right,
                    } => {
                        node = if dot(query, normal) < *threshold {
                            *left
                        } else {
                            *right
                        };
                    }
                }
            }
        }
        candidates.sort_unstable();
        candidates.dedup();
        candidates
            .into_iter()
            .map(|m| m as usize)
            .filter(|&m| l2_distance(query, &self.items[m]) < radius)
            .collect()
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

fn build_tree(items: &[Vec<f32>], ordinal: u64) -> Tree {
    let mut rng = Pcg64::seed_from_u64(0x5ced_u64.wrapping_add(ordinal));
    let mut nodes = Vec::new();
    let subset: Vec<u32> = (0..items.len() as u32).collect();
    let root = build_node(items, subset, &mut rng, &mut nodes);
    Tree { nodes, root }
}

fn build_node(items: &[Vec<f32>], subset: Vec<u32>, rng: &mut Pcg64, nodes: &mut Vec<Node>) -> u32 {
    if subset.len() <= LEAF_SIZE {
        nodes.push(Node::Leaf(subset));
        return nodes.len() as u32 - 1;
    }

    // Hyperplane through the midpoint of two random members; fall back to a
    // leaf when the sample is degenerate (all projections equal).
    let picks: Vec<u32> = subset.choose_multiple(rng, 2).copied().collect();
    let a = &items[picks[0] as usize];
    let b = &items[picks[1] as usize];
    let normal: Vec<f32> = a.iter().zip(b.iter()).map(|(x, y)| x - y).collect();
    let threshold = {
        let mid: Vec<f32> = a.iter().zip(b.iter()).map(|(x, y)| (x + y) / 2.0).collect();
        dot(&mid, &normal)
    };

    let mut left_set = Vec::new();
    let mut right_set = Vec::new();
    for &i in &subset {
        if dot(&items[i as usize], &normal) < threshold {
            left_set.push(i);
        } else {
            right_set.push(i);
        }
    }
    if left_set.is_empty() || right_set.is_empty() {
        nodes.push(Node::Leaf(subset));
        return nodes.len() as u32 - 1;
    }

    let left = build_node(items, left_set, rng, nodes);
    let right = build_node(items, right_set, rng, nodes);
    nodes.push(Node::Split {
        normal,
        threshold,
        left,
        right,
    });
    nodes.len() as u32 - 1
}
