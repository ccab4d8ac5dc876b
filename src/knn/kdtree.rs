//! Exact kd-tree radius search.
//!
//! Splits on the axis with the largest spread, with the median item as the
//! node pivot. Queries prune a subtree only when the splitting plane is
//! farther away than the radius, so results are exact.

use super::l2_distance;

pub struct KdTreeIndex {
    items: Vec<Vec<f32>>,
    nodes: Vec<KdNode>,
    root: Option<u32>,
}

struct KdNode {
    axis: usize,
    item: u32,
    left: Option<u32>,
    right: Option<u32>,
}

impl KdTreeIndex {
    pub(crate) fn build(items: Vec<Vec<f32>>) -> Self {
        let mut nodes = Vec::with_capacity(items.len());
        let subset: Vec<u32> = (0..items.len() as u32).collect();
        let root = build_node(&items, subset, &mut nodes);
        Self { items, nodes, root }
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    pub(crate) fn items(&self) -> &[Vec<f32>] {
        &self.items
    }

    pub(crate) fn query(&self, n: usize, radius: f32) -> Vec<usize> {
        let query = &self.items[n];
        let mut hits = Vec::new();
        let mut stack = Vec::new();
        if let Some(root) = self.root {
            stack.push(root);
        }
        while let Some(node_idx) = stack.pop() {
            let node = &self.nodes[node_idx as usize];
            let point = &self.items[node.item as usize];
            if l2_distance(query, point) < radius {
                hits.push(node.item as usize);
            }
            let diff = query[node.axis] - point[node.axis];
            let (near, far) = if diff < 0.0 {
                (node.left, node.right)
            } else {
                (node.right, node.left)
            };
            if let Some(near) = near {
                stack.push(near);
            }
            if diff.abs() <= radius {
                if let Some(far) = far {
                    stack.push(far);
                }
            }
        }
        hits
    }
}

fn build_node(items: &[Vec<f32>], mut subset: Vec<u32>, nodes: &mut Vec<KdNode>) -> Option<u32> {
    if subset.is_empty() {
        return None;
    }

    let axis = widest_axis(items, &subset);
    subset.sort_by(|&a, &b| {
        items[a as usize][axis]
            .partial_cmp(&items[b as usize][axis])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let mid = subset.len() / 2;
    let item = subset[mid];
    let right_half = subset.split_off(mid + 1);
    subset.pop();

    let left = build_node(items, subset, nodes);
    let right = build_node(items, right_half, nodes);
    nodes.push(KdNode {
        axis,
        item,
        left,
        right,
    });
    Some(nodes.len() as u32 - 1)
}

fn widest_axis(items: &[Vec<f32>], subset: &[u32]) -> usize {
    let dim = items[subset[0] as usize].len();
    let mut best_axis = 0;
    let mut best_spread = -1.0f32;
    for axis in 0..dim {
        let mut lo = f32::INFINITY;
        let mut hi = f32::NEG_INFINITY;
        for &i in subset {
            let v = items[i as usize][axis];
            lo = lo.min(v);
            hi = hi.max(v);
        }
        let spread = hi - lo;
        if spread > best_spread {
            best_spread = spread;
            best_axis = axis;
        }
    }
    best_axis
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn radius_query_is_exact() {
        let items: Vec<Vec<f32>> = (0..100).map(|i| vec![i as f32, (i * 3 % 17) as f32]).collect();
        let index = KdTreeIndex::build(items.clone());

        for n in (0..100).step_by(7) {
            let mut brute: Vec<usize> = (0..items.len())
                .filter(|&m| l2_distance(&items[n], &items[m]) < 5.0)
                .collect();
            brute.sort_unstable();
            let mut hits = index.query(n, 5.0);
            hits.sort_unstable();
            assert_eq!(hits, brute, "query {}", n);
        }
    }

    #[test]
    fn empty_index_builds() {
        let index = KdTreeIndex::build(Vec::new());
        assert_eq!(index.len(), 0);
    }

    #[test]
    fn single_item_matches_itself() {
        let index = KdTreeIndex::build(vec![vec![1.0, 2.0]]);
        assert_eq!(index.query(0, 0.5), vec![0]);
    }
}
