//! The image graph: images are nodes, sufficiently confident verified pairs
//! are edges. Composition works on the biggest connected component, along a
//! maximum spanning tree rooted at its centre.

use crate::pair::VerifiedPair;
use pano_core::{Result, StitchError};
use std::collections::VecDeque;
use tracing::{info, warn};

struct DisjointSets {
    parent: Vec<usize>,
}

impl DisjointSets {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    /// Returns false when `a` and `b` were already joined.
    fn union(&mut self, a: usize, b: usize) -> bool {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return false;
        }
        // Lower root wins so that representatives are stable.
        let (lo, hi) = if ra < rb { (ra, rb) } else { (rb, ra) };
        self.parent[hi] = lo;
        true
    }
}

/// Connected components of an undirected graph on `0..num_nodes`. Each
/// component is sorted ascending; components are ordered by their lowest node.
pub fn connected_components(num_nodes: usize, edges: &[(usize, usize)]) -> Vec<Vec<usize>> {
    let mut sets = DisjointSets::new(num_nodes);
    for &(a, b) in edges {
        sets.union(a, b);
    }
    let mut by_root: Vec<Vec<usize>> = vec![Vec::new(); num_nodes];
    for node in 0..num_nodes {
        let root = sets.find(node);
        by_root[root].push(node);
    }
    by_root.into_iter().filter(|c| !c.is_empty()).collect()
}

/// Tree edge from an already placed `parent` to `child` through `pairs[pair]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeEdge {
    pub parent: usize,
    pub child: usize,
    pub pair: usize,
}

/// Kruskal over `candidates` (indices into `pairs`), heaviest inlier count
/// first, ties by pair index. Returns the chosen pair indices.
pub fn maximum_spanning_tree(num_nodes: usize, pairs: &[VerifiedPair], candidates: &[usize]) -> Vec<usize> {
    let mut order = candidates.to_vec();
    order.sort_by_key(|&p| (std::cmp::Reverse(pairs[p].num_inliers()), p));

    let mut sets = DisjointSets::new(num_nodes);
    order
        .into_iter()
        .filter(|&p| sets.union(pairs[p].src, pairs[p].dst))
        .collect()
}

fn adjacency(num_nodes: usize, pairs: &[VerifiedPair], tree: &[usize]) -> Vec<Vec<(usize, usize)>> {
    let mut adj = vec![Vec::new(); num_nodes];
    for &p in tree {
        adj[pairs[p].src].push((pairs[p].dst, p));
        adj[pairs[p].dst].push((pairs[p].src, p));
    }
    for list in &mut adj {
        list.sort_unstable();
    }
    adj
}

fn bfs(adj: &[Vec<(usize, usize)>], root: usize) -> (Vec<TreeEdge>, usize) {
    let mut depth = vec![usize::MAX; adj.len()];
    let mut queue = VecDeque::from([root]);
    let mut edges = Vec::new();
    let mut eccentricity = 0;
    depth[root] = 0;
    while let Some(u) = queue.pop_front() {
        eccentricity = eccentricity.max(depth[u]);
        for &(v, pair) in &adj[u] {
            if depth[v] == usize::MAX {
                depth[v] = depth[u] + 1;
                edges.push(TreeEdge {
                    parent: u,
                    child: v,
                    pair,
                });
                queue.push_back(v);
            }
        }
    }
    (edges, eccentricity)
}

/// Node of minimum eccentricity in the tree; ties go to the lowest index.
pub fn tree_center(nodes: &[usize], num_nodes: usize, pairs: &[VerifiedPair], tree: &[usize]) -> Option<usize> {
    let adj = adjacency(num_nodes, pairs, tree);
    nodes
        .iter()
        .map(|&n| (bfs(&adj, n).1, n))
        .min()
        .map(|(_, n)| n)
}

/// The component chosen for composition.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageGraph {
    /// Image indices of the component, ascending.
    pub nodes: Vec<usize>,
    /// Indices of every confident pair inside the component.
    pub edges: Vec<usize>,
    pub anchor: usize,
    /// Spanning tree in breadth-first order from the anchor.
    pub tree: Vec<TreeEdge>,
    /// Total number of components, isolated images included.
    pub num_components: usize,
}

impl ImageGraph {
    pub fn build(
        num_images: usize,
        pairs: &[VerifiedPair],
        confidence_threshold: f64,
        require_all_images: bool,
    ) -> Result<Self> {
        if let Some(bad) = pairs
            .iter()
            .find(|p| p.src >= num_images || p.dst >= num_images || p.src == p.dst)
        {
            return Err(StitchError::Unknown(format!(
                "pair ({}, {}) does not name two distinct images of {}",
                bad.src, bad.dst, num_images
            )));
        }

        let confident: Vec<usize> = (0..pairs.len())
            .filter(|&p| pairs[p].confidence >= confidence_threshold)
            .collect();
        if confident.is_empty() {
            return Err(StitchError::HomographyEstimationFailed(format!(
                "none of {} verified pairs reaches confidence {}",
                pairs.len(),
                confidence_threshold
            )));
        }

        let edge_list: Vec<(usize, usize)> = confident.iter().map(|&p| (pairs[p].src, pairs[p].dst)).collect();
        let components = connected_components(num_images, &edge_list);
        if components.len() > 1 {
            if require_all_images {
                return Err(StitchError::GraphDisconnected {
                    components: components.len(),
                });
            }
            warn!(components = components.len(), "image graph is disconnected, keeping the biggest component");
        }

        // Components are ordered by lowest node, so the first maximum wins ties.
        let mut best = &components[0];
        for c in &components[1..] {
            if c.len() > best.len() {
                best = c;
            }
        }
        let nodes = best.clone();
        if nodes.len() < 2 {
            return Err(StitchError::GraphDisconnected {
                components: components.len(),
            });
        }

        let edges: Vec<usize> = confident
            .into_iter()
            .filter(|&p| nodes.binary_search(&pairs[p].src).is_ok())
            .collect();
        let tree_pairs = maximum_spanning_tree(num_images, pairs, &edges);
        let anchor = tree_center(&nodes, num_images, pairs, &tree_pairs).unwrap_or(nodes[0]);
        let (tree, _) = bfs(&adjacency(num_images, pairs, &tree_pairs), anchor);

        info!(
            images = nodes.len(),
            of = num_images,
            edges = edges.len(),
            anchor,
            "image graph built"
        );

        Ok(Self {
            nodes,
            edges,
            anchor,
            tree,
            num_components: components.len(),
        })
    }

    pub fn contains(&self, image: usize) -> bool {
        self.nodes.binary_search(&image).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{Matrix3, Point2};
    use pano_features::Correspondence;

    fn pair(src: usize, dst: usize, inliers: usize) -> VerifiedPair {
        let corr = (0..inliers)
            .map(|i| Correspondence::new(Point2::new(i as f64, 0.0), Point2::new(i as f64, 0.0)))
            .collect();
        VerifiedPair::from_correspondences(src, dst, Matrix3::identity(), corr)
    }

    #[test]
    fn components_are_sorted() {
        let comps = connected_components(6, &[(4, 1), (2, 5), (5, 0)]);
        assert_eq!(comps, vec![vec![0, 2, 5], vec![1, 4], vec![3]]);
    }

    #[test]
    fn chain_anchor_is_middle() {
        let pairs = vec![pair(0, 1, 30), pair(1, 2, 30), pair(2, 3, 30), pair(3, 4, 30)];
        let graph = ImageGraph::build(5, &pairs, 1.0, true).unwrap();
        assert_eq!(graph.anchor, 2);
        assert_eq!(graph.tree.len(), 4);
        assert_eq!(graph.tree[0].parent, 2);
        assert!(graph.tree.iter().all(|e| pairs[e.pair].connects(e.child)));
    }

    #[test]
    fn spanning_tree_prefers_strong_edges() {
        let pairs = vec![pair(0, 1, 100), pair(1, 2, 20), pair(0, 2, 80)];
        let tree = maximum_spanning_tree(3, &pairs, &[0, 1, 2]);
        assert_eq!(tree, vec![0, 2]);
    }

    #[test]
    fn disconnected_graph_keeps_biggest_or_fails() {
        let pairs = vec![pair(0, 1, 30), pair(2, 3, 30), pair(3, 4, 30)];
        let graph = ImageGraph::build(5, &pairs, 1.0, false).unwrap();
        assert_eq!(graph.nodes, vec![2, 3, 4]);
        assert_eq!(graph.anchor, 3);
        assert_eq!(graph.edges, vec![1, 2]);
        assert_eq!(graph.num_components, 2);

        let err = ImageGraph::build(5, &pairs, 1.0, true).unwrap_err();
        assert_eq!(err, StitchError::GraphDisconnected { components: 2 });
    }

    #[test]
    fn weak_pairs_are_not_edges() {
        let pairs = vec![pair(0, 1, 3)];
        let err = ImageGraph::build(2, &pairs, 1.0, false).unwrap_err();
        assert!(matches!(err, StitchError::HomographyEstimationFailed(_)));
    }
}
