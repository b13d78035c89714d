//! Connected components and cycle detection over a [`TileGraph`].

use std::collections::BTreeMap;

use super::tile_graph::TileGraph;

/// Disjoint-set forest with path halving and union by size.
struct UnionFind {
    parent: Vec<usize>,
    size: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            size: vec![1; n],
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        let (big, small) = if self.size[ra] >= self.size[rb] {
            (ra, rb)
        } else {
            (rb, ra)
        };
        self.parent[small] = big;
        self.size[big] += self.size[small];
    }
}

/// Partition the graph into connected components.
///
/// Every tile is in exactly one component. Members are sorted ascending and
/// components are ordered by their smallest member. Components made only
/// of fixed tiles are returned like any other.
pub fn identify_connected_components(graph: &TileGraph) -> Vec<Vec<usize>> {
    let mut uf = UnionFind::new(graph.len());
    for (a, node) in graph.nodes().iter().enumerate() {
        for link in &node.links {
            uf.union(a, link.other);
        }
    }

    let mut by_root: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for i in 0..graph.len() {
        let root = uf.find(i);
        by_root.entry(root).or_default().push(i);
    }

    let mut components: Vec<Vec<usize>> = by_root.into_values().collect();
    components.sort_by_key(|c| c[0]);
    components
}

/// A connected component is cyclic iff it has at least as many distinct
/// neighbor pairs as nodes.
pub fn is_cyclic(graph: &TileGraph, component: &[usize]) -> bool {
    let mut in_component = vec![false; graph.len()];
    for &i in component {
        in_component[i] = true;
    }
    let pairs = graph
        .edge_pairs()
        .into_iter()
        .filter(|&(a, b)| in_component[a] && in_component[b])
        .count();
    pairs >= component.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Model, ModelKind, Point2D, PointMatch};

    fn graph(n: usize, edges: &[(usize, usize)]) -> TileGraph {
        let mut g = TileGraph::new();
        for _ in 0..n {
            g.add_tile(Model::identity(ModelKind::Translation));
        }
        let m = PointMatch::unweighted(Point2D::default(), Point2D::default());
        for &(a, b) in edges {
            g.connect(a, b, [m]).unwrap();
        }
        g
    }

    #[test]
    fn test_components() {
        let g = graph(6, &[(0, 1), (1, 2), (4, 5)]);
        let c = identify_connected_components(&g);
        assert_eq!(c, vec![vec![0, 1, 2], vec![3], vec![4, 5]]);
    }

    #[test]
    fn test_empty_graph() {
        assert!(identify_connected_components(&TileGraph::new()).is_empty());
    }

    #[test]
    fn test_cycle_detection() {
        let chain = graph(3, &[(0, 1), (1, 2)]);
        assert!(!is_cyclic(&chain, &[0, 1, 2]));

        let triangle = graph(3, &[(0, 1), (1, 2), (2, 0)]);
        assert!(is_cyclic(&triangle, &[0, 1, 2]));

        // duplicate links between the same pair do not form a cycle
        let doubled = graph(2, &[(0, 1), (0, 1)]);
        assert!(!is_cyclic(&doubled, &[0, 1]));
    }
}
