//! Tile graph: one node per tile, undirected links carrying point matches.
//!
//! Nodes live in an index-addressed arena. Connecting `a` to `b` stores the
//! matches on `a` and the flipped matches on `b`, so every link has both
//! endpoints in the graph and each side sees its own points as `p1`.

use std::collections::BTreeSet;

use crate::core::{Model, PointMatch};
use crate::error::{Result, SolveError};

/// Matches from one tile to a neighbor.
#[derive(Debug, Clone)]
pub struct TileLink {
    /// Neighbor node index
    pub other: usize,
    /// `p1` local to the owning tile, `p2` local to `other`
    pub matches: Vec<PointMatch>,
}

/// A tile node.
#[derive(Debug, Clone)]
pub struct TileNode {
    /// Current transform from tile-local to world coordinates
    pub model: Model,
    /// Correspondence sets, one per `connect` call
    pub links: Vec<TileLink>,
    /// Never altered by optimization
    pub fixed: bool,
}

impl TileNode {
    /// Create an unconnected, free tile.
    pub fn new(model: Model) -> Self {
        Self {
            model,
            links: Vec::new(),
            fixed: false,
        }
    }

    /// Total number of matches over all links.
    pub fn match_count(&self) -> usize {
        self.links.iter().map(|l| l.matches.len()).sum()
    }
}

/// Graph of tiles and their correspondences.
#[derive(Debug, Clone, Default)]
pub struct TileGraph {
    nodes: Vec<TileNode>,
}

impl TileGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tile and return its node index.
    pub fn add_tile(&mut self, model: Model) -> usize {
        self.nodes.push(TileNode::new(model));
        self.nodes.len() - 1
    }

    /// Number of tiles.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Graph has no tiles.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node by index.
    pub fn node(&self, index: usize) -> Option<&TileNode> {
        self.nodes.get(index)
    }

    /// All nodes.
    pub fn nodes(&self) -> &[TileNode] {
        &self.nodes
    }

    /// Current model of a tile.
    ///
    /// # Panics
    /// If `index` is out of range.
    pub fn model(&self, index: usize) -> &Model {
        &self.nodes[index].model
    }

    /// Mutable model of a tile.
    ///
    /// # Panics
    /// If `index` is out of range.
    pub fn model_mut(&mut self, index: usize) -> &mut Model {
        &mut self.nodes[index].model
    }

    /// Replace the model of a tile.
    pub fn set_model(&mut self, index: usize, model: Model) -> Result<()> {
        let node = self
            .nodes
            .get_mut(index)
            .ok_or(SolveError::MissingCorrespondenceEndpoint(index))?;
        node.model = model;
        Ok(())
    }

    /// Apply `f` to every model (fixed tiles included).
    pub fn for_each_model_mut(&mut self, mut f: impl FnMut(usize, &mut Model)) {
        for (i, node) in self.nodes.iter_mut().enumerate() {
            f(i, &mut node.model);
        }
    }

    /// Apply `f` to the models of tiles that are not fixed.
    pub fn for_each_free_model_mut(&mut self, mut f: impl FnMut(usize, &mut Model)) {
        for (i, node) in self.nodes.iter_mut().enumerate() {
            if !node.fixed {
                f(i, &mut node.model);
            }
        }
    }

    /// Copy of all models, indexed like the nodes.
    pub fn snapshot_models(&self) -> Vec<Model> {
        self.nodes.iter().map(|n| n.model.clone()).collect()
    }

    /// Restore models from [`TileGraph::snapshot_models`].
    pub fn restore_models(&mut self, models: Vec<Model>) {
        for (node, model) in self.nodes.iter_mut().zip(models) {
            node.model = model;
        }
    }

    /// Mark a tile as fixed.
    pub fn fix_tile(&mut self, index: usize) -> Result<()> {
        let node = self
            .nodes
            .get_mut(index)
            .ok_or(SolveError::MissingCorrespondenceEndpoint(index))?;
        node.fixed = true;
        Ok(())
    }

    /// Is the tile fixed?
    pub fn is_fixed(&self, index: usize) -> bool {
        self.nodes.get(index).is_some_and(|n| n.fixed)
    }

    /// Indices of fixed tiles.
    pub fn fixed_tiles(&self) -> Vec<usize> {
        (0..self.nodes.len()).filter(|&i| self.nodes[i].fixed).collect()
    }

    /// Connect two tiles with a set of matches.
    ///
    /// Matches with non-positive weight are dropped. Repeated calls add
    /// independent links. Returns the number of matches stored; nothing is
    /// linked when that is zero or when `a == b`.
    pub fn connect(
        &mut self,
        a: usize,
        b: usize,
        matches: impl IntoIterator<Item = PointMatch>,
    ) -> Result<usize> {
        for endpoint in [a, b] {
            if endpoint >= self.nodes.len() {
                return Err(SolveError::MissingCorrespondenceEndpoint(endpoint));
            }
        }

        let kept: Vec<PointMatch> = matches
            .into_iter()
            .filter(PointMatch::is_informative)
            .collect();
        if kept.is_empty() || a == b {
            return Ok(0);
        }

        let flipped = kept.iter().map(PointMatch::flip).collect();
        let count = kept.len();
        self.nodes[a].links.push(TileLink {
            other: b,
            matches: kept,
        });
        self.nodes[b].links.push(TileLink {
            other: a,
            matches: flipped,
        });
        Ok(count)
    }

    /// Remove every link of a tile (and the mirrored links on its neighbors).
    pub fn clear_links(&mut self, index: usize) {
        let Some(node) = self.nodes.get_mut(index) else {
            return;
        };
        let neighbors: Vec<usize> = node.links.drain(..).map(|l| l.other).collect();
        for other in neighbors {
            self.nodes[other].links.retain(|l| l.other != index);
        }
    }

    /// Distinct neighbor indices of a tile.
    pub fn neighbors(&self, index: usize) -> BTreeSet<usize> {
        self.nodes
            .get(index)
            .map(|n| n.links.iter().map(|l| l.other).collect())
            .unwrap_or_default()
    }

    /// Distinct undirected neighbor pairs `(a, b)` with `a < b`.
    pub fn edge_pairs(&self) -> BTreeSet<(usize, usize)> {
        let mut pairs = BTreeSet::new();
        for (a, node) in self.nodes.iter().enumerate() {
            for link in &node.links {
                pairs.insert((a.min(link.other), a.max(link.other)));
            }
        }
        pairs
    }

    /// Matches for refitting tile `index`: own local `p1` against the
    /// neighbor's point mapped to world by the neighbor's current model.
    pub fn fit_matches(&self, index: usize) -> Vec<PointMatch> {
        self.fit_matches_filtered(index, |_| true)
    }

    /// Like [`TileGraph::fit_matches`], restricted to neighbors accepted by `keep`.
    pub fn fit_matches_filtered(
        &self,
        index: usize,
        keep: impl Fn(usize) -> bool,
    ) -> Vec<PointMatch> {
        let Some(node) = self.nodes.get(index) else {
            return Vec::new();
        };
        let mut out = Vec::with_capacity(node.match_count());
        for link in node.links.iter().filter(|l| keep(l.other)) {
            let other = &self.nodes[link.other].model;
            out.extend(
                link.matches
                    .iter()
                    .map(|m| PointMatch::new(m.p1, other.apply(&m.p2), m.weight)),
            );
        }
        out
    }

    /// Weighted mean world-space distance over all matches of a tile.
    ///
    /// `None` for tiles without matches.
    pub fn tile_error(&self, index: usize) -> Option<f64> {
        let node = self.nodes.get(index)?;
        let mut sum = 0.0;
        let mut weights = 0.0;
        for link in &node.links {
            let other = &self.nodes[link.other].model;
            for m in &link.matches {
                let d = node.model.apply(&m.p1).distance(&other.apply(&m.p2));
                sum += m.weight * d;
                weights += m.weight;
            }
        }
        (weights > 0.0).then(|| sum / weights)
    }

    /// Extract the tiles in `members` as a new graph.
    ///
    /// Links leaving the member set are dropped. Returns the graph and, for
    /// each new index, the index it had here.
    pub fn subgraph(&self, members: &[usize]) -> (TileGraph, Vec<usize>) {
        let mut local = vec![usize::MAX; self.nodes.len()];
        for (new_index, &old) in members.iter().enumerate() {
            local[old] = new_index;
        }

        let nodes = members
            .iter()
            .map(|&old| {
                let src = &self.nodes[old];
                TileNode {
                    model: src.model.clone(),
                    fixed: src.fixed,
                    links: src
                        .links
                        .iter()
                        .filter(|l| local[l.other] != usize::MAX)
                        .map(|l| TileLink {
                            other: local[l.other],
                            matches: l.matches.clone(),
                        })
                        .collect(),
                }
            })
            .collect();

        (TileGraph { nodes }, members.to_vec())
    }
}
