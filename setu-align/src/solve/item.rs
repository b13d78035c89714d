//! Block state: tiles, correspondences and the graph being solved.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use super::source::TileGeometry;
use crate::core::{Model, PointMatch};
use crate::error::{Result, SolveError};
use crate::graph::TileGraph;

/// Identifier of a block, and of the part it became after splitting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockId {
    /// Index in the solve set
    pub block: usize,
    /// Connected part of the block (0 when unsplit)
    pub part: usize,
}

impl BlockId {
    /// Unsplit block.
    pub fn new(block: usize) -> Self {
        Self { block, part: 0 }
    }

    /// Same block, another part.
    pub fn with_part(self, part: usize) -> Self {
        Self { part, ..self }
    }
}

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.block, self.part)
    }
}

/// Per-tile state inside a block.
#[derive(Debug, Clone)]
pub struct TileRecord {
    /// Tile id
    pub tile_id: String,
    /// Footprint and layer
    pub geometry: TileGeometry,
    /// Block model fitted to the seed transform
    pub seed_model: Model,
    /// Transform from section stitching
    pub stitching_model: Option<Model>,
    /// Solved transform
    pub new_model: Option<Model>,
    /// Group index when stitched
    pub group: Option<usize>,
    /// Graph node when not stitched
    pub node: Option<usize>,
}

impl TileRecord {
    /// Layer of the tile.
    pub fn z(&self) -> i64 {
        self.geometry.z
    }
}

/// Stitched cluster of same-layer tiles, solved as one graph node.
#[derive(Debug, Clone)]
pub struct GroupedTile {
    /// Tile indices of the members
    pub members: Vec<usize>,
    /// Layer of the members
    pub z: i64,
    /// Graph node
    pub node: usize,
}

/// Tile-level correspondence kept for stitching and splitting.
#[derive(Debug, Clone)]
pub struct TilePair {
    /// First tile index
    pub a: usize,
    /// Second tile index
    pub b: usize,
    /// `p1` local to `a`, `p2` local to `b`
    pub matches: Vec<PointMatch>,
}

/// Progress of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemState {
    /// Tiles and correspondences loaded
    Assembled,
    /// Graph built (grouped or per tile)
    GraphBuilt,
    /// Models extracted; read-only from here on
    Solved,
}

/// What a graph node stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NodeOwner {
    Tile(usize),
    Group(usize),
}

/// One block: a closed layer range and everything solved inside it.
#[derive(Debug, Clone)]
pub struct SolveItem {
    id: BlockId,
    min_z: i64,
    max_z: i64,
    tiles: Vec<TileRecord>,
    index: HashMap<String, usize>,
    pairs: Vec<TilePair>,
    graph: TileGraph,
    owners: Vec<NodeOwner>,
    groups: Vec<GroupedTile>,
    z_to_tiles: BTreeMap<i64, BTreeSet<usize>>,
    z_to_lambda: BTreeMap<i64, f64>,
    state: ItemState,
}

impl SolveItem {
    /// Empty block over `[min_z, max_z]`.
    pub fn new(id: BlockId, min_z: i64, max_z: i64) -> Self {
        Self {
            id,
            min_z,
            max_z,
            tiles: Vec::new(),
            index: HashMap::new(),
            pairs: Vec::new(),
            graph: TileGraph::new(),
            owners: Vec::new(),
            groups: Vec::new(),
            z_to_tiles: BTreeMap::new(),
            z_to_lambda: BTreeMap::new(),
            state: ItemState::Assembled,
        }
    }

    /// Block id.
    pub fn id(&self) -> BlockId {
        self.id
    }

    /// First layer.
    pub fn min_z(&self) -> i64 {
        self.min_z
    }

    /// Last layer.
    pub fn max_z(&self) -> i64 {
        self.max_z
    }

    /// Layer is inside `[min_z, max_z]`.
    pub fn contains_z(&self, z: i64) -> bool {
        (self.min_z..=self.max_z).contains(&z)
    }

    /// Progress.
    pub fn state(&self) -> ItemState {
        self.state
    }

    /// Section stitching was applied.
    pub fn is_stitched(&self) -> bool {
        !self.groups.is_empty()
    }

    /// All tile records.
    pub fn tiles(&self) -> &[TileRecord] {
        &self.tiles
    }

    /// Tile record by id.
    pub fn tile(&self, tile_id: &str) -> Option<&TileRecord> {
        self.index.get(tile_id).map(|&i| &self.tiles[i])
    }

    /// Tile index by id.
    pub fn tile_index(&self, tile_id: &str) -> Option<usize> {
        self.index.get(tile_id).copied()
    }

    /// Tile-level correspondences.
    pub fn pairs(&self) -> &[TilePair] {
        &self.pairs
    }

    /// Graph being solved.
    pub fn graph(&self) -> &TileGraph {
        &self.graph
    }

    /// Stitched groups (empty when not stitched).
    pub fn groups(&self) -> &[GroupedTile] {
        &self.groups
    }

    /// Layers that have tiles, ascending.
    pub fn layers(&self) -> impl Iterator<Item = i64> + '_ {
        self.z_to_tiles.keys().copied()
    }

    /// Tile ids of a layer, sorted.
    pub fn tile_ids_at(&self, z: i64) -> Vec<&str> {
        let mut ids: Vec<&str> = self
            .z_to_tiles
            .get(&z)
            .map(|set| set.iter().map(|&i| self.tiles[i].tile_id.as_str()).collect())
            .unwrap_or_default();
        ids.sort_unstable();
        ids
    }

    /// Tile indices of a layer.
    pub fn tile_indices_at(&self, z: i64) -> impl Iterator<Item = usize> + '_ {
        self.z_to_tiles.get(&z).into_iter().flatten().copied()
    }

    /// Regularization lambda recorded for a layer.
    pub fn lambda(&self, z: i64) -> Option<f64> {
        self.z_to_lambda.get(&z).copied()
    }

    /// All per-layer lambdas.
    pub fn lambdas(&self) -> &BTreeMap<i64, f64> {
        &self.z_to_lambda
    }

    /// Solved transform of a tile.
    pub fn new_model(&self, tile_id: &str) -> Option<&Model> {
        self.tile(tile_id).and_then(|t| t.new_model.as_ref())
    }

    // ------------------------------------------------------------------
    // Mutation (only while the block is being solved)
    // ------------------------------------------------------------------

    /// Add a tile record unless present; returns its index.
    pub(crate) fn insert_tile(
        &mut self,
        tile_id: &str,
        geometry: TileGeometry,
        seed_model: Model,
        default_lambda: f64,
    ) -> usize {
        if let Some(&i) = self.index.get(tile_id) {
            return i;
        }
        let i = self.tiles.len();
        self.tiles.push(TileRecord {
            tile_id: tile_id.to_string(),
            geometry,
            seed_model,
            stitching_model: None,
            new_model: None,
            group: None,
            node: None,
        });
        self.index.insert(tile_id.to_string(), i);
        self.z_to_tiles.entry(geometry.z).or_default().insert(i);
        self.z_to_lambda.entry(geometry.z).or_insert(default_lambda);
        i
    }

    pub(crate) fn push_pair(&mut self, a: usize, b: usize, matches: Vec<PointMatch>) {
        self.pairs.push(TilePair { a, b, matches });
    }

    pub(crate) fn tiles_mut(&mut self) -> &mut [TileRecord] {
        &mut self.tiles
    }

    pub(crate) fn graph_mut(&mut self) -> &mut TileGraph {
        &mut self.graph
    }

    /// One graph node per tile, seeded with the tile's seed model.
    pub(crate) fn build_tile_graph(&mut self) -> Result<()> {
        let mut graph = TileGraph::new();
        let mut owners = Vec::with_capacity(self.tiles.len());
        for (i, tile) in self.tiles.iter_mut().enumerate() {
            tile.node = Some(graph.add_tile(tile.seed_model.clone()));
            owners.push(NodeOwner::Tile(i));
        }
        for pair in &self.pairs {
            graph.connect(pair.a, pair.b, pair.matches.iter().copied())?;
        }
        self.graph = graph;
        self.owners = owners;
        self.groups.clear();
        self.state = ItemState::GraphBuilt;
        Ok(())
    }

    /// Install stitched groups and the graph over them.
    ///
    /// Group `i` must be graph node `i`.
    pub(crate) fn install_groups(&mut self, groups: Vec<GroupedTile>, graph: TileGraph) -> Result<()> {
        if groups.len() != graph.len() || groups.iter().enumerate().any(|(i, g)| g.node != i) {
            return Err(SolveError::InvariantViolation(format!(
                "block {}: {} groups do not match {} graph nodes",
                self.id,
                groups.len(),
                graph.len()
            )));
        }
        for (gi, group) in groups.iter().enumerate() {
            for &t in &group.members {
                self.tiles[t].group = Some(gi);
                self.tiles[t].node = None;
            }
        }
        self.owners = (0..groups.len()).map(NodeOwner::Group).collect();
        self.groups = groups;
        self.graph = graph;
        self.state = ItemState::GraphBuilt;
        Ok(())
    }

    /// Tile indices represented by a graph node.
    pub(crate) fn node_tiles(&self, node: usize) -> Vec<usize> {
        match self.owners.get(node) {
            Some(NodeOwner::Tile(t)) => vec![*t],
            Some(NodeOwner::Group(g)) => self
                .groups
                .get(*g)
                .map(|g| g.members.clone())
                .unwrap_or_default(),
            None => Vec::new(),
        }
    }

    /// Graph node solving a tile.
    pub fn node_of(&self, tile: usize) -> Option<usize> {
        let record = self.tiles.get(tile)?;
        match record.group {
            Some(g) => self.groups.get(g).map(|g| g.node),
            None => record.node,
        }
    }

    /// Copy of this block restricted to the graph nodes in `component`.
    ///
    /// Tiles, groups and correspondences are re-indexed, and the layer range
    /// shrinks to the layers that still have tiles.
    pub(crate) fn extract(&self, id: BlockId, component: &[usize]) -> Result<SolveItem> {
        let (graph, _) = self.graph.subgraph(component);

        let mut tile_map: HashMap<usize, usize> = HashMap::new();
        let mut child = SolveItem::new(id, self.min_z, self.max_z);
        let mut owners = Vec::with_capacity(component.len());

        for (new_node, &old_node) in component.iter().enumerate() {
            let members = self.node_tiles(old_node);
            let mut new_members = Vec::with_capacity(members.len());
            for old_tile in members {
                let record = &self.tiles[old_tile];
                let new_tile = child.tiles.len();
                let mut copy = record.clone();
                copy.node = record.node.map(|_| new_node);
                copy.group = None;
                child.index.insert(copy.tile_id.clone(), new_tile);
                child
                    .z_to_tiles
                    .entry(copy.geometry.z)
                    .or_default()
                    .insert(new_tile);
                if let Some(&lambda) = self.z_to_lambda.get(&copy.geometry.z) {
                    child.z_to_lambda.insert(copy.geometry.z, lambda);
                }
                child.tiles.push(copy);
                tile_map.insert(old_tile, new_tile);
                new_members.push(new_tile);
            }

            match self.owners.get(old_node) {
                Some(NodeOwner::Group(g)) => {
                    let gi = child.groups.len();
                    for &t in &new_members {
                        child.tiles[t].group = Some(gi);
                    }
                    child.groups.push(GroupedTile {
                        members: new_members,
                        z: self.groups[*g].z,
                        node: new_node,
                    });
                    owners.push(NodeOwner::Group(gi));
                }
                Some(NodeOwner::Tile(_)) => {
                    let t = new_members.first().copied().ok_or_else(|| {
                        SolveError::InvariantViolation(format!(
                            "block {}: node {} has no tile",
                            self.id, old_node
                        ))
                    })?;
                    owners.push(NodeOwner::Tile(t));
                }
                None => {
                    return Err(SolveError::InvariantViolation(format!(
                        "block {}: node {} has no owner",
                        self.id, old_node
                    )));
                }
            }
        }

        for pair in &self.pairs {
            if let (Some(&a), Some(&b)) = (tile_map.get(&pair.a), tile_map.get(&pair.b)) {
                child.pairs.push(TilePair {
                    a,
                    b,
                    matches: pair.matches.clone(),
                });
            }
        }

        if let (Some(&lo), Some(&hi)) = (
            child.z_to_tiles.keys().next(),
            child.z_to_tiles.keys().next_back(),
        ) {
            child.min_z = lo;
            child.max_z = hi;
        }
        child.graph = graph;
        child.owners = owners;
        child.state = self.state;
        Ok(child)
    }

    pub(crate) fn set_lambdas(&mut self, lambdas: BTreeMap<i64, f64>) {
        for (z, lambda) in lambdas {
            self.z_to_lambda.insert(z, lambda);
        }
    }

    pub(crate) fn mark_solved(&mut self) {
        self.state = ItemState::Solved;
    }
}
