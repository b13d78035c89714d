//! Reconciling independently solved blocks into one global solve.
//!
//! ```text
//!  block A ──┐  shared tiles, sampled 5×5  ┌── block B
//!            └──────────▶ coarse graph ◀───┘
//!                   pre-align + optimize
//!                          │
//!                 correction per block
//!                          │
//!   final(tile) = Σ w_k · (model_k ∘ correction_k) / Σ w_k
//! ```
//!
//! A block's weight for a layer peaks in the middle of its range and decays
//! towards its edges, so layers near a block boundary follow the block that
//! sees them more centrally.

use std::collections::{BTreeMap, BTreeSet};
use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use crate::config::defaults;
use crate::core::{Affine2D, Model, ModelKind, PointMatch, footprint_grid};
use crate::error::{Result, SolveError};
use crate::graph::TileGraph;
use crate::optimizer::{OptimizerConfig, RelaxationOptimizer};
use crate::solve::{BlockId, SolveItem, TileGeometry, TileRecord};

/// Merge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeConfig {
    /// Grid density used to sample shared tiles
    #[serde(default = "defaults::samples_per_dimension")]
    pub samples_per_dimension: usize,

    /// Family of the per-block correction
    #[serde(default = "default_merge_model")]
    pub model: ModelKind,

    /// Coarse solve budget
    #[serde(default = "OptimizerConfig::merge")]
    pub optimizer: OptimizerConfig,
}

fn default_merge_model() -> ModelKind {
    ModelKind::Affine
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            samples_per_dimension: defaults::samples_per_dimension(),
            model: default_merge_model(),
            optimizer: OptimizerConfig::merge(),
        }
    }
}

/// A claimant of a tile: a solved block, or the identity stand-in used when
/// a layer has no overlap partner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockRef {
    /// Index into the merged items
    Real(usize),
    /// Identity model, zero weight
    Placeholder {
        /// Layer it stands in for
        z: i64,
    },
}

/// Tiles of one layer claimed by a block and its partner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerClaim {
    /// Layer
    pub z: i64,
    /// Claiming block
    pub a: usize,
    /// Partner block
    pub b: BlockRef,
    /// Tile ids claimed by both
    pub tiles: BTreeSet<String>,
}

/// Final per-tile transforms of a range.
#[derive(Debug, Clone, Default)]
pub struct GlobalSolve {
    /// Final transform per tile
    pub models: BTreeMap<String, Affine2D>,
    /// Geometry per tile
    pub geometry: BTreeMap<String, TileGeometry>,
    /// Tile ids per layer
    pub z_to_tiles: BTreeMap<i64, BTreeSet<String>>,
    /// Correction applied to each block
    pub corrections: Vec<(BlockId, Affine2D)>,
}

impl GlobalSolve {
    /// Layers present in the result.
    pub fn layers(&self) -> impl Iterator<Item = i64> + '_ {
        self.z_to_tiles.keys().copied()
    }

    /// Final transform of a tile.
    pub fn model(&self, tile_id: &str) -> Option<&Affine2D> {
        self.models.get(tile_id)
    }
}

/// Weight of `item` for layer `z`: `sin(π (z - min + 1) / (max - min + 2))`
/// inside the block, 0 outside.
pub fn layer_weight(item: &SolveItem, z: i64) -> f64 {
    if !item.contains_z(z) {
        return 0.0;
    }
    let offset = (z - item.min_z() + 1) as f64;
    let span = (item.max_z() - item.min_z() + 2) as f64;
    (PI * offset / span).sin()
}

/// Reconciles solved blocks.
#[derive(Debug, Clone, Default)]
pub struct GlobalMerger {
    config: MergeConfig,
    fixed_tiles: BTreeSet<String>,
}

impl GlobalMerger {
    /// Create a merger.
    pub fn new(config: MergeConfig) -> Self {
        Self {
            config,
            fixed_tiles: BTreeSet::new(),
        }
    }

    /// Blocks containing one of `tiles` keep an identity correction.
    pub fn with_fixed_tiles(mut self, tiles: BTreeSet<String>) -> Self {
        self.fixed_tiles = tiles;
        self
    }

    /// Configuration in use.
    pub fn config(&self) -> &MergeConfig {
        &self.config
    }

    /// Solve the coarse block graph and combine every tile's models.
    pub fn merge(&self, items: &[SolveItem]) -> Result<GlobalSolve> {
        if items.is_empty() {
            log::warn!("no solved blocks to merge");
            return Ok(GlobalSolve::default());
        }

        let (mut graph, claims) = self.coarse_graph(items)?;

        let mut optimizer = RelaxationOptimizer::new(self.config.optimizer.clone());
        match optimizer.pre_align(&mut graph) {
            Ok(report) => log::info!(
                "merge: pre-aligned {} blocks, {}",
                report.aligned,
                report.errors
            ),
            Err(e) => log::warn!("merge: could not pre-align blocks: {}", e),
        }
        match optimizer.optimize(&mut graph) {
            Ok(result) => log::info!(
                "merge: {} iterations, {:?}, {}",
                result.iterations,
                result.termination_reason,
                result.final_error
            ),
            Err(e) => log::warn!("merge: could not optimize blocks: {}", e),
        }

        let corrections: Vec<Affine2D> =
            (0..items.len()).map(|i| graph.model(i).affine()).collect();
        for (item, correction) in items.iter().zip(&corrections) {
            log::info!("block {}: correction {}", item.id(), correction);
        }

        self.combine(items, &claims, &corrections)
    }

    /// Layer claims between overlapping blocks, with placeholders for the
    /// tiles no other block shares.
    pub fn claims(&self, items: &[SolveItem]) -> Vec<LayerClaim> {
        let mut claims = Vec::new();
        for (a, item_a) in items.iter().enumerate() {
            for z in item_a.layers() {
                let mut unshared: BTreeSet<&str> = item_a.tile_ids_at(z).into_iter().collect();

                for (b, item_b) in items.iter().enumerate() {
                    if a == b || !item_b.contains_z(z) {
                        continue;
                    }
                    let ids_b: BTreeSet<&str> = item_b.tile_ids_at(z).into_iter().collect();
                    let common: BTreeSet<String> = item_a
                        .tile_ids_at(z)
                        .into_iter()
                        .filter(|id| ids_b.contains(id))
                        .map(str::to_string)
                        .collect();
                    if common.is_empty() {
                        continue;
                    }
                    for id in &common {
                        unshared.remove(id.as_str());
                    }
                    if a < b {
                        claims.push(LayerClaim {
                            z,
                            a,
                            b: BlockRef::Real(b),
                            tiles: common,
                        });
                    }
                }

                if !unshared.is_empty() {
                    claims.push(LayerClaim {
                        z,
                        a,
                        b: BlockRef::Placeholder { z },
                        tiles: unshared.into_iter().map(str::to_string).collect(),
                    });
                }
            }
        }
        claims.sort_by(|x, y| x.z.cmp(&y.z).then(x.a.cmp(&y.a)));
        claims
    }

    /// Items holding a fixed tile, or the first item when none does.
    pub fn anchored_items(&self, items: &[SolveItem]) -> Vec<usize> {
        let anchored: Vec<usize> = items
            .iter()
            .enumerate()
            .filter(|(_, item)| self.fixed_tiles.iter().any(|id| item.tile(id).is_some()))
            .map(|(i, _)| i)
            .collect();
        if anchored.is_empty() && !items.is_empty() {
            log::debug!("merge: no block holds a fixed tile, anchoring {}", items[0].id());
            return vec![0];
        }
        anchored
    }

    /// One node per item; shared tiles become sampled correspondences.
    ///
    /// Nodes of [`GlobalMerger::anchored_items`] are fixed.
    fn coarse_graph(&self, items: &[SolveItem]) -> Result<(TileGraph, Vec<LayerClaim>)> {
        let mut graph = TileGraph::new();
        for _ in items {
            graph.add_tile(Model::identity(self.config.model));
        }
        for i in self.anchored_items(items) {
            graph.fix_tile(i)?;
        }

        let claims = self.claims(items);
        for claim in &claims {
            let BlockRef::Real(b) = claim.b else {
                continue;
            };
            let (item_a, item_b) = (&items[claim.a], &items[b]);
            let mut matches = Vec::new();
            for id in &claim.tiles {
                let (record, model_a, model_b) = (
                    tile_record(item_a, id)?,
                    solved_model(item_a, id)?,
                    solved_model(item_b, id)?,
                );
                let g = record.geometry;
                matches.extend(
                    footprint_grid(g.width, g.height, self.config.samples_per_dimension)
                        .iter()
                        .map(|p| PointMatch::unweighted(model_a.apply(p), model_b.apply(p))),
                );
            }
            log::debug!(
                "merge: z={} blocks {} and {} share {} tiles",
                claim.z,
                item_a.id(),
                item_b.id(),
                claim.tiles.len()
            );
            graph.connect(claim.a, b, matches)?;
        }
        Ok((graph, claims))
    }

    /// Final models: every claimant's model followed by its correction,
    /// blended by normalized layer weights.
    pub fn combine(
        &self,
        items: &[SolveItem],
        claims: &[LayerClaim],
        corrections: &[Affine2D],
    ) -> Result<GlobalSolve> {
        if corrections.len() != items.len() {
            return Err(SolveError::InvariantViolation(format!(
                "{} corrections for {} blocks",
                corrections.len(),
                items.len()
            )));
        }

        let mut claimants: BTreeMap<&str, (i64, Vec<BlockRef>)> = BTreeMap::new();
        for claim in claims {
            for id in &claim.tiles {
                let entry = claimants
                    .entry(id.as_str())
                    .or_insert_with(|| (claim.z, Vec::new()));
                for r in [BlockRef::Real(claim.a), claim.b] {
                    if !entry.1.contains(&r) {
                        entry.1.push(r);
                    }
                }
            }
        }

        let mut solve = GlobalSolve {
            corrections: items
                .iter()
                .map(SolveItem::id)
                .zip(corrections.iter().copied())
                .collect(),
            ..GlobalSolve::default()
        };

        for (id, (z, refs)) in claimants {
            let mut blended: Option<(Affine2D, f64)> = None;
            let mut geometry = None;

            for r in &refs {
                let (model, weight) = match *r {
                    BlockRef::Real(i) => {
                        let item = &items[i];
                        geometry.get_or_insert(tile_record(item, id)?.geometry);
                        let corrected = solved_model(item, id)?.pre_concatenate(&corrections[i]);
                        (corrected, layer_weight(item, z))
                    }
                    BlockRef::Placeholder { .. } => (Affine2D::identity(), 0.0),
                };
                if weight <= 0.0 {
                    continue;
                }
                blended = Some(match blended {
                    None => (model, weight),
                    Some((acc, total)) => {
                        (acc.interpolate(&model, weight / (total + weight)), total + weight)
                    }
                });
            }

            let Some((model, _)) = blended else {
                return Err(SolveError::InvariantViolation(format!(
                    "tile {id} at z={z}: every claiming block has weight 0"
                )));
            };
            let Some(geometry) = geometry else {
                return Err(SolveError::InvariantViolation(format!(
                    "tile {id} at z={z} has no real claimant"
                )));
            };

            log::debug!("z={} tile {} final model {}", z, id, model);
            solve.models.insert(id.to_string(), model);
            solve.geometry.insert(id.to_string(), geometry);
            solve.z_to_tiles.entry(z).or_default().insert(id.to_string());
        }

        Ok(solve)
    }
}

fn tile_record<'a>(item: &'a SolveItem, id: &str) -> Result<&'a TileRecord> {
    item.tile(id).ok_or_else(|| {
        SolveError::InvariantViolation(format!("block {}: tile {} not found", item.id(), id))
    })
}

fn solved_model(item: &SolveItem, id: &str) -> Result<Affine2D> {
    item.new_model(id).map(Model::affine).ok_or_else(|| {
        SolveError::InvariantViolation(format!("block {}: tile {} is not solved", item.id(), id))
    })
}
