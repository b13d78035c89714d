//! Solving one block: assemble, stitch, split, optimize, extract.
//!
//! ```text
//! CorrespondenceSource ─┐
//!                       ├─▶ assemble ─▶ build_graph ─▶ split ─▶ solve_item (per part)
//! TileGeometrySource ───┘               (stitch?)              pre-align + schedule
//!                                                              new models + lambdas
//! ```

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::item::{BlockId, SolveItem};
use super::lambda::{LambdaPolicy, LambdaPolicyConfig};
use super::source::{CorrespondenceSource, TileGeometry, TileGeometrySource};
use super::stitching::{SectionStitcher, StitchingConfig};
use crate::config::defaults;
use crate::core::{Affine2D, Model, ModelKind, PointMatch};
use crate::error::{Result, SolveError};
use crate::graph::identify_connected_components;
use crate::optimizer::{
    OptimizerConfig, RelaxationOptimizer, Schedule, ScheduleReport, compute_errors,
};

/// Shape of the regularized block model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BlockModelConfig {
    /// Least constrained family
    pub base: ModelKind,
    /// Blended in with `lambda_rigid`
    pub first_regularizer: ModelKind,
    /// Blended in with `lambda_translation`
    pub second_regularizer: ModelKind,
}

impl Default for BlockModelConfig {
    fn default() -> Self {
        Self {
            base: ModelKind::Affine,
            first_regularizer: ModelKind::Rigid,
            second_regularizer: ModelKind::Translation,
        }
    }
}

impl BlockModelConfig {
    /// Identity model with both lambdas at 1.
    pub fn instance(&self) -> Model {
        Model::regularized(
            self.base,
            self.first_regularizer,
            self.second_regularizer,
            1.0,
            1.0,
        )
    }
}

/// Block solver configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockSolverConfig {
    /// Stitch each layer before the block solve
    #[serde(default)]
    pub stitch_first: bool,

    /// Grid density when fitting models to seed transforms
    #[serde(default = "defaults::samples_per_dimension")]
    pub samples_per_dimension: usize,

    /// Lambda recorded for layers before the policy runs
    #[serde(default = "defaults::default_lambda")]
    pub default_lambda: f64,

    /// Regularized block model
    #[serde(default)]
    pub model: BlockModelConfig,

    /// Section stitching
    #[serde(default)]
    pub stitching: StitchingConfig,

    /// Lambda stages
    #[serde(default)]
    pub schedule: Schedule,

    /// Sweep mode, damping and plateau threshold shared by all stages
    #[serde(default)]
    pub optimizer: OptimizerConfig,

    /// Wall-clock budget per block part
    #[serde(default)]
    pub max_block_duration_ms: Option<u64>,

    /// Per-layer lambda policy
    #[serde(default)]
    pub lambda: LambdaPolicyConfig,
}

impl Default for BlockSolverConfig {
    fn default() -> Self {
        Self {
            stitch_first: false,
            samples_per_dimension: defaults::samples_per_dimension(),
            default_lambda: defaults::default_lambda(),
            model: BlockModelConfig::default(),
            stitching: StitchingConfig::default(),
            schedule: Schedule::default(),
            optimizer: OptimizerConfig::default(),
            max_block_duration_ms: None,
            lambda: LambdaPolicyConfig::default(),
        }
    }
}

/// Outcome of solving one block part.
#[derive(Debug, Clone)]
pub struct BlockReport {
    /// Part solved
    pub id: BlockId,
    /// Graph nodes optimized
    pub nodes: usize,
    /// Translation pre-align succeeded
    pub pre_aligned: bool,
    /// Per-stage outcomes
    pub schedule: ScheduleReport,
}

/// Solves blocks.
pub struct BlockSolver {
    config: BlockSolverConfig,
    fixed_tiles: BTreeSet<String>,
    policy: Box<dyn LambdaPolicy>,
}

impl BlockSolver {
    /// Create a solver; tiles in `fixed_tiles` keep their seed transform.
    pub fn new(config: BlockSolverConfig, fixed_tiles: BTreeSet<String>) -> Self {
        let policy = config.lambda.build();
        Self {
            config,
            fixed_tiles,
            policy,
        }
    }

    /// Replace the lambda policy.
    pub fn with_policy(mut self, policy: Box<dyn LambdaPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Configuration in use.
    pub fn config(&self) -> &BlockSolverConfig {
        &self.config
    }

    /// Full pipeline for the block `[min_z, max_z]`.
    ///
    /// Returns one solved item per connected part of the block.
    pub fn solve_block(
        &self,
        id: BlockId,
        min_z: i64,
        max_z: i64,
        correspondences: &dyn CorrespondenceSource,
        geometry: &dyn TileGeometrySource,
    ) -> Result<Vec<SolveItem>> {
        let mut item = self.assemble(id, min_z, max_z, correspondences, geometry)?;
        self.build_graph(&mut item)?;
        let mut parts = self.split(item)?;
        for part in &mut parts {
            let report = self.solve_item(part);
            log::info!(
                "block {}: solved {} nodes, {} failed stages, final mean error {:?}",
                report.id,
                report.nodes,
                report.schedule.failed_stages(),
                report.schedule.final_mean_error()
            );
        }
        Ok(parts)
    }

    /// Load tiles and correspondences of every layer group in range.
    ///
    /// Pairs with unknown tiles or a tile outside the range are dropped and
    /// logged, as are matches with non-positive weight.
    pub fn assemble(
        &self,
        id: BlockId,
        min_z: i64,
        max_z: i64,
        correspondences: &dyn CorrespondenceSource,
        geometry: &dyn TileGeometrySource,
    ) -> Result<SolveItem> {
        if min_z > max_z {
            return Err(SolveError::Config(format!(
                "block {id}: empty range [{min_z}, {max_z}]"
            )));
        }
        log::info!(
            "block {}: loading transforms and matches from {} to layer {}",
            id,
            min_z,
            max_z
        );

        let template = self.config.model.instance();
        let mut item = SolveItem::new(id, min_z, max_z);

        let mut groups = correspondences.layer_groups();
        groups.sort_by(|a, b| a.z.cmp(&b.z).then_with(|| a.id.cmp(&b.id)));

        for group in &groups {
            if !item.contains_z(group.z) {
                continue;
            }
            log::debug!("block {}: connecting tiles of group {}", id, group.id);
            for pair in correspondences.correspondences(&group.id)? {
                let (Some(ga), Some(gb)) = (
                    geometry.tile_geometry(&pair.tile_a),
                    geometry.tile_geometry(&pair.tile_b),
                ) else {
                    let missing = if geometry.tile_geometry(&pair.tile_a).is_none() {
                        &pair.tile_a
                    } else {
                        &pair.tile_b
                    };
                    log::warn!(
                        "block {}: ignoring pair ({}, {}): {}",
                        id,
                        pair.tile_a,
                        pair.tile_b,
                        SolveError::MissingTileGeometry(missing.clone())
                    );
                    continue;
                };

                if !item.contains_z(ga.z) || !item.contains_z(gb.z) {
                    log::debug!(
                        "block {}: ignoring pair ({}, {}) out of range",
                        id,
                        pair.tile_a,
                        pair.tile_b
                    );
                    continue;
                }

                let matches: Vec<PointMatch> = pair
                    .matches
                    .into_iter()
                    .filter(PointMatch::is_informative)
                    .collect();
                if matches.is_empty() || pair.tile_a == pair.tile_b {
                    continue;
                }

                let a = self.ensure_tile(&mut item, &template, &pair.tile_a, ga);
                let b = self.ensure_tile(&mut item, &template, &pair.tile_b, gb);
                item.push_pair(a, b, matches);
            }
        }

        log::info!(
            "block {}: {} tiles, {} pairs",
            id,
            item.tiles().len(),
            item.pairs().len()
        );
        Ok(item)
    }

    fn ensure_tile(
        &self,
        item: &mut SolveItem,
        template: &Model,
        tile_id: &str,
        geometry: TileGeometry,
    ) -> usize {
        if let Some(i) = item.tile_index(tile_id) {
            return i;
        }
        let seed = geometry.seed_transform;
        let seed_model = template
            .fit_to_affine(
                &seed,
                geometry.width,
                geometry.height,
                self.config.samples_per_dimension,
            )
            .unwrap_or_else(|e| {
                log::debug!("tile {}: seed fit failed ({}), copying seed", tile_id, e);
                template.reset_to(&seed)
            });
        item.insert_tile(tile_id, geometry, seed_model, self.config.default_lambda)
    }

    /// Build the block graph, grouped by layer when stitching is enabled.
    pub fn build_graph(&self, item: &mut SolveItem) -> Result<()> {
        if self.config.stitch_first {
            let stitcher = SectionStitcher::new(self.config.stitching.clone());
            let report = stitcher.stitch(
                item,
                &self.config.model.instance(),
                &self.fixed_tiles,
                self.config.samples_per_dimension,
            )?;
            log::info!(
                "block {}: stitched {} layers into {} groups",
                item.id(),
                report.layers,
                report.groups
            );
        } else {
            item.build_tile_graph()?;
            // fixed tiles carry their seed exactly, not its regularized fit
            let fixed: Vec<(usize, Affine2D)> = item
                .tiles()
                .iter()
                .enumerate()
                .filter(|(_, t)| self.fixed_tiles.contains(&t.tile_id))
                .filter_map(|(i, t)| Some((item.node_of(i)?, t.geometry.seed_transform)))
                .collect();
            let graph = item.graph_mut();
            for (node, seed) in fixed {
                graph.set_model(node, Model::Affine(seed))?;
                graph.fix_tile(node)?;
            }
        }
        Ok(())
    }

    /// One item per connected component of the block graph.
    ///
    /// Every layer of the input must be covered by some part.
    pub fn split(&self, item: SolveItem) -> Result<Vec<SolveItem>> {
        let components = identify_connected_components(item.graph());
        if components.len() <= 1 {
            return Ok(vec![item]);
        }

        log::info!(
            "block {}: graph has {} connected parts, splitting",
            item.id(),
            components.len()
        );

        let parts = components
            .iter()
            .enumerate()
            .map(|(part, component)| item.extract(item.id().with_part(part), component))
            .collect::<Result<Vec<_>>>()?;

        let covered: BTreeSet<i64> = parts.iter().flat_map(|p| p.layers()).collect();
        if let Some(z) = item.layers().find(|z| !covered.contains(z)) {
            return Err(SolveError::InvariantViolation(format!(
                "block {}: layer {} is not covered by any part",
                item.id(),
                z
            )));
        }
        Ok(parts)
    }

    /// Pre-align with translation only, run the schedule, extract models
    /// and recompute lambdas.
    pub fn solve_item(&self, item: &mut SolveItem) -> BlockReport {
        let mut base = self.config.optimizer.clone();
        if let Some(ms) = self.config.max_block_duration_ms {
            base = base.with_time_budget(Duration::from_millis(ms));
        }

        let id = item.id();
        let graph = item.graph_mut();
        log::info!("block {}: optimizing {} tiles", id, graph.len());

        graph.for_each_free_model_mut(|_, m| m.set_regularization(1.0, 1.0));
        log::info!("block {}: errors before pre-align {}", id, compute_errors(graph));
        let pre_aligned = match RelaxationOptimizer::new(base.clone()).pre_align(graph) {
            Ok(report) => {
                log::info!("block {}: errors after pre-align {}", id, report.errors);
                true
            }
            Err(e) => {
                log::warn!("block {}: pre-align failed: {}", id, e);
                false
            }
        };

        let schedule = self.config.schedule.run(graph, &base);
        let nodes = graph.len();

        self.extract_models(item);
        let lambdas = self.policy.layer_lambdas(item);
        item.set_lambdas(lambdas);
        item.mark_solved();

        BlockReport {
            id,
            nodes,
            pre_aligned,
            schedule,
        }
    }

    /// `new_model = stitching ∘ group` when stitched, else the node model.
    fn extract_models(&self, item: &mut SolveItem) {
        let stitched = item.is_stitched();
        let models: Vec<Option<Model>> = (0..item.tiles().len())
            .map(|t| {
                let node = item.node_of(t)?;
                let node_model = item.graph().model(node);
                if stitched {
                    let stitching = item.tiles()[t].stitching_model.as_ref()?;
                    Some(stitching.pre_concatenate(node_model))
                } else {
                    Some(node_model.clone())
                }
            })
            .collect();

        for (record, model) in item.tiles_mut().iter_mut().zip(models) {
            if let Some(m) = &model {
                log::debug!("tile {} model {}", record.tile_id, m);
            }
            record.new_model = model;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Point2D;
    use crate::io::Montage;
    use crate::optimizer::StageConfig;
    use approx::assert_relative_eq;

    fn geometry(z: i64) -> TileGeometry {
        TileGeometry {
            width: 100.0,
            height: 100.0,
            z,
            seed_transform: Affine2D::identity(),
        }
    }

    /// Three matches placing `b` at `offset` relative to `a`.
    fn offset_matches(dx: f64, dy: f64) -> Vec<PointMatch> {
        [(20.0, 20.0), (80.0, 30.0), (50.0, 80.0)]
            .iter()
            .map(|&(x, y)| PointMatch::unweighted(Point2D::new(x + dx, y + dy), Point2D::new(x, y)))
            .collect()
    }

    fn quick_config() -> BlockSolverConfig {
        BlockSolverConfig {
            schedule: Schedule::new(vec![
                StageConfig::new(1.0, 1.0, 200, 20),
                StageConfig::new(1.0, 0.0, 200, 20),
            ]),
            ..BlockSolverConfig::default()
        }
    }

    #[test]
    fn test_assemble_drops_missing_and_out_of_range() {
        let mut montage = Montage::new();
        montage.add_tile("a", geometry(0));
        montage.add_tile("b", geometry(0));
        montage.add_tile("far", geometry(9));
        montage.add_matches("a", "b", offset_matches(100.0, 0.0));
        montage.add_matches("a", "ghost", offset_matches(0.0, 100.0));
        montage.add_matches("a", "far", offset_matches(0.0, 0.0));

        let solver = BlockSolver::new(quick_config(), BTreeSet::new());
        let item = solver
            .assemble(BlockId::new(0), 0, 3, &montage, &montage)
            .unwrap();
        assert_eq!(item.tiles().len(), 2);
        assert_eq!(item.pairs().len(), 1);
        assert_eq!(item.lambda(0), Some(0.1));
    }

    #[test]
    fn test_assemble_rejects_empty_range() {
        let montage = Montage::new();
        let solver = BlockSolver::new(quick_config(), BTreeSet::new());
        assert!(matches!(
            solver.assemble(BlockId::new(0), 5, 2, &montage, &montage),
            Err(SolveError::Config(_))
        ));
    }

    #[test]
    fn test_solve_block_recovers_offset() {
        let mut montage = Montage::new();
        montage.add_tile("a", geometry(0));
        montage.add_tile("b", geometry(1));
        montage.add_matches("a", "b", offset_matches(30.0, -20.0));

        let solver = BlockSolver::new(quick_config(), BTreeSet::from(["a".to_string()]));
        let parts = solver
            .solve_block(BlockId::new(0), 0, 1, &montage, &montage)
            .unwrap();
        assert_eq!(parts.len(), 1);

        let b = parts[0].new_model("b").unwrap().affine();
        assert_relative_eq!(b.m02, 30.0, epsilon = 1e-6);
        assert_relative_eq!(b.m12, -20.0, epsilon = 1e-6);
        assert_eq!(parts[0].lambda(1), Some(0.1));
    }

    #[test]
    fn test_fixed_sheared_tile_keeps_seed() {
        let sheared = [1.1, 0.05, 0.0, 1.1, 0.0, 0.0];
        for stitch_first in [false, true] {
            let mut montage = Montage::new();
            montage.add_tile(
                "a",
                TileGeometry {
                    seed_transform: Affine2D::from_params(sheared),
                    ..geometry(0)
                },
            );
            montage.add_tile("b", geometry(0));
            montage.add_tile("c", geometry(1));
            montage.add_matches("a", "b", offset_matches(90.0, 0.0));
            montage.add_matches("a", "c", offset_matches(0.0, 0.0));

            let config = BlockSolverConfig {
                stitch_first,
                ..quick_config()
            };
            let solver = BlockSolver::new(config, BTreeSet::from(["a".to_string()]));
            let parts = solver
                .solve_block(BlockId::new(0), 0, 1, &montage, &montage)
                .unwrap();

            let a = parts[0].new_model("a").unwrap().affine().to_params();
            for (got, want) in a.iter().zip(sheared) {
                assert_relative_eq!(*got, want, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn test_split_disjoint_clusters() {
        let mut montage = Montage::new();
        for (id, z) in [("a", 0), ("b", 1), ("c", 2), ("d", 3)] {
            montage.add_tile(id, geometry(z));
        }
        montage.add_matches("a", "b", offset_matches(10.0, 0.0));
        montage.add_matches("c", "d", offset_matches(10.0, 0.0));

        let solver = BlockSolver::new(quick_config(), BTreeSet::new());
        let parts = solver
            .solve_block(BlockId::new(7), 0, 3, &montage, &montage)
            .unwrap();

        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].id(), BlockId { block: 7, part: 0 });
        assert_eq!((parts[0].min_z(), parts[0].max_z()), (0, 1));
        assert_eq!((parts[1].min_z(), parts[1].max_z()), (2, 3));
        assert!(parts.iter().all(|p| p.tiles().iter().all(|t| t.new_model.is_some())));
    }

    #[test]
    fn test_stitched_block_composes_models() {
        let mut montage = Montage::new();
        montage.add_tile("a", geometry(0));
        montage.add_tile("b", geometry(0));
        montage.add_tile("c", geometry(1));
        montage.add_matches("a", "b", offset_matches(90.0, 0.0));
        montage.add_matches("a", "c", offset_matches(0.0, 0.0));

        let config = BlockSolverConfig {
            stitch_first: true,
            ..quick_config()
        };
        let solver = BlockSolver::new(config, BTreeSet::from(["a".to_string()]));
        let parts = solver
            .solve_block(BlockId::new(0), 0, 1, &montage, &montage)
            .unwrap();

        let item = &parts[0];
        assert!(item.is_stitched());
        assert_relative_eq!(item.new_model("b").unwrap().affine().m02, 90.0, epsilon = 1e-6);
        assert_relative_eq!(item.new_model("c").unwrap().affine().m02, 0.0, epsilon = 1e-6);
    }
}
