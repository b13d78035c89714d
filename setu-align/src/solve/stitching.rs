//! Per-layer stitching of tiles into grouped tiles.
//!
//! Every layer of a block is aligned on its own first. Each connected set of
//! same-layer tiles then becomes one [`GroupedTile`] node of the block graph,
//! and every correspondence between two different groups is re-expressed in
//! the groups' stitched frames.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::item::{GroupedTile, SolveItem};
use crate::core::{Affine2D, Model, ModelKind, PointMatch};
use crate::error::{Result, SolveError};
use crate::graph::{TileGraph, identify_connected_components, is_cyclic};
use crate::optimizer::{OptimizerConfig, RelaxationOptimizer};

/// Section stitching configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StitchingConfig {
    /// Transform family of the per-layer solve
    #[serde(default = "default_stitching_model")]
    pub model: ModelKind,

    /// Budget of the per-component solve
    #[serde(default = "OptimizerConfig::stitching")]
    pub optimizer: OptimizerConfig,
}

fn default_stitching_model() -> ModelKind {
    ModelKind::Rigid
}

impl Default for StitchingConfig {
    fn default() -> Self {
        Self {
            model: default_stitching_model(),
            optimizer: OptimizerConfig::stitching(),
        }
    }
}

/// Summary of one stitching run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StitchReport {
    /// Layers visited
    pub layers: usize,
    /// Groups created
    pub groups: usize,
    /// Components that needed a full solve
    pub solved_components: usize,
    /// Components whose pre-align or solve failed (seed models kept)
    pub failed_components: usize,
}

/// Groups same-layer tiles of a block.
#[derive(Debug, Clone, Default)]
pub struct SectionStitcher {
    config: StitchingConfig,
}

impl SectionStitcher {
    /// Create a stitcher.
    pub fn new(config: StitchingConfig) -> Self {
        Self { config }
    }

    /// Stitch every layer of `item` and install the grouped graph.
    ///
    /// Groups start at `group_model`. A group containing one of
    /// `fixed_tiles` is fixed at identity, and a fixed tile's stitching
    /// model is its seed.
    pub fn stitch(
        &self,
        item: &mut SolveItem,
        group_model: &Model,
        fixed_tiles: &BTreeSet<String>,
        samples_per_dimension: usize,
    ) -> Result<StitchReport> {
        let template = Model::identity(self.config.model);
        let stitch_optimizer = self.config.optimizer.clone();
        let mut report = StitchReport::default();
        let mut groups: Vec<GroupedTile> = Vec::new();
        let mut group_of = vec![usize::MAX; item.tiles().len()];
        let layers: Vec<i64> = item.layers().collect();

        for z in layers {
            report.layers += 1;
            let members: Vec<usize> = item.tile_indices_at(z).collect();
            let mut local = vec![usize::MAX; item.tiles().len()];

            let mut graph = TileGraph::new();
            for &t in &members {
                let record = &item.tiles()[t];
                let seed = record.geometry.seed_transform;
                let fixed = fixed_tiles.contains(&record.tile_id);
                let model = if fixed {
                    Model::Affine(seed)
                } else {
                    template
                        .fit_to_affine(
                            &seed,
                            record.geometry.width,
                            record.geometry.height,
                            samples_per_dimension,
                        )
                        .unwrap_or_else(|_| template.reset_to(&seed))
                };
                let node = graph.add_tile(model);
                if fixed {
                    graph.fix_tile(node)?;
                }
                local[t] = node;
            }

            for pair in item.pairs() {
                if local[pair.a] != usize::MAX && local[pair.b] != usize::MAX {
                    graph.connect(local[pair.a], local[pair.b], pair.matches.iter().copied())?;
                }
            }

            let components = identify_connected_components(&graph);
            log::info!(
                "block {}: stitching z={} #sets={}",
                item.id(),
                z,
                components.len()
            );

            for component in components {
                let tiles: Vec<usize> = component.iter().map(|&n| members[n]).collect();

                if component.len() > 1 {
                    let (mut sub, _) = graph.subgraph(&component);
                    let mut optimizer = RelaxationOptimizer::new(stitch_optimizer.clone());
                    let mut failed = false;

                    if let Err(e) = optimizer.pre_align(&mut sub) {
                        log::warn!(
                            "block {}: could not pre-align z={}: {}",
                            item.id(),
                            z,
                            e
                        );
                        failed = true;
                    }

                    let needs_solve = !(self.config.model.is_rigid_or_simpler()
                        && !is_cyclic(&graph, &component));
                    if needs_solve {
                        report.solved_components += 1;
                        match optimizer.optimize(&mut sub) {
                            Ok(result) => log::info!(
                                "block {}: solve z={} {}",
                                item.id(),
                                z,
                                result.final_error
                            ),
                            Err(e) => {
                                log::warn!(
                                    "block {}: could not solve stitching for z={}: {}",
                                    item.id(),
                                    z,
                                    e
                                );
                                failed = true;
                            }
                        }
                    }
                    if failed {
                        report.failed_components += 1;
                    }

                    for (local_node, &t) in tiles.iter().enumerate() {
                        let model = sub.model(local_node).clone();
                        log::debug!(
                            "block {}: tile {} stitching model {}",
                            item.id(),
                            item.tiles()[t].tile_id,
                            model
                        );
                        item.tiles_mut()[t].stitching_model = Some(model);
                    }
                } else {
                    let t = tiles[0];
                    let seed = item.tiles()[t].geometry.seed_transform;
                    item.tiles_mut()[t].stitching_model = Some(Model::Affine(seed));
                }

                let gi = groups.len();
                for &t in &tiles {
                    group_of[t] = gi;
                }
                groups.push(GroupedTile {
                    members: tiles,
                    z,
                    node: gi,
                });
            }
        }

        let mut graph = TileGraph::new();
        for group in &groups {
            let fixed = group
                .members
                .iter()
                .any(|&t| fixed_tiles.contains(&item.tiles()[t].tile_id));
            if fixed {
                let node = graph.add_tile(Model::Affine(Affine2D::identity()));
                graph.fix_tile(node)?;
            } else {
                graph.add_tile(group_model.clone());
            }
        }

        for pair in item.pairs() {
            let (ga, gb) = (group_of[pair.a], group_of[pair.b]);
            if ga == gb {
                continue;
            }
            let stitched = |t: usize| {
                item.tiles()[t].stitching_model.clone().ok_or_else(|| {
                    SolveError::InvariantViolation(format!(
                        "block {}: tile {} has no stitching model",
                        item.id(),
                        item.tiles()[t].tile_id
                    ))
                })
            };
            let (model_a, model_b) = (stitched(pair.a)?, stitched(pair.b)?);
            let relative = pair.matches.iter().map(|m| {
                PointMatch::new(model_a.apply(&m.p1), model_b.apply(&m.p2), m.weight)
            });
            graph.connect(ga, gb, relative)?;
        }

        report.groups = groups.len();
        item.install_groups(groups, graph)?;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Point2D;
    use crate::solve::item::BlockId;
    use crate::solve::source::TileGeometry;
    use approx::assert_relative_eq;

    fn add(item: &mut SolveItem, id: &str, z: i64, seed: Affine2D) -> usize {
        item.insert_tile(
            id,
            TileGeometry {
                width: 100.0,
                height: 100.0,
                z,
                seed_transform: seed,
            },
            Model::Affine(seed),
            0.1,
        )
    }

    /// Overlap of two horizontally adjacent tiles 90px apart.
    fn side_by_side() -> Vec<PointMatch> {
        [(95.0, 10.0), (95.0, 90.0), (98.0, 50.0)]
            .iter()
            .map(|&(x, y)| PointMatch::unweighted(Point2D::new(x, y), Point2D::new(x - 90.0, y)))
            .collect()
    }

    #[test]
    fn test_stitch_groups_layers() {
        let mut item = SolveItem::new(BlockId::new(0), 0, 1);
        // layer 0: two overlapping tiles with a bad seed for the second
        let a = add(&mut item, "a", 0, Affine2D::identity());
        let b = add(&mut item, "b", 0, Affine2D::translation(80.0, 3.0));
        // layer 1: one tile
        let c = add(&mut item, "c", 1, Affine2D::identity());
        item.push_pair(a, b, side_by_side());
        let cross: Vec<PointMatch> = [(10.0, 10.0), (60.0, 10.0), (30.0, 70.0)]
            .iter()
            .map(|&(x, y)| PointMatch::unweighted(Point2D::new(x, y), Point2D::new(x, y)))
            .collect();
        item.push_pair(a, c, cross);

        let report = SectionStitcher::default()
            .stitch(
                &mut item,
                &Model::block_default(1.0, 1.0),
                &BTreeSet::from(["a".to_string()]),
                3,
            )
            .unwrap();

        assert_eq!(report.layers, 2);
        assert_eq!(report.groups, 2);
        assert_eq!(report.solved_components, 0);
        assert!(item.is_stitched());
        assert_eq!(item.graph().len(), 2);
        assert!(item.graph().is_fixed(0));

        // b is placed 90px right of a by the stitch
        let sb = item.tiles()[b].stitching_model.as_ref().unwrap();
        assert_relative_eq!(sb.affine().m02, 90.0, epsilon = 1e-6);
        assert_relative_eq!(sb.affine().m12, 0.0, epsilon = 1e-6);

        // single-tile layer keeps its seed
        let sc = item.tiles()[c].stitching_model.as_ref().unwrap();
        assert_eq!(sc.affine(), Affine2D::identity());

        // one cross-group link carrying the three matches
        assert_eq!(item.graph().node(0).unwrap().match_count(), 3);
        assert_eq!(item.tiles()[a].group, item.tiles()[b].group);
    }

    #[test]
    fn test_unconnected_tiles_form_own_groups() {
        let mut item = SolveItem::new(BlockId::new(0), 0, 0);
        add(&mut item, "a", 0, Affine2D::identity());
        add(&mut item, "b", 0, Affine2D::translation(500.0, 0.0));

        let report = SectionStitcher::default()
            .stitch(&mut item, &Model::block_default(1.0, 1.0), &BTreeSet::new(), 3)
            .unwrap();
        assert_eq!(report.groups, 2);
        assert_eq!(item.groups().len(), 2);
    }
}
