//! Range solving: partition into blocks, solve them in parallel, merge.
//!
//! ```text
//! define_solve_set ─▶ DistributedScheduler ─▶ BlockSolver (per block, per worker)
//!                                                  │
//!                                   Vec<SolveItem> ▼
//!                                            GlobalMerger ─▶ GlobalSolve
//! ```
//!
//! ## Example
//!
//! ```rust
//! use setu_align::distributed::DistributedSolver;
//! use setu_align::io::Montage;
//! use setu_align::optimizer::Schedule;
//!
//! let montage = Montage::new();
//! let solver = DistributedSolver::new(Default::default(), &montage, &montage);
//! let solution = solver
//!     .solve_range(0, 9, 5, &Schedule::translation_only(100, 20), false)
//!     .unwrap();
//! assert!(solution.transforms().is_empty());
//! ```

mod merge;
mod scheduler;

pub use merge::{BlockRef, GlobalMerger, GlobalSolve, LayerClaim, MergeConfig, layer_weight};
pub use scheduler::{
    BlockDefinition, BlockResults, BlockSeries, DistributedScheduler, SchedulerConfig, SolveSet,
    define_solve_set,
};

use std::collections::{BTreeMap, BTreeSet};

use crate::config::SetuConfig;
use crate::error::{Result, SolveError};
use crate::optimizer::Schedule;
use crate::solve::{
    BlockId, BlockSolver, CorrespondenceSource, SolveItem, TileGeometrySource,
};

/// Result of [`DistributedSolver::solve_range`].
#[derive(Debug)]
pub struct RangeSolution {
    /// Merged per-tile transforms; empty when the merge failed
    pub global: GlobalSolve,
    /// Solved parts of every successful block, sorted by id
    pub blocks: Vec<SolveItem>,
    /// Blocks that failed every attempt
    pub failures: Vec<(BlockId, SolveError)>,
    /// Why the merge failed, if it did
    pub merge_error: Option<SolveError>,
}

impl RangeSolution {
    /// Merge the solved blocks of `results`.
    ///
    /// A merge failure is recorded instead of discarding the blocks.
    pub fn merged(results: BlockResults, merger: &GlobalMerger) -> Self {
        let (global, merge_error) = match merger.merge(&results.solved) {
            Ok(global) => {
                log::info!(
                    "merged {} tiles over {} layers",
                    global.models.len(),
                    global.z_to_tiles.len()
                );
                (global, None)
            }
            Err(e) => {
                log::warn!(
                    "merge of {} block parts failed, keeping block solutions: {}",
                    results.solved.len(),
                    e
                );
                (GlobalSolve::default(), Some(e))
            }
        };
        Self {
            global,
            blocks: results.solved,
            failures: results.failures,
            merge_error,
        }
    }

    /// Final transforms as `[m00, m10, m01, m11, m02, m12]`.
    pub fn transforms(&self) -> BTreeMap<String, [f64; 6]> {
        self.global
            .models
            .iter()
            .map(|(id, m)| (id.clone(), m.to_params()))
            .collect()
    }

    /// Every block solved and merged.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.merge_error.is_none()
    }
}

/// Solves layer ranges against a pair of collaborators.
pub struct DistributedSolver<'a> {
    config: SetuConfig,
    correspondences: &'a dyn CorrespondenceSource,
    geometry: &'a dyn TileGeometrySource,
    fixed_tiles: BTreeSet<String>,
}

impl<'a> DistributedSolver<'a> {
    /// Create a solver.
    pub fn new(
        config: SetuConfig,
        correspondences: &'a dyn CorrespondenceSource,
        geometry: &'a dyn TileGeometrySource,
    ) -> Self {
        Self {
            config,
            correspondences,
            geometry,
            fixed_tiles: BTreeSet::new(),
        }
    }

    /// Tiles whose seed transform must not change.
    pub fn with_fixed_tiles<I, S>(mut self, tiles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fixed_tiles = tiles.into_iter().map(Into::into).collect();
        self
    }

    /// Configuration in use.
    pub fn config(&self) -> &SetuConfig {
        &self.config
    }

    /// Solve `[min_z, max_z]` in blocks of `block_size` layers.
    ///
    /// `schedule` and `stitch_first` override the configured block settings.
    /// Failed blocks are reported in the solution; their layers are only
    /// present when another block covers them. A failed merge is reported
    /// in [`RangeSolution::merge_error`] alongside the solved blocks.
    pub fn solve_range(
        &self,
        min_z: i64,
        max_z: i64,
        block_size: usize,
        schedule: &Schedule,
        stitch_first: bool,
    ) -> Result<RangeSolution> {
        let set = define_solve_set(min_z, max_z, block_size)?;
        log::info!("solve set:\n{}", set);

        let mut block_config = self.config.block_solver_config();
        block_config.schedule = schedule.clone();
        block_config.stitch_first = stitch_first;
        let solver = BlockSolver::new(block_config, self.fixed_tiles.clone());

        let scheduler = DistributedScheduler::new(self.config.distributed);
        let results = scheduler.run(&set.all(), |block| {
            solver.solve_block(
                block.id,
                block.min_z,
                block.max_z,
                self.correspondences,
                self.geometry,
            )
        });

        let merger =
            GlobalMerger::new(self.config.merge.clone()).with_fixed_tiles(self.fixed_tiles.clone());
        Ok(RangeSolution::merged(results, &merger))
    }

    /// Solve with the configured schedule and stitching policy.
    pub fn solve_configured(
        &self,
        min_z: i64,
        max_z: i64,
        block_size: usize,
    ) -> Result<RangeSolution> {
        self.solve_range(
            min_z,
            max_z,
            block_size,
            &self.config.schedule,
            self.config.block.stitch_first,
        )
    }
}
