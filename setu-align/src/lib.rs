//! # Setu
//!
//! Distributed tile-configuration solver for large 2D image montages.
//!
//! ## Overview
//!
//! Every tile carries an approximate transform and point correspondences to
//! the tiles it overlaps. Setu refines these into one transform per tile that
//! minimizes the disagreement over all correspondences, solving the layer
//! stack in overlapping blocks and reconciling the blocks afterwards:
//!
//! - **Models**: translation, rigid, affine and their convex blends
//! - **Tile graph**: tiles, fixed anchors, weighted correspondences
//! - **Relaxation**: iterative refits with plateau detection and a staged
//!   lambda schedule
//! - **Stitching**: per-layer pre-alignment into grouped tiles
//! - **Blocks**: assemble, stitch, split into connected parts, solve
//! - **Distribution**: staggered left/right block series on a worker pool,
//!   merged through a coarse block-level solve
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use setu_align::{DistributedSolver, Montage, Schedule, SetuConfig};
//! use std::path::Path;
//!
//! let montage = Montage::load(Path::new("montage.yaml"))?;
//! let solver = DistributedSolver::new(SetuConfig::load_default()?, &montage, &montage)
//!     .with_fixed_tiles(["r0c0"]);
//!
//! let solution = solver.solve_range(0, 999, 100, &Schedule::default(), true)?;
//! for (tile_id, params) in solution.transforms() {
//!     println!("{tile_id}: {params:?}");
//! }
//! ```
//!
//! ## Transform Convention
//!
//! Transforms are exchanged as `[m00, m10, m01, m11, m02, m12]`:
//! - `x' = m00·x + m01·y + m02`
//! - `y' = m10·x + m11·y + m12`

#![warn(missing_docs)]

// Geometric primitives and models
pub mod core;

// Tile graph and connectivity
pub mod graph;

// Relaxation optimizer and lambda schedule
pub mod optimizer;

// Block solving and stitching
pub mod solve;

// Block partitioning, dispatch and merge
pub mod distributed;

// In-memory collaborators
pub mod io;

// Unified configuration
pub mod config;

pub mod error;

// Re-export commonly used types
pub use core::{Affine2D, Model, ModelKind, Point2D, PointMatch};

pub use error::{ModelError, Result, SolveError};

pub use graph::{TileGraph, identify_connected_components};

pub use optimizer::{OptimizerConfig, RelaxationOptimizer, Schedule, StageConfig, SweepMode};

pub use solve::{
    BlockId, BlockSolver, BlockSolverConfig, CorrespondenceSource, SectionStitcher, SolveItem,
    TileGeometry, TileGeometrySource,
};

pub use distributed::{
    DistributedScheduler, DistributedSolver, GlobalMerger, GlobalSolve, RangeSolution,
    define_solve_set,
};

pub use io::Montage;

pub use config::{ConfigLoadError, SetuConfig};
