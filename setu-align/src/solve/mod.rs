//! Block-level solving.
//!
//! A block is a closed layer range. [`BlockSolver`] loads its tiles and
//! correspondences into a [`SolveItem`], optionally stitches each layer with
//! [`SectionStitcher`], splits disconnected parts and runs the lambda
//! [`Schedule`](crate::optimizer::Schedule) on each part.

mod block;
mod item;
mod lambda;
mod source;
mod stitching;

pub use block::{BlockModelConfig, BlockReport, BlockSolver, BlockSolverConfig};
pub use item::{BlockId, GroupedTile, ItemState, SolveItem, TilePair, TileRecord};
pub use lambda::{
    ConstantLambda, DriftCurvatureLambda, LambdaPolicy, LambdaPolicyConfig, QuadraticCurve,
};
pub use source::{
    Correspondence, CorrespondenceSource, LayerGroup, TileGeometry, TileGeometrySource,
};
pub use stitching::{SectionStitcher, StitchReport, StitchingConfig};
