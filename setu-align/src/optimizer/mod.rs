//! Iterative tile-graph optimization.
//!
//! ```text
//! ┌──────────────┐    ┌─────────────────────┐    ┌────────────────┐
//! │  pre_align   │───▶│ optimize (sweeps)   │───▶│ ErrorStatistic │
//! │  BFS refits  │    │ Sequential/Parallel │    │ plateau test   │
//! └──────────────┘    └─────────────────────┘    └────────────────┘
//!                              ▲
//!                     Schedule: per-stage λ_rigid, λ_translation
//! ```

mod config;
mod error_statistic;
mod relaxation;
mod schedule;

pub use config::{OptimizerConfig, SweepMode};
pub use error_statistic::ErrorStatistic;
pub use relaxation::{
    ErrorSummary, OptimizationResult, OptimizerState, PreAlignReport, RelaxationOptimizer,
    TerminationReason, compute_errors,
};
pub use schedule::{Schedule, ScheduleReport, StageConfig, StageOutcome};
