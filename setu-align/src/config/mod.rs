//! Configuration loading for the tile solver.
//!
//! Everything lives in one YAML file; every section and field is optional
//! and falls back to the built-in defaults.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use setu_align::config::SetuConfig;
//!
//! // Load from default path (configs/setu.yaml), or defaults if absent
//! let config = SetuConfig::load_default()?;
//!
//! // Convert to runtime configs
//! let block = config.block_solver_config();
//! let merge = config.merge.clone();
//! ```
//!
//! ## Configuration Sections
//!
//! | Section | Description |
//! |---------|-------------|
//! | `distributed` | Worker count and per-block retries |
//! | [`BlockSection`] | Stitching policy, block model, seed sampling, deadline |
//! | `stitching` | Per-layer model and optimizer budget |
//! | `schedule` | Lambda stages of the block solve |
//! | `optimizer` | Sweep mode, damping, plateau threshold |
//! | `merge` | Coarse block solve |
//! | `lambda` | Per-layer lambda policy |
//!
//! ## Example YAML
//!
//! ```yaml
//! distributed:
//!   workers: 8
//!   max_retries: 2
//! block:
//!   stitch_first: true
//!   max_block_duration_ms: 600000
//! schedule:
//!   - { lambda_rigid: 1.0, lambda_translation: 1.0, max_iterations: 1000, max_plateau_width: 250 }
//!   - { lambda_rigid: 0.01, lambda_translation: 0.0, max_iterations: 250, max_plateau_width: 100 }
//! lambda:
//!   type: drift_curvature
//! ```

mod block;
pub(crate) mod defaults;
mod error;
mod setu;

pub use block::BlockSection;
pub use error::ConfigLoadError;
pub use setu::SetuConfig;
