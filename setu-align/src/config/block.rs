//! Block solve configuration section.

use serde::{Deserialize, Serialize};

use crate::solve::BlockModelConfig;

use super::defaults;

/// Block solve configuration section
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BlockSection {
    /// Stitch each layer before solving the block
    #[serde(default)]
    pub stitch_first: bool,

    /// Grid density for seed fits and merge sampling
    #[serde(default = "defaults::samples_per_dimension")]
    pub samples_per_dimension: usize,

    /// Lambda recorded for a layer until the policy has run
    #[serde(default = "defaults::default_lambda")]
    pub default_lambda: f64,

    /// Wall-clock budget per block part (milliseconds)
    #[serde(default)]
    pub max_block_duration_ms: Option<u64>,

    /// Regularized block model
    #[serde(default)]
    pub model: BlockModelConfig,
}

impl Default for BlockSection {
    fn default() -> Self {
        Self {
            stitch_first: false,
            samples_per_dimension: defaults::samples_per_dimension(),
            default_lambda: defaults::default_lambda(),
            max_block_duration_ms: None,
            model: BlockModelConfig::default(),
        }
    }
}
