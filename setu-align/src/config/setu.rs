//! Main SetuConfig and conversion methods.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::distributed::{MergeConfig, SchedulerConfig};
use crate::optimizer::{OptimizerConfig, Schedule};
use crate::solve::{BlockSolverConfig, LambdaPolicyConfig, StitchingConfig};

use super::block::BlockSection;
use super::defaults;
use super::error::ConfigLoadError;

/// Full solver configuration loaded from YAML
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct SetuConfig {
    /// Block dispatch
    #[serde(default)]
    pub distributed: SchedulerConfig,

    /// Block solve settings
    #[serde(default)]
    pub block: BlockSection,

    /// Section stitching
    #[serde(default)]
    pub stitching: StitchingConfig,

    /// Lambda stages of the block solve
    #[serde(default)]
    pub schedule: Schedule,

    /// Settings shared by every optimizer stage
    #[serde(default)]
    pub optimizer: OptimizerConfig,

    /// Global merge
    #[serde(default)]
    pub merge: MergeConfig,

    /// Per-layer lambda policy
    #[serde(default)]
    pub lambda: LambdaPolicyConfig,
}

impl SetuConfig {
    /// Load configuration from a YAML file
    pub fn load(path: &Path) -> Result<Self, ConfigLoadError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigLoadError::Io(e.to_string()))?;
        Self::from_yaml(&contents)
    }

    /// Load from default config path (configs/setu.yaml)
    pub fn load_default() -> Result<Self, ConfigLoadError> {
        let path = Path::new(defaults::config_path());
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse from YAML string and validate
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigLoadError> {
        let config: Self =
            serde_yaml::from_str(yaml).map_err(|e| ConfigLoadError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the solver cannot run with
    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        if self.block.samples_per_dimension < 2 || self.merge.samples_per_dimension < 2 {
            return Err(ConfigLoadError::Invalid(
                "samples_per_dimension must be at least 2".into(),
            ));
        }
        if self.schedule.is_empty() {
            return Err(ConfigLoadError::Invalid("schedule has no stages".into()));
        }
        for optimizer in [&self.optimizer, &self.stitching.optimizer, &self.merge.optimizer] {
            if !(optimizer.damping > 0.0 && optimizer.damping <= 1.0) {
                return Err(ConfigLoadError::Invalid(format!(
                    "damping {} outside (0, 1]",
                    optimizer.damping
                )));
            }
        }
        Ok(())
    }

    /// Block solver config assembled from the block, stitching, schedule,
    /// optimizer and lambda sections
    pub fn block_solver_config(&self) -> BlockSolverConfig {
        BlockSolverConfig {
            stitch_first: self.block.stitch_first,
            samples_per_dimension: self.block.samples_per_dimension,
            default_lambda: self.block.default_lambda,
            model: self.block.model,
            stitching: self.stitching.clone(),
            schedule: self.schedule.clone(),
            optimizer: self.optimizer.clone(),
            max_block_duration_ms: self.block.max_block_duration_ms,
            lambda: self.lambda.clone(),
        }
    }
}
