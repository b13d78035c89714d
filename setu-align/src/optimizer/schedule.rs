//! Staged regularization schedule.
//!
//! Each stage sets the two lambda knobs of every free tile's regularized model
//! and re-runs the optimizer with the stage's budget. The default schedule
//! starts almost rigid/translation and relaxes towards affine:
//!
//! | stage | λ rigid | λ translation | iterations | plateau |
//! |-------|---------|---------------|------------|---------|
//! | 0     | 1.0     | 1.0           | 1000       | 250     |
//! | 1     | 1.0     | 0.0           | 1000       | 250     |
//! | 2     | 0.9     | 0.0           | 500        | 150     |
//! | 3     | 0.3     | 0.0           | 250        | 100     |
//! | 4     | 0.01    | 0.0           | 250        | 100     |

use serde::{Deserialize, Serialize};

use super::config::OptimizerConfig;
use super::relaxation::{OptimizationResult, RelaxationOptimizer};
use crate::error::ModelError;
use crate::graph::TileGraph;

/// One stage of a [`Schedule`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageConfig {
    /// Weight of the rigid regularizer inside the affine blend
    pub lambda_rigid: f64,
    /// Weight of the translation regularizer
    pub lambda_translation: f64,
    /// Iteration limit of this stage
    pub max_iterations: usize,
    /// Plateau window of this stage
    pub max_plateau_width: usize,
    /// Error target of this stage
    #[serde(default)]
    pub max_allowed_error: f64,
}

impl StageConfig {
    /// Stage with a zero error target.
    pub fn new(
        lambda_rigid: f64,
        lambda_translation: f64,
        max_iterations: usize,
        max_plateau_width: usize,
    ) -> Self {
        Self {
            lambda_rigid,
            lambda_translation,
            max_iterations,
            max_plateau_width,
            max_allowed_error: 0.0,
        }
    }

    fn optimizer_config(&self, base: &OptimizerConfig) -> OptimizerConfig {
        OptimizerConfig {
            max_iterations: self.max_iterations,
            max_plateau_width: self.max_plateau_width,
            max_allowed_error: self.max_allowed_error,
            ..base.clone()
        }
    }
}

/// Ordered optimization stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Schedule {
    stages: Vec<StageConfig>,
}

impl Default for Schedule {
    fn default() -> Self {
        Self::new(vec![
            StageConfig::new(1.0, 1.0, 1000, 250),
            StageConfig::new(1.0, 0.0, 1000, 250),
            StageConfig::new(0.9, 0.0, 500, 150),
            StageConfig::new(0.3, 0.0, 250, 100),
            StageConfig::new(0.01, 0.0, 250, 100),
        ])
    }
}

impl Schedule {
    /// Schedule from explicit stages.
    pub fn new(stages: Vec<StageConfig>) -> Self {
        Self { stages }
    }

    /// Single translation-only stage.
    pub fn translation_only(max_iterations: usize, max_plateau_width: usize) -> Self {
        Self::new(vec![StageConfig::new(
            1.0,
            1.0,
            max_iterations,
            max_plateau_width,
        )])
    }

    /// Stages in order.
    pub fn stages(&self) -> &[StageConfig] {
        &self.stages
    }

    /// No stages.
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Run every stage on `graph`.
    ///
    /// A failing stage is logged and leaves the graph with the models it
    /// had before that stage; later stages still run.
    pub fn run(&self, graph: &mut TileGraph, base: &OptimizerConfig) -> ScheduleReport {
        let mut report = ScheduleReport::default();
        for (index, stage) in self.stages.iter().enumerate() {
            let before = graph.snapshot_models();
            graph.for_each_free_model_mut(|_, model| {
                model.set_regularization(stage.lambda_rigid, stage.lambda_translation)
            });

            let mut optimizer = RelaxationOptimizer::new(stage.optimizer_config(base));
            match optimizer.optimize(graph) {
                Ok(result) => {
                    log::debug!(
                        "stage {} (λr={}, λt={}): {} iterations, {:?}, mean error {:.4}",
                        index,
                        stage.lambda_rigid,
                        stage.lambda_translation,
                        result.iterations,
                        result.termination_reason,
                        result.final_error.mean
                    );
                    report.stages.push(StageOutcome::Completed(result));
                }
                Err(e) => {
                    log::warn!("stage {} failed, keeping previous models: {}", index, e);
                    graph.restore_models(before);
                    report.stages.push(StageOutcome::Failed(e));
                }
            }
        }
        report
    }
}

/// What happened in one stage.
#[derive(Debug, Clone)]
pub enum StageOutcome {
    /// Stage ran to a stop condition
    Completed(OptimizationResult),
    /// A fit failed; models were restored
    Failed(ModelError),
}

/// Per-stage outcomes of [`Schedule::run`].
#[derive(Debug, Clone, Default)]
pub struct ScheduleReport {
    /// One entry per stage
    pub stages: Vec<StageOutcome>,
}

impl ScheduleReport {
    /// Number of failed stages.
    pub fn failed_stages(&self) -> usize {
        self.stages
            .iter()
            .filter(|s| matches!(s, StageOutcome::Failed(_)))
            .count()
    }

    /// Mean error after the last completed stage.
    pub fn final_mean_error(&self) -> Option<f64> {
        self.stages.iter().rev().find_map(|s| match s {
            StageOutcome::Completed(r) => Some(r.final_error.mean),
            StageOutcome::Failed(_) => None,
        })
    }
}
