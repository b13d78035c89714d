//! Relaxation optimizer configuration.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// How a sweep visits the free tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepMode {
    /// Gauss-Seidel: each tile sees the models already updated in this sweep
    #[default]
    Sequential,
    /// Jacobi: all tiles fit against the previous sweep, in parallel
    Parallel,
}

/// Configuration for [`super::RelaxationOptimizer`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerConfig {
    /// Stop once the mean tile error is at or below this
    #[serde(default)]
    pub max_allowed_error: f64,

    /// Hard iteration limit
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Window of the plateau test
    #[serde(default = "default_max_plateau_width")]
    pub max_plateau_width: usize,

    /// Largest mean-error slope still counted as flat
    #[serde(default = "default_min_improvement")]
    pub min_improvement: f64,

    /// Fraction of each refit applied per sweep, in (0, 1]
    #[serde(default = "default_damping")]
    pub damping: f64,

    /// Sweep order
    #[serde(default)]
    pub sweep: SweepMode,

    /// Wall-clock limit; the run stops with its current models once passed
    #[serde(skip)]
    pub deadline: Option<Instant>,
}

fn default_max_iterations() -> usize {
    2000
}

fn default_max_plateau_width() -> usize {
    200
}

fn default_min_improvement() -> f64 {
    1e-4
}

fn default_damping() -> f64 {
    1.0
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            max_allowed_error: 0.0,
            max_iterations: default_max_iterations(),
            max_plateau_width: default_max_plateau_width(),
            min_improvement: default_min_improvement(),
            damping: default_damping(),
            sweep: SweepMode::default(),
            deadline: None,
        }
    }
}

impl OptimizerConfig {
    /// Bounded budget used for section stitching.
    pub fn stitching() -> Self {
        Self {
            max_iterations: 500,
            max_plateau_width: 50,
            ..Self::default()
        }
    }

    /// Budget of the coarse block-level merge.
    pub fn merge() -> Self {
        Self {
            max_iterations: 1000,
            max_plateau_width: 500,
            ..Self::default()
        }
    }

    /// Same configuration with a deadline `budget` from now.
    pub fn with_time_budget(mut self, budget: Duration) -> Self {
        self.deadline = Some(Instant::now() + budget);
        self
    }

    /// Deadline has passed.
    pub fn deadline_passed(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Damping clamped into (0, 1].
    pub(crate) fn effective_damping(&self) -> f64 {
        if self.damping.is_finite() && self.damping > 0.0 {
            self.damping.min(1.0)
        } else {
            1.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c = OptimizerConfig::default();
        assert_eq!(c.max_iterations, 2000);
        assert_eq!(c.min_improvement, 1e-4);
        assert_eq!(c.sweep, SweepMode::Sequential);
        assert!(!c.deadline_passed());
    }

    #[test]
    fn test_yaml_partial() {
        let c: OptimizerConfig = serde_yaml::from_str("max_iterations: 10\nsweep: parallel\n").unwrap();
        assert_eq!(c.max_iterations, 10);
        assert_eq!(c.sweep, SweepMode::Parallel);
        assert_eq!(c.max_plateau_width, 200);
    }

    #[test]
    fn test_effective_damping() {
        let mut c = OptimizerConfig::default();
        c.damping = 0.0;
        assert_eq!(c.effective_damping(), 1.0);
        c.damping = 0.4;
        assert_eq!(c.effective_damping(), 0.4);
    }

    #[test]
    fn test_time_budget() {
        let c = OptimizerConfig::default().with_time_budget(Duration::ZERO);
        assert!(c.deadline_passed());
    }
}
