//! Iterative relaxation of a tile graph.
//!
//! # Algorithm
//!
//! Every sweep refits each free tile's model by weighted least squares
//! against its neighbors' current models:
//!
//! ```text
//! model_i ← fit({ (p1, model_j(p2)) | (p1, p2) ∈ links(i, j) })
//! ```
//!
//! The mean of the per-tile errors is tracked. A run stops on the first of:
//! mean error ≤ `max_allowed_error`, a plateau of the mean error over the
//! last `max_plateau_width` sweeps, the iteration limit, or the deadline.
//!
//! A failing fit aborts the run, restores the models the graph had before
//! it, and returns the error so the caller can log it and carry on.

use rayon::prelude::*;

use super::config::{OptimizerConfig, SweepMode};
use super::error_statistic::ErrorStatistic;
use crate::core::{Model, PointMatch};
use crate::error::ModelError;
use crate::graph::{TileGraph, identify_connected_components};

/// Lifecycle of an optimizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizerState {
    /// Nothing run yet
    Unsolved,
    /// Pre-alignment done
    PreAligned,
    /// Sweeps in progress
    Optimizing,
    /// Error target or plateau reached
    Converged,
    /// Iteration limit hit first
    MaxIterationsReached,
    /// Deadline hit first; models are the last completed sweep
    DeadlineExceeded,
    /// A fit failed; models restored
    Failed,
}

/// Reason for optimization termination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// Mean error at or below the allowed maximum
    Converged,
    /// Mean error stopped changing
    Plateau,
    /// Iteration limit reached
    MaxIterations,
    /// Deadline passed
    DeadlineExceeded,
    /// Every tile is fixed or unconnected
    NoFreeTiles,
}

/// Minimum, mean and maximum per-tile error.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ErrorSummary {
    /// Smallest tile error
    pub min: f64,
    /// Mean tile error
    pub mean: f64,
    /// Largest tile error
    pub max: f64,
}

impl std::fmt::Display for ErrorSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "min={:.4} mean={:.4} max={:.4}",
            self.min, self.mean, self.max
        )
    }
}

/// Per-tile error statistics over all tiles that have matches.
pub fn compute_errors(graph: &TileGraph) -> ErrorSummary {
    let mut count = 0usize;
    let mut sum = 0.0;
    let mut min = f64::INFINITY;
    let mut max = 0.0f64;
    for i in 0..graph.len() {
        if let Some(e) = graph.tile_error(i) {
            count += 1;
            sum += e;
            min = min.min(e);
            max = max.max(e);
        }
    }
    if count == 0 {
        return ErrorSummary::default();
    }
    ErrorSummary {
        min,
        mean: sum / count as f64,
        max,
    }
}

/// Result of [`RelaxationOptimizer::pre_align`].
#[derive(Debug, Clone, Default)]
pub struct PreAlignReport {
    /// Connected components visited
    pub components: usize,
    /// Tiles whose model was refit
    pub aligned: usize,
    /// Errors after pre-alignment
    pub errors: ErrorSummary,
}

/// Result of [`RelaxationOptimizer::optimize`].
#[derive(Debug, Clone)]
pub struct OptimizationResult {
    /// Sweeps performed
    pub iterations: usize,
    /// Errors before the first sweep
    pub initial_error: ErrorSummary,
    /// Errors after the last sweep
    pub final_error: ErrorSummary,
    /// Stopped on the error target or a plateau
    pub converged: bool,
    /// Why the run stopped
    pub termination_reason: TerminationReason,
}

/// Relaxation optimizer over a [`TileGraph`].
#[derive(Debug, Clone)]
pub struct RelaxationOptimizer {
    config: OptimizerConfig,
    state: OptimizerState,
}

impl RelaxationOptimizer {
    /// Create an optimizer.
    pub fn new(config: OptimizerConfig) -> Self {
        Self {
            config,
            state: OptimizerState::Unsolved,
        }
    }

    /// Configuration in use.
    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Current lifecycle state.
    pub fn state(&self) -> OptimizerState {
        self.state
    }

    /// Breadth-first pre-alignment.
    ///
    /// Each component is rooted at its fixed tiles, or at its most
    /// connected tile if none is fixed. Every newly reached tile is fit
    /// against all of its already aligned neighbors.
    pub fn pre_align(&mut self, graph: &mut TileGraph) -> Result<PreAlignReport, ModelError> {
        let snapshot = graph.snapshot_models();
        match pre_align_components(graph) {
            Ok((components, aligned)) => {
                self.state = OptimizerState::PreAligned;
                Ok(PreAlignReport {
                    components,
                    aligned,
                    errors: compute_errors(graph),
                })
            }
            Err(e) => {
                graph.restore_models(snapshot);
                self.state = OptimizerState::Failed;
                Err(e)
            }
        }
    }

    /// Run relaxation sweeps until a stop condition holds.
    pub fn optimize(&mut self, graph: &mut TileGraph) -> Result<OptimizationResult, ModelError> {
        let initial_error = compute_errors(graph);
        let free: Vec<usize> = (0..graph.len())
            .filter(|&i| !graph.is_fixed(i) && graph.node(i).is_some_and(|n| n.match_count() > 0))
            .collect();

        if free.is_empty() {
            self.state = OptimizerState::Converged;
            return Ok(OptimizationResult {
                iterations: 0,
                initial_error,
                final_error: initial_error,
                converged: true,
                termination_reason: TerminationReason::NoFreeTiles,
            });
        }

        let snapshot = graph.snapshot_models();
        self.state = OptimizerState::Optimizing;

        let width = self.config.max_plateau_width.max(1);
        let mut observer = ErrorStatistic::new(width + 1);
        let mut current = initial_error;
        let mut iterations = 0;
        let mut reason = TerminationReason::MaxIterations;

        while iterations < self.config.max_iterations {
            if self.config.deadline_passed() {
                reason = TerminationReason::DeadlineExceeded;
                break;
            }

            let sweep = match self.config.sweep {
                SweepMode::Sequential => self.sweep_sequential(graph, &free),
                SweepMode::Parallel => self.sweep_parallel(graph, &free),
            };
            if let Err(e) = sweep {
                graph.restore_models(snapshot);
                self.state = OptimizerState::Failed;
                return Err(e);
            }
            iterations += 1;

            current = compute_errors(graph);
            observer.add(current.mean);

            if current.mean <= self.config.max_allowed_error {
                reason = TerminationReason::Converged;
                break;
            }
            if iterations > width && observer.is_plateau(width, self.config.min_improvement) {
                reason = TerminationReason::Plateau;
                break;
            }
        }

        self.state = match reason {
            TerminationReason::Converged
            | TerminationReason::Plateau
            | TerminationReason::NoFreeTiles => OptimizerState::Converged,
            TerminationReason::MaxIterations => OptimizerState::MaxIterationsReached,
            TerminationReason::DeadlineExceeded => OptimizerState::DeadlineExceeded,
        };

        log::debug!(
            "optimize: {} iterations, {:?}, error {} -> {}",
            iterations,
            reason,
            initial_error,
            current
        );

        Ok(OptimizationResult {
            iterations,
            initial_error,
            final_error: current,
            converged: matches!(
                reason,
                TerminationReason::Converged | TerminationReason::Plateau
            ),
            termination_reason: reason,
        })
    }

    /// Gauss-Seidel pass: models are updated in place, in index order.
    fn sweep_sequential(&self, graph: &mut TileGraph, free: &[usize]) -> Result<(), ModelError> {
        let damping = self.config.effective_damping();
        for &i in free {
            let matches = graph.fit_matches(i);
            let next = refit(graph.model(i), &matches, damping)?;
            *graph.model_mut(i) = next;
        }
        Ok(())
    }

    /// Jacobi pass: all fits read the same snapshot, then are written back.
    fn sweep_parallel(&self, graph: &mut TileGraph, free: &[usize]) -> Result<(), ModelError> {
        let damping = self.config.effective_damping();
        let shared: &TileGraph = graph;
        let updates = free
            .par_iter()
            .map(|&i| {
                let matches = shared.fit_matches(i);
                refit(shared.model(i), &matches, damping).map(|m| (i, m))
            })
            .collect::<Result<Vec<(usize, Model)>, ModelError>>()?;
        for (i, model) in updates {
            *graph.model_mut(i) = model;
        }
        Ok(())
    }
}

fn refit(current: &Model, matches: &[PointMatch], damping: f64) -> Result<Model, ModelError> {
    let fitted = current.fit(matches)?;
    Ok(current.damped_towards(fitted, damping))
}

/// Returns (components visited, tiles refit).
fn pre_align_components(graph: &mut TileGraph) -> Result<(usize, usize), ModelError> {
    let components = identify_connected_components(graph);
    let mut aligned_count = 0;
    let mut aligned = vec![false; graph.len()];

    for component in &components {
        let fixed: Vec<usize> = component
            .iter()
            .copied()
            .filter(|&i| graph.is_fixed(i))
            .collect();
        let roots = if fixed.is_empty() {
            // most distinct neighbors, lowest index on ties
            let root = component
                .iter()
                .copied()
                .max_by(|&a, &b| {
                    graph
                        .neighbors(a)
                        .len()
                        .cmp(&graph.neighbors(b).len())
                        .then(b.cmp(&a))
                })
                .unwrap_or(component[0]);
            vec![root]
        } else {
            fixed
        };

        let mut queue = std::collections::VecDeque::new();
        for &r in &roots {
            aligned[r] = true;
            queue.push_back(r);
        }

        while let Some(current) = queue.pop_front() {
            for next in graph.neighbors(current) {
                if aligned[next] {
                    continue;
                }
                let matches = graph.fit_matches_filtered(next, |j| aligned[j]);
                let fitted = graph.model(next).fit(&matches)?;
                *graph.model_mut(next) = fitted;
                aligned[next] = true;
                aligned_count += 1;
                queue.push_back(next);
            }
        }
    }

    Ok((components.len(), aligned_count))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Affine2D, ModelKind, Point2D};
    use approx::assert_relative_eq;

    /// Chain of `n` tiles, each 100px right of the previous, all starting at identity.
    fn chain(n: usize, kind: ModelKind) -> TileGraph {
        let mut g = TileGraph::new();
        for _ in 0..n {
            g.add_tile(Model::identity(kind));
        }
        for i in 0..n - 1 {
            let matches: Vec<PointMatch> = [(110.0, 10.0), (150.0, 80.0), (180.0, 40.0)]
                .iter()
                .map(|&(x, y)| {
                    PointMatch::unweighted(Point2D::new(x, y), Point2D::new(x - 100.0, y))
                })
                .collect();
            g.connect(i, i + 1, matches).unwrap();
        }
        g
    }

    #[test]
    fn test_pre_align_chain_from_fixed() {
        let mut g = chain(4, ModelKind::Translation);
        g.fix_tile(0).unwrap();
        let mut opt = RelaxationOptimizer::new(OptimizerConfig::default());
        let report = opt.pre_align(&mut g).unwrap();

        assert_eq!(opt.state(), OptimizerState::PreAligned);
        assert_eq!(report.components, 1);
        assert_eq!(report.aligned, 3);
        assert_relative_eq!(g.model(3).affine().m02, 300.0, epsilon = 1e-9);
        assert_relative_eq!(report.errors.max, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_pre_align_without_fixed_uses_most_connected() {
        let mut g = chain(3, ModelKind::Translation);
        let mut opt = RelaxationOptimizer::new(OptimizerConfig::default());
        opt.pre_align(&mut g).unwrap();
        // tile 1 has two neighbors and stays at identity
        assert_relative_eq!(g.model(1).affine().m02, 0.0);
        assert_relative_eq!(g.model(0).affine().m02, -100.0, epsilon = 1e-9);
        assert_relative_eq!(g.model(2).affine().m02, 100.0, epsilon = 1e-9);
    }

    #[test]
    fn test_pre_align_failure_restores_models() {
        let mut g = TileGraph::new();
        g.add_tile(Model::identity(ModelKind::Affine));
        g.add_tile(Model::Affine(Affine2D::translation(7.0, 7.0)));
        g.connect(
            0,
            1,
            [PointMatch::unweighted(Point2D::default(), Point2D::default())],
        )
        .unwrap();
        g.fix_tile(0).unwrap();

        let mut opt = RelaxationOptimizer::new(OptimizerConfig::default());
        let err = opt.pre_align(&mut g).unwrap_err();
        assert!(matches!(err, ModelError::NotEnoughDataPoints { .. }));
        assert_eq!(opt.state(), OptimizerState::Failed);
        assert_relative_eq!(g.model(1).affine().m02, 7.0);
    }

    #[test]
    fn test_optimize_converges_on_chain() {
        let mut g = chain(5, ModelKind::Translation);
        g.fix_tile(0).unwrap();
        let config = OptimizerConfig {
            max_allowed_error: 1e-6,
            ..OptimizerConfig::default()
        };
        let mut opt = RelaxationOptimizer::new(config);
        let result = opt.optimize(&mut g).unwrap();

        assert!(result.converged);
        assert_eq!(result.termination_reason, TerminationReason::Converged);
        assert_eq!(opt.state(), OptimizerState::Converged);
        assert_relative_eq!(g.model(4).affine().m02, 400.0, epsilon = 1e-3);
    }

    #[test]
    fn test_parallel_sweep_matches_sequential() {
        let config = OptimizerConfig {
            max_allowed_error: 1e-6,
            ..OptimizerConfig::default()
        };
        let mut seq = chain(4, ModelKind::Translation);
        seq.fix_tile(0).unwrap();
        let mut par = seq.clone();

        RelaxationOptimizer::new(config.clone())
            .optimize(&mut seq)
            .unwrap();
        RelaxationOptimizer::new(OptimizerConfig {
            sweep: SweepMode::Parallel,
            ..config
        })
        .optimize(&mut par)
        .unwrap();

        for i in 0..4 {
            assert_relative_eq!(
                seq.model(i).affine().m02,
                par.model(i).affine().m02,
                epsilon = 1e-3
            );
        }
    }

    #[test]
    fn test_optimize_is_idempotent_when_converged() {
        let mut g = chain(3, ModelKind::Translation);
        g.fix_tile(0).unwrap();
        let mut opt = RelaxationOptimizer::new(OptimizerConfig::default());
        opt.pre_align(&mut g).unwrap();

        let before = compute_errors(&g);
        let result = opt.optimize(&mut g).unwrap();
        assert!((result.final_error.mean - before.mean).abs() < 1e-4);
    }

    #[test]
    fn test_optimize_plateau_stops_early() {
        // inconsistent matches: the error cannot reach zero
        let mut g = TileGraph::new();
        g.add_tile(Model::identity(ModelKind::Translation));
        g.add_tile(Model::identity(ModelKind::Translation));
        let o = Point2D::default();
        g.connect(0, 1, [PointMatch::unweighted(o, Point2D::new(10.0, 0.0))])
            .unwrap();
        g.connect(0, 1, [PointMatch::unweighted(o, Point2D::new(-10.0, 0.0))])
            .unwrap();
        g.fix_tile(0).unwrap();

        let config = OptimizerConfig {
            max_iterations: 1000,
            max_plateau_width: 8,
            ..OptimizerConfig::default()
        };
        let mut opt = RelaxationOptimizer::new(config);
        let result = opt.optimize(&mut g).unwrap();
        assert_eq!(result.termination_reason, TerminationReason::Plateau);
        assert!(result.iterations < 1000);
        assert_relative_eq!(result.final_error.mean, 10.0, epsilon = 1e-9);
    }

    #[test]
    fn test_optimize_no_free_tiles() {
        let mut g = chain(2, ModelKind::Translation);
        g.fix_tile(0).unwrap();
        g.fix_tile(1).unwrap();
        let result = RelaxationOptimizer::new(OptimizerConfig::default())
            .optimize(&mut g)
            .unwrap();
        assert_eq!(result.termination_reason, TerminationReason::NoFreeTiles);
        assert_eq!(result.iterations, 0);
    }

    #[test]
    fn test_optimize_deadline() {
        let mut g = chain(3, ModelKind::Translation);
        let config =
            OptimizerConfig::default().with_time_budget(std::time::Duration::ZERO);
        let mut opt = RelaxationOptimizer::new(config);
        let result = opt.optimize(&mut g).unwrap();
        assert_eq!(result.termination_reason, TerminationReason::DeadlineExceeded);
        assert_eq!(opt.state(), OptimizerState::DeadlineExceeded);
    }
}
