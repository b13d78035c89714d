//! Graph-level alignment tests: models, connectivity and relaxation.

mod common;

use std::collections::BTreeSet;

use approx::assert_relative_eq;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use setu_align::graph::is_cyclic;
use setu_align::optimizer::TerminationReason;
use setu_align::{
    Affine2D, Model, ModelKind, OptimizerConfig, Point2D, PointMatch, RelaxationOptimizer,
    SweepMode, TileGraph, identify_connected_components,
};

/// 2×2 grid at (0,0), (100,0), (0,100), (100,100); all models at identity.
fn grid_graph(kind: ModelKind) -> TileGraph {
    let positions = [(0.0, 0.0), (100.0, 0.0), (0.0, 100.0), (100.0, 100.0)];
    let mut graph = TileGraph::new();
    for _ in positions {
        graph.add_tile(Model::identity(kind));
    }
    for (a, b) in [(0, 1), (0, 2), (1, 3), (2, 3)] {
        graph
            .connect(a, b, common::overlap_matches(positions[a], positions[b], 120.0))
            .unwrap();
    }
    graph.fix_tile(0).unwrap();
    graph
}

// ============================================================================
// Model properties
// ============================================================================

#[test]
fn test_exact_fit_translation_and_rigid() {
    let translation = Model::identity(ModelKind::Translation)
        .fit(&[PointMatch::unweighted(
            Point2D::new(3.0, 4.0),
            Point2D::new(10.0, -2.0),
        )])
        .unwrap();
    assert_eq!(translation.affine(), Affine2D::translation(7.0, -6.0));

    let truth = Affine2D::rigid(0.4, 12.0, -3.0);
    let matches: Vec<PointMatch> = [Point2D::new(0.0, 0.0), Point2D::new(50.0, 20.0)]
        .iter()
        .map(|p| PointMatch::unweighted(*p, truth.apply(p)))
        .collect();
    let rigid = Model::identity(ModelKind::Rigid).fit(&matches).unwrap().affine();
    for (got, want) in rigid.to_params().iter().zip(truth.to_params()) {
        assert_relative_eq!(*got, want, epsilon = 1e-9);
    }
}

#[test]
fn test_invert_round_trip_all_kinds() {
    let mut rng = StdRng::seed_from_u64(7);
    let models = [
        Model::from_affine(ModelKind::Translation, Affine2D::translation(15.0, -8.0)),
        Model::from_affine(ModelKind::Rigid, Affine2D::rigid(-1.1, 3.0, 40.0)),
        Model::from_affine(
            ModelKind::Affine,
            Affine2D::from_params([1.2, 0.1, -0.3, 0.9, 5.0, 6.0]),
        ),
    ];

    for model in &models {
        let inverse = model.invert().unwrap();
        assert_eq!(inverse.kind(), model.kind());
        for _ in 0..20 {
            let p = Point2D::new(rng.random_range(-500.0..500.0), rng.random_range(-500.0..500.0));
            let back = inverse.apply(&model.apply(&p));
            assert_relative_eq!(back.x, p.x, epsilon = 1e-9);
            assert_relative_eq!(back.y, p.y, epsilon = 1e-9);
        }
    }
}

// ============================================================================
// Connectivity
// ============================================================================

#[test]
fn test_random_graph_components_partition_tiles() {
    let mut rng = StdRng::seed_from_u64(1234);
    let m = vec![PointMatch::unweighted(Point2D::new(0.0, 0.0), Point2D::new(1.0, 1.0))];

    for _ in 0..25 {
        let n = rng.random_range(1..40);
        let mut graph = TileGraph::new();
        for _ in 0..n {
            graph.add_tile(Model::identity(ModelKind::Translation));
        }
        let edges = rng.random_range(0..n * 2);
        for _ in 0..edges {
            let (a, b) = (rng.random_range(0..n), rng.random_range(0..n));
            graph.connect(a, b, m.clone()).unwrap();
        }

        let components = identify_connected_components(&graph);

        let mut component_of = vec![usize::MAX; n];
        for (ci, component) in components.iter().enumerate() {
            for &t in component {
                assert_eq!(component_of[t], usize::MAX, "tile {t} in two components");
                component_of[t] = ci;
            }
        }
        assert!(component_of.iter().all(|&c| c != usize::MAX));

        for (a, b) in graph.edge_pairs() {
            assert_eq!(component_of[a], component_of[b]);
        }
    }
}

#[test]
fn test_grid_is_cyclic_chain_is_not() {
    let graph = grid_graph(ModelKind::Rigid);
    assert!(is_cyclic(&graph, &[0, 1, 2, 3]));

    let mut chain = TileGraph::new();
    for _ in 0..3 {
        chain.add_tile(Model::identity(ModelKind::Rigid));
    }
    let m = common::overlap_matches((0.0, 0.0), (100.0, 0.0), 120.0);
    chain.connect(0, 1, m.clone()).unwrap();
    chain.connect(1, 2, m).unwrap();
    assert!(!is_cyclic(&chain, &[0, 1, 2]));
}

// ============================================================================
// Relaxation
// ============================================================================

#[test]
fn test_grid_2x2_recovers_offsets() {
    common::init_logging();
    let mut graph = grid_graph(ModelKind::Rigid);

    let mut optimizer = RelaxationOptimizer::new(OptimizerConfig::default());
    optimizer.pre_align(&mut graph).unwrap();
    let result = optimizer.optimize(&mut graph).unwrap();
    assert!(result.final_error.mean < 1e-6);

    let expected = [(100.0, 0.0), (0.0, 100.0), (100.0, 100.0)];
    for (i, (x, y)) in expected.iter().enumerate() {
        let m = graph.model(i + 1).affine();
        assert!((m.m02 - x).abs() < 1e-3, "tile {}: x {} vs {}", i + 1, m.m02, x);
        assert!((m.m12 - y).abs() < 1e-3, "tile {}: y {} vs {}", i + 1, m.m12, y);
    }
    assert_eq!(graph.model(0).affine(), Affine2D::identity());
}

#[test]
fn test_grid_2x2_without_pre_align() {
    let mut graph = grid_graph(ModelKind::Translation);
    let config = OptimizerConfig {
        max_allowed_error: 1e-6,
        ..OptimizerConfig::default()
    };
    let result = RelaxationOptimizer::new(config).optimize(&mut graph).unwrap();

    assert_eq!(result.termination_reason, TerminationReason::Converged);
    assert_relative_eq!(graph.model(3).affine().m02, 100.0, epsilon = 1e-3);
    assert_relative_eq!(graph.model(3).affine().m12, 100.0, epsilon = 1e-3);
}

#[test]
fn test_optimize_twice_is_idempotent() {
    let mut graph = grid_graph(ModelKind::Affine);
    let config = OptimizerConfig::default();
    let mut optimizer = RelaxationOptimizer::new(config.clone());
    optimizer.pre_align(&mut graph).unwrap();
    let first = optimizer.optimize(&mut graph).unwrap();
    let second = optimizer.optimize(&mut graph).unwrap();

    let change = (first.final_error.mean - second.final_error.mean).abs();
    assert!(change < config.min_improvement, "mean error moved by {change}");
}

#[test]
fn test_parallel_sweep_reaches_same_solution() {
    let mut sequential = grid_graph(ModelKind::Translation);
    let mut parallel = grid_graph(ModelKind::Translation);

    RelaxationOptimizer::new(OptimizerConfig::default())
        .optimize(&mut sequential)
        .unwrap();
    RelaxationOptimizer::new(OptimizerConfig {
        sweep: SweepMode::Parallel,
        ..OptimizerConfig::default()
    })
    .optimize(&mut parallel)
    .unwrap();

    for i in 0..4 {
        let (s, p) = (sequential.model(i).affine(), parallel.model(i).affine());
        assert_relative_eq!(s.m02, p.m02, epsilon = 1e-3);
        assert_relative_eq!(s.m12, p.m12, epsilon = 1e-3);
    }
}

#[test]
fn test_weightless_matches_are_never_stored() {
    let mut graph = TileGraph::new();
    graph.add_tile(Model::default());
    graph.add_tile(Model::default());
    let matches = vec![
        PointMatch::new(Point2D::new(0.0, 0.0), Point2D::new(1.0, 0.0), 0.0),
        PointMatch::new(Point2D::new(5.0, 0.0), Point2D::new(6.0, 0.0), -1.0),
    ];
    assert_eq!(graph.connect(0, 1, matches).unwrap(), 0);
    assert!(graph.neighbors(0).is_empty());
    assert_eq!(identify_connected_components(&graph).len(), 2);
    assert_eq!(graph.neighbors(1), BTreeSet::new());
}
