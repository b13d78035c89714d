//! Solve a synthetic montage and report the recovered transforms.
//!
//! This example demonstrates:
//! - Building a layered grid montage with drifting, noisy seed transforms
//! - Loading the solver configuration (or using defaults)
//! - Solving the layer range in overlapping blocks and merging them
//! - Optionally saving the montage as YAML for later runs
//!
//! # Usage
//!
//! ```bash
//! RUST_LOG=info cargo run --example synthetic_montage -- [layers] [block_size] [montage.yaml]
//! ```

use std::path::Path;
use std::time::Instant;

use setu_align::{
    Affine2D, DistributedSolver, Montage, Point2D, PointMatch, SetuConfig, TileGeometry,
};

const ROWS: usize = 3;
const COLS: usize = 3;
const STEP: f64 = 900.0;
const SIZE: f64 = 1000.0;

fn tile_id(z: usize, r: usize, c: usize) -> String {
    format!("{z}.r{r}c{c}")
}

/// Ground-truth placement: a slow per-layer drift on top of the grid.
fn truth(z: usize, r: usize, c: usize) -> (f64, f64) {
    (
        c as f64 * STEP + z as f64 * 2.5,
        r as f64 * STEP - z as f64 * 1.5,
    )
}

fn overlap(a: (f64, f64), b: (f64, f64)) -> Vec<PointMatch> {
    let (x0, x1) = (a.0.max(b.0) + 5.0, (a.0 + SIZE).min(b.0 + SIZE) - 5.0);
    let (y0, y1) = (a.1.max(b.1) + 5.0, (a.1 + SIZE).min(b.1 + SIZE) - 5.0);
    let mut matches = Vec::new();
    for iy in 0..4 {
        for ix in 0..4 {
            let x = x0 + (x1 - x0) * ix as f64 / 3.0;
            let y = y0 + (y1 - y0) * iy as f64 / 3.0;
            matches.push(PointMatch::unweighted(
                Point2D::new(x - a.0, y - a.1),
                Point2D::new(x - b.0, y - b.1),
            ));
        }
    }
    matches
}

fn build_montage(layers: usize) -> Montage {
    let mut montage = Montage::new();
    for z in 0..layers {
        for r in 0..ROWS {
            for c in 0..COLS {
                let (x, y) = truth(z, r, c);
                // seeds know the grid but not the drift
                let seed = Affine2D::translation(c as f64 * STEP, r as f64 * STEP);
                montage.add_tile(
                    tile_id(z, r, c),
                    TileGeometry {
                        width: SIZE,
                        height: SIZE,
                        z: z as i64,
                        seed_transform: if (z, r, c) == (0, 0, 0) {
                            Affine2D::translation(x, y)
                        } else {
                            seed
                        },
                    },
                );
            }
        }
    }

    for z in 0..layers {
        for r in 0..ROWS {
            for c in 0..COLS {
                let here = truth(z, r, c);
                let mut neighbors = Vec::new();
                if c + 1 < COLS {
                    neighbors.push((z, r, c + 1));
                }
                if r + 1 < ROWS {
                    neighbors.push((z, r + 1, c));
                }
                if z + 1 < layers {
                    neighbors.push((z + 1, r, c));
                }
                for (nz, nr, nc) in neighbors {
                    montage.add_matches(
                        tile_id(z, r, c),
                        tile_id(nz, nr, nc),
                        overlap(here, truth(nz, nr, nc)),
                    );
                }
            }
        }
    }
    montage
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().collect();
    let layers: usize = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(12);
    let block_size: usize = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(4);

    let config = match SetuConfig::load_default() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config: {}", e);
            std::process::exit(1);
        }
    };

    let montage = build_montage(layers);
    println!(
        "Montage: {} tiles, {} match sets, {} layers",
        montage.tiles.len(),
        montage.match_sets.len(),
        montage.layers().len()
    );

    if let Some(path) = args.get(3) {
        match montage.save(Path::new(path)) {
            Ok(()) => println!("Saved montage to {}", path),
            Err(e) => eprintln!("Failed to save montage: {}", e),
        }
    }

    let solver =
        DistributedSolver::new(config, &montage, &montage).with_fixed_tiles([tile_id(0, 0, 0)]);

    let start = Instant::now();
    let solution = match solver.solve_configured(0, layers as i64 - 1, block_size) {
        Ok(solution) => solution,
        Err(e) => {
            eprintln!("Solve failed: {}", e);
            std::process::exit(1);
        }
    };
    let elapsed = start.elapsed();

    for (block, error) in &solution.failures {
        eprintln!("Block {} failed: {}", block, error);
    }

    let mut worst: f64 = 0.0;
    for (id, params) in solution.transforms() {
        let Some((z, rest)) = id.split_once(".r") else {
            continue;
        };
        let (Ok(z), Some((r, c))) = (z.parse::<usize>(), rest.split_once('c')) else {
            continue;
        };
        let (Ok(r), Ok(c)) = (r.parse::<usize>(), c.parse::<usize>()) else {
            continue;
        };
        let (x, y) = truth(z, r, c);
        worst = worst.max((params[4] - x).abs()).max((params[5] - y).abs());
    }

    println!("\n=== Result ===");
    println!("Solved tiles:      {}", solution.global.models.len());
    println!("Failed blocks:     {}", solution.failures.len());
    println!("Max offset error:  {:.4} px", worst);
    println!("Elapsed:           {:.2?}", elapsed);
}
