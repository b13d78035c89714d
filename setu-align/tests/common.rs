//! Test utilities for the tile solver.
//!
//! Builders for synthetic montages with known ground-truth transforms.

#![allow(dead_code)]

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use setu_align::{Affine2D, Montage, Point2D, PointMatch, TileGeometry};

/// Layout of a synthetic grid montage.
#[derive(Clone, Debug)]
pub struct GridLayout {
    /// Tile rows per layer
    pub rows: usize,
    /// Tile columns per layer
    pub cols: usize,
    /// Number of layers, starting at z = 0
    pub layers: usize,
    /// Square tile size in pixels
    pub tile_size: f64,
    /// Distance between neighboring tile origins
    pub step: f64,
    /// Offset of each layer relative to the previous one
    pub layer_drift: (f64, f64),
    /// Uniform jitter applied to seed translations (anchor excluded)
    pub seed_jitter: f64,
    /// RNG seed for the jitter
    pub rng_seed: u64,
}

impl Default for GridLayout {
    fn default() -> Self {
        Self {
            rows: 2,
            cols: 2,
            layers: 1,
            tile_size: 120.0,
            step: 100.0,
            layer_drift: (0.0, 0.0),
            seed_jitter: 0.0,
            rng_seed: 42,
        }
    }
}

/// Montage plus the transforms it was generated from.
pub struct SyntheticMontage {
    pub montage: Montage,
    pub truth: BTreeMap<String, Affine2D>,
}

/// Id of the tile at layer `z`, row `r`, column `c`.
pub fn tile_id(z: usize, r: usize, c: usize) -> String {
    format!("z{z}_r{r}_c{c}")
}

/// Id of the tile anchoring the montage.
pub fn anchor_id() -> String {
    tile_id(0, 0, 0)
}

/// Matches sampled on a 3×3 grid inside the world-space overlap of two
/// translated square tiles; `p1` local to `a`, `p2` local to `b`.
pub fn overlap_matches(a: (f64, f64), b: (f64, f64), size: f64) -> Vec<PointMatch> {
    let (x0, x1) = (a.0.max(b.0) + 1.0, (a.0 + size).min(b.0 + size) - 1.0);
    let (y0, y1) = (a.1.max(b.1) + 1.0, (a.1 + size).min(b.1 + size) - 1.0);
    if x1 <= x0 || y1 <= y0 {
        return Vec::new();
    }

    let mut matches = Vec::with_capacity(9);
    for iy in 0..3 {
        for ix in 0..3 {
            let x = x0 + (x1 - x0) * ix as f64 / 2.0;
            let y = y0 + (y1 - y0) * iy as f64 / 2.0;
            matches.push(PointMatch::unweighted(
                Point2D::new(x - a.0, y - a.1),
                Point2D::new(x - b.0, y - b.1),
            ));
        }
    }
    matches
}

/// Grid montage: same-layer neighbors and same-position tiles of adjacent
/// layers are matched.
pub fn grid_montage(layout: &GridLayout) -> SyntheticMontage {
    let mut rng = StdRng::seed_from_u64(layout.rng_seed);
    let mut montage = Montage::new();
    let mut truth = BTreeMap::new();

    let position = |z: usize, r: usize, c: usize| {
        (
            c as f64 * layout.step + z as f64 * layout.layer_drift.0,
            r as f64 * layout.step + z as f64 * layout.layer_drift.1,
        )
    };

    for z in 0..layout.layers {
        for r in 0..layout.rows {
            for c in 0..layout.cols {
                let id = tile_id(z, r, c);
                let (x, y) = position(z, r, c);
                let (jx, jy) = if layout.seed_jitter > 0.0 && id != anchor_id() {
                    (
                        rng.random_range(-layout.seed_jitter..layout.seed_jitter),
                        rng.random_range(-layout.seed_jitter..layout.seed_jitter),
                    )
                } else {
                    (0.0, 0.0)
                };
                montage.add_tile(
                    id.clone(),
                    TileGeometry {
                        width: layout.tile_size,
                        height: layout.tile_size,
                        z: z as i64,
                        seed_transform: Affine2D::translation(x + jx, y + jy),
                    },
                );
                truth.insert(id, Affine2D::translation(x, y));
            }
        }
    }

    for z in 0..layout.layers {
        for r in 0..layout.rows {
            for c in 0..layout.cols {
                let here = position(z, r, c);
                let mut link = |other: String, at: (f64, f64)| {
                    montage.add_matches(
                        tile_id(z, r, c),
                        other,
                        overlap_matches(here, at, layout.tile_size),
                    );
                };
                if c + 1 < layout.cols {
                    link(tile_id(z, r, c + 1), position(z, r, c + 1));
                }
                if r + 1 < layout.rows {
                    link(tile_id(z, r + 1, c), position(z, r + 1, c));
                }
                if z + 1 < layout.layers {
                    link(tile_id(z + 1, r, c), position(z + 1, r, c));
                }
            }
        }
    }

    SyntheticMontage { montage, truth }
}

/// Largest translation error of `solved` against `truth` over all tiles
/// present in both.
pub fn max_translation_error(
    solved: &BTreeMap<String, [f64; 6]>,
    truth: &BTreeMap<String, Affine2D>,
) -> f64 {
    solved
        .iter()
        .filter_map(|(id, p)| {
            let t = truth.get(id)?;
            Some((p[4] - t.m02).abs().max((p[5] - t.m12).abs()))
        })
        .fold(0.0, f64::max)
}

/// Initialize logging once for a test binary.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
