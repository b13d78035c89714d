//! Per-layer regularization lambdas.
//!
//! After a block is solved each layer gets a lambda that later solves can
//! use as a regularization weight. [`ConstantLambda`] assigns one value to
//! every layer. [`DriftCurvatureLambda`] derives it from how much the
//! layers' minimum bounds move from one layer to the next:
//!
//! ```text
//! offset(z)   = min over tiles of new_model((0, h/2)), new_model((w/2, 0))
//! drift(z)    = (offset(z-1) - offset(z))²                  per axis
//! smoothed(z) = gauss(drift_x, σ=20) + gauss(drift_y, σ=20)
//! lambda(z)   = gauss(curve(smoothed), σ=5)
//! ```
//! Borders are mirrored without repeating the edge sample.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::item::SolveItem;
use crate::core::Point2D;

/// Computes lambdas for the layers of a solved block.
pub trait LambdaPolicy: Send + Sync {
    /// Lambda per layer of `item`.
    fn layer_lambdas(&self, item: &SolveItem) -> BTreeMap<i64, f64>;
}

/// Same lambda for every layer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConstantLambda {
    /// Lambda value
    pub value: f64,
}

impl Default for ConstantLambda {
    fn default() -> Self {
        Self { value: 0.1 }
    }
}

impl LambdaPolicy for ConstantLambda {
    fn layer_lambdas(&self, item: &SolveItem) -> BTreeMap<i64, f64> {
        item.layers().map(|z| (z, self.value)).collect()
    }
}

/// Quadratic response below a cut-off, constant tail above it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuadraticCurve {
    /// x² coefficient
    pub a: f64,
    /// x coefficient
    pub b: f64,
    /// Constant term
    pub c: f64,
    /// Inputs at or above this use `tail`
    pub cutoff: f64,
    /// Value above the cut-off
    pub tail: f64,
    /// Factor applied to both branches
    pub scale: f64,
}

impl Default for QuadraticCurve {
    fn default() -> Self {
        Self {
            a: 0.000023333,
            b: -0.005233333,
            c: 0.3,
            cutoff: 115.0,
            tail: 0.00674563,
            scale: 0.5,
        }
    }
}

impl QuadraticCurve {
    /// Evaluate, clamped at zero.
    pub fn eval(&self, x: f64) -> f64 {
        let y = if x < self.cutoff {
            (self.a * x * x + self.b * x + self.c) * self.scale
        } else {
            self.tail * self.scale
        };
        y.max(0.0)
    }
}

/// Lambda from layer-to-layer drift of the block's minimum bounds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DriftCurvatureLambda {
    /// Tuning curve
    #[serde(default)]
    pub curve: QuadraticCurve,
    /// Smoothing of the squared drift
    #[serde(default = "default_drift_sigma")]
    pub drift_sigma: f64,
    /// Smoothing of the resulting lambdas
    #[serde(default = "default_lambda_sigma")]
    pub lambda_sigma: f64,
}

fn default_drift_sigma() -> f64 {
    20.0
}

fn default_lambda_sigma() -> f64 {
    5.0
}

impl Default for DriftCurvatureLambda {
    fn default() -> Self {
        Self {
            curve: QuadraticCurve::default(),
            drift_sigma: default_drift_sigma(),
            lambda_sigma: default_lambda_sigma(),
        }
    }
}

impl LambdaPolicy for DriftCurvatureLambda {
    fn layer_lambdas(&self, item: &SolveItem) -> BTreeMap<i64, f64> {
        let layers: Vec<i64> = item.layers().collect();
        if layers.is_empty() {
            return BTreeMap::new();
        }

        let offsets: Vec<Point2D> = layers.iter().map(|&z| layer_min_bounds(item, z)).collect();
        let n = offsets.len();

        let mut drift_x = Vec::with_capacity(n);
        let mut drift_y = Vec::with_capacity(n);
        for i in 0..n {
            let prev = offsets[mirror_index(i as isize - 1, n)];
            drift_x.push((prev.x - offsets[i].x).powi(2));
            drift_y.push((prev.y - offsets[i].y).powi(2));
        }

        let smooth_x = gaussian_smooth(&drift_x, self.drift_sigma);
        let smooth_y = gaussian_smooth(&drift_y, self.drift_sigma);

        let raw: Vec<f64> = smooth_x
            .iter()
            .zip(&smooth_y)
            .map(|(x, y)| self.curve.eval(x + y))
            .collect();
        let lambdas = gaussian_smooth(&raw, self.lambda_sigma);

        log::debug!(
            "block {}: drift lambdas over {} layers, first={:.5}",
            item.id(),
            n,
            lambdas[0]
        );

        layers.into_iter().zip(lambdas).collect()
    }
}

/// Minimum x and y of the half-edge sample points of every tile in a layer,
/// mapped through the solved (or else seed) model.
fn layer_min_bounds(item: &SolveItem, z: i64) -> Point2D {
    let mut min_x = f64::INFINITY;
    let mut min_y = f64::INFINITY;
    for t in item.tile_indices_at(z) {
        let record = &item.tiles()[t];
        let model = record.new_model.as_ref().unwrap_or(&record.seed_model);
        let g = &record.geometry;
        for sample in [
            Point2D::new(0.0, g.height / 2.0),
            Point2D::new(g.width / 2.0, 0.0),
        ] {
            let p = model.apply(&sample);
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
        }
    }
    Point2D::new(min_x, min_y)
}

/// Reflect an out-of-range index back into `0..n`, edge sample not repeated.
fn mirror_index(i: isize, n: usize) -> usize {
    if n <= 1 {
        return 0;
    }
    let period = 2 * (n as isize - 1);
    let m = i.rem_euclid(period);
    if m >= n as isize {
        (period - m) as usize
    } else {
        m as usize
    }
}

/// Gaussian filter with mirrored borders.
fn gaussian_smooth(values: &[f64], sigma: f64) -> Vec<f64> {
    if values.is_empty() || sigma <= 0.0 {
        return values.to_vec();
    }
    let radius = (3.0 * sigma).ceil() as isize;
    let kernel: Vec<f64> = (-radius..=radius)
        .map(|k| (-(k * k) as f64 / (2.0 * sigma * sigma)).exp())
        .collect();
    let norm: f64 = kernel.iter().sum();

    let n = values.len();
    (0..n as isize)
        .map(|i| {
            kernel
                .iter()
                .zip(-radius..=radius)
                .map(|(w, k)| w * values[mirror_index(i + k, n)])
                .sum::<f64>()
                / norm
        })
        .collect()
}

/// Serializable choice of [`LambdaPolicy`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LambdaPolicyConfig {
    /// [`ConstantLambda`]
    Constant(ConstantLambda),
    /// [`DriftCurvatureLambda`]
    DriftCurvature(DriftCurvatureLambda),
}

impl Default for LambdaPolicyConfig {
    fn default() -> Self {
        LambdaPolicyConfig::Constant(ConstantLambda::default())
    }
}

impl LambdaPolicyConfig {
    /// Instantiate the policy.
    pub fn build(&self) -> Box<dyn LambdaPolicy> {
        match self {
            LambdaPolicyConfig::Constant(p) => Box::new(*p),
            LambdaPolicyConfig::DriftCurvature(p) => Box::new(*p),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Affine2D, Model};
    use crate::solve::item::BlockId;
    use crate::solve::source::TileGeometry;
    use approx::assert_relative_eq;

    fn item_with_offsets(offsets: &[f64]) -> SolveItem {
        let mut item = SolveItem::new(BlockId::new(0), 0, offsets.len() as i64 - 1);
        for (z, &dx) in offsets.iter().enumerate() {
            let seed = Affine2D::translation(dx, 0.0);
            item.insert_tile(
                &format!("t{z}"),
                TileGeometry {
                    width: 100.0,
                    height: 100.0,
                    z: z as i64,
                    seed_transform: seed,
                },
                Model::Translation(seed),
                0.1,
            );
        }
        item
    }

    #[test]
    fn test_mirror_index() {
        assert_eq!(mirror_index(-1, 5), 1);
        assert_eq!(mirror_index(-2, 5), 2);
        assert_eq!(mirror_index(5, 5), 3);
        assert_eq!(mirror_index(2, 5), 2);
        assert_eq!(mirror_index(-3, 1), 0);
    }

    #[test]
    fn test_gaussian_preserves_constant() {
        let smoothed = gaussian_smooth(&[2.0; 7], 5.0);
        for v in smoothed {
            assert_relative_eq!(v, 2.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_curve() {
        let c = QuadraticCurve::default();
        assert_relative_eq!(c.eval(0.0), 0.15);
        assert_relative_eq!(c.eval(200.0), 0.00674563 / 2.0);
        assert!(c.eval(100.0) >= 0.0);
    }

    #[test]
    fn test_constant_policy() {
        let item = item_with_offsets(&[0.0, 0.0, 0.0]);
        let lambdas = ConstantLambda { value: 0.25 }.layer_lambdas(&item);
        assert_eq!(lambdas.len(), 3);
        assert!(lambdas.values().all(|&l| l == 0.25));
    }

    #[test]
    fn test_drift_policy_static_stack() {
        // no drift: every layer gets curve(0)
        let item = item_with_offsets(&[5.0; 10]);
        let lambdas = DriftCurvatureLambda::default().layer_lambdas(&item);
        assert_eq!(lambdas.len(), 10);
        for l in lambdas.values() {
            assert_relative_eq!(*l, 0.15, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_drift_policy_lowers_lambda_under_drift() {
        let offsets: Vec<f64> = (0..10).map(|z| z as f64 * 5.0).collect();
        let item = item_with_offsets(&offsets);
        let lambdas = DriftCurvatureLambda::default().layer_lambdas(&item);
        // drift² = 25 per layer lowers the curve below its value at 0
        assert!(lambdas.values().all(|&l| l < 0.15));
    }

    #[test]
    fn test_policy_config_yaml() {
        let c: LambdaPolicyConfig =
            serde_yaml::from_str("type: drift_curvature\ndrift_sigma: 10.0\n").unwrap();
        match c {
            LambdaPolicyConfig::DriftCurvature(p) => {
                assert_eq!(p.drift_sigma, 10.0);
                assert_eq!(p.lambda_sigma, 5.0);
            }
            _ => panic!("expected drift policy"),
        }
    }
}
