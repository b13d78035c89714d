//! Closed-form weighted least-squares estimators.
//!
//! Each estimator maps the `p1` points of the matches onto their `p2`
//! points.

use super::affine::Affine2D;
use super::point::PointMatch;
use crate::error::ModelError;

/// Relative tolerance on the affine normal-equation determinant.
const AFFINE_DET_TOLERANCE: f64 = 1e-10;

/// Weighted centroids of `p1` and `p2`, plus the weight sum.
fn centroids(matches: &[PointMatch]) -> Result<((f64, f64), (f64, f64), f64), ModelError> {
    let mut ws = 0.0;
    let (mut pcx, mut pcy, mut qcx, mut qcy) = (0.0, 0.0, 0.0, 0.0);
    for m in matches {
        let w = m.weight;
        ws += w;
        pcx += w * m.p1.x;
        pcy += w * m.p1.y;
        qcx += w * m.p2.x;
        qcy += w * m.p2.y;
    }
    if ws <= 0.0 || !ws.is_finite() {
        return Err(ModelError::IllDefinedData("total weight is zero"));
    }
    Ok(((pcx / ws, pcy / ws), (qcx / ws, qcy / ws), ws))
}

fn require(matches: &[PointMatch], required: usize) -> Result<(), ModelError> {
    if matches.len() < required {
        return Err(ModelError::NotEnoughDataPoints {
            required,
            found: matches.len(),
        });
    }
    Ok(())
}

/// Weighted mean offset.
pub(crate) fn fit_translation(matches: &[PointMatch]) -> Result<Affine2D, ModelError> {
    require(matches, 1)?;
    let ((pcx, pcy), (qcx, qcy), _) = centroids(matches)?;
    Ok(Affine2D::translation(qcx - pcx, qcy - pcy))
}

/// Weighted Procrustes without scale.
pub(crate) fn fit_rigid(matches: &[PointMatch]) -> Result<Affine2D, ModelError> {
    require(matches, 2)?;
    let ((pcx, pcy), (qcx, qcy), _) = centroids(matches)?;

    let mut sin_sum = 0.0;
    let mut cos_sum = 0.0;
    for m in matches {
        let w = m.weight;
        let x1 = m.p1.x - pcx;
        let y1 = m.p1.y - pcy;
        let x2 = m.p2.x - qcx;
        let y2 = m.p2.y - qcy;
        sin_sum += w * (x1 * y2 - y1 * x2);
        cos_sum += w * (x1 * x2 + y1 * y2);
    }

    let norm = sin_sum.hypot(cos_sum);
    if norm <= f64::EPSILON || !norm.is_finite() {
        return Err(ModelError::IllDefinedData("coincident points"));
    }
    let sin = sin_sum / norm;
    let cos = cos_sum / norm;

    Ok(Affine2D {
        m00: cos,
        m10: sin,
        m01: -sin,
        m11: cos,
        m02: qcx - cos * pcx + sin * pcy,
        m12: qcy - sin * pcx - cos * pcy,
    })
}

/// Weighted 2×2 normal equations on centered coordinates.
pub(crate) fn fit_affine(matches: &[PointMatch]) -> Result<Affine2D, ModelError> {
    require(matches, 3)?;
    let ((pcx, pcy), (qcx, qcy), _) = centroids(matches)?;

    let (mut a00, mut a01, mut a11) = (0.0, 0.0, 0.0);
    let (mut b00, mut b01, mut b10, mut b11) = (0.0, 0.0, 0.0, 0.0);
    for m in matches {
        let w = m.weight;
        let px = m.p1.x - pcx;
        let py = m.p1.y - pcy;
        let qx = m.p2.x - qcx;
        let qy = m.p2.y - qcy;
        a00 += w * px * px;
        a01 += w * px * py;
        a11 += w * py * py;
        b00 += w * px * qx;
        b01 += w * px * qy;
        b10 += w * py * qx;
        b11 += w * py * qy;
    }

    let det = a00 * a11 - a01 * a01;
    let scale = (a00 * a11).abs();
    if !det.is_finite() || det.abs() <= AFFINE_DET_TOLERANCE * scale || det == 0.0 {
        return Err(ModelError::IllDefinedData("collinear points"));
    }

    let m00 = (a11 * b00 - a01 * b10) / det;
    let m01 = (a00 * b10 - a01 * b00) / det;
    let m10 = (a11 * b01 - a01 * b11) / det;
    let m11 = (a00 * b11 - a01 * b01) / det;

    Ok(Affine2D {
        m00,
        m10,
        m01,
        m11,
        m02: qcx - m00 * pcx - m01 * pcy,
        m12: qcy - m10 * pcx - m11 * pcy,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::point::Point2D;
    use approx::assert_relative_eq;

    fn mapped(t: &Affine2D, points: &[(f64, f64)]) -> Vec<PointMatch> {
        points
            .iter()
            .map(|&(x, y)| {
                let p = Point2D::new(x, y);
                PointMatch::unweighted(p, t.apply(&p))
            })
            .collect()
    }

    #[test]
    fn test_translation_single_match() {
        let m = [PointMatch::unweighted(
            Point2D::new(1.0, 1.0),
            Point2D::new(4.0, -1.0),
        )];
        let t = fit_translation(&m).unwrap();
        assert_relative_eq!(t.m02, 3.0);
        assert_relative_eq!(t.m12, -2.0);
    }

    #[test]
    fn test_translation_weighted_mean() {
        let o = Point2D::new(0.0, 0.0);
        let m = [
            PointMatch::new(o, Point2D::new(10.0, 0.0), 3.0),
            PointMatch::new(o, Point2D::new(0.0, 0.0), 1.0),
        ];
        let t = fit_translation(&m).unwrap();
        assert_relative_eq!(t.m02, 7.5);
    }

    #[test]
    fn test_rigid_exact() {
        let truth = Affine2D::rigid(0.3, 5.0, -2.0);
        let m = mapped(&truth, &[(0.0, 0.0), (10.0, 0.0)]);
        let t = fit_rigid(&m).unwrap();
        for (a, b) in t.to_params().iter().zip(truth.to_params().iter()) {
            assert_relative_eq!(a, b, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_rigid_coincident() {
        let p = Point2D::new(1.0, 1.0);
        let m = [PointMatch::unweighted(p, p), PointMatch::unweighted(p, p)];
        assert!(matches!(
            fit_rigid(&m),
            Err(ModelError::IllDefinedData(_))
        ));
    }

    #[test]
    fn test_affine_exact() {
        let truth = Affine2D::from_params([1.02, 0.01, -0.03, 0.97, 40.0, 12.0]);
        let m = mapped(&truth, &[(0.0, 0.0), (100.0, 0.0), (0.0, 100.0), (50.0, 80.0)]);
        let t = fit_affine(&m).unwrap();
        for (a, b) in t.to_params().iter().zip(truth.to_params().iter()) {
            assert_relative_eq!(a, b, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_affine_collinear() {
        let truth = Affine2D::identity();
        let m = mapped(&truth, &[(0.0, 0.0), (1.0, 1.0), (2.0, 2.0), (5.0, 5.0)]);
        assert!(matches!(
            fit_affine(&m),
            Err(ModelError::IllDefinedData(_))
        ));
    }

    #[test]
    fn test_not_enough_points() {
        let m = mapped(&Affine2D::identity(), &[(0.0, 0.0), (1.0, 0.0)]);
        assert_eq!(
            fit_affine(&m),
            Err(ModelError::NotEnoughDataPoints {
                required: 3,
                found: 2
            })
        );
        assert!(fit_translation(&[]).is_err());
    }
}
