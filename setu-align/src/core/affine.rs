//! 2D affine transform.
//!
//! Parameters follow the column-major convention used on the wire:
//! ```text
//! x' = m00·x + m01·y + m02
//! y' = m10·x + m11·y + m12
//! ```
//! and are exchanged as `[m00, m10, m01, m11, m02, m12]`.

use serde::{Deserialize, Serialize};

use super::point::Point2D;
use crate::error::ModelError;

/// Determinant magnitude below which a transform is treated as singular.
const SINGULAR_DET: f64 = 1e-12;

/// A 2D affine transform.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Affine2D {
    /// Linear part, row 0 col 0
    pub m00: f64,
    /// Linear part, row 1 col 0
    pub m10: f64,
    /// Linear part, row 0 col 1
    pub m01: f64,
    /// Linear part, row 1 col 1
    pub m11: f64,
    /// X translation
    pub m02: f64,
    /// Y translation
    pub m12: f64,
}

impl Default for Affine2D {
    fn default() -> Self {
        Self::identity()
    }
}

impl Affine2D {
    /// Identity transform.
    #[inline]
    pub const fn identity() -> Self {
        Self {
            m00: 1.0,
            m10: 0.0,
            m01: 0.0,
            m11: 1.0,
            m02: 0.0,
            m12: 0.0,
        }
    }

    /// Pure translation.
    #[inline]
    pub fn translation(tx: f64, ty: f64) -> Self {
        Self {
            m02: tx,
            m12: ty,
            ..Self::identity()
        }
    }

    /// Rotation by `theta` (radians, CCW) followed by a translation.
    #[inline]
    pub fn rigid(theta: f64, tx: f64, ty: f64) -> Self {
        let (sin_t, cos_t) = theta.sin_cos();
        Self {
            m00: cos_t,
            m10: sin_t,
            m01: -sin_t,
            m11: cos_t,
            m02: tx,
            m12: ty,
        }
    }

    /// Build from `[m00, m10, m01, m11, m02, m12]`.
    #[inline]
    pub fn from_params(p: [f64; 6]) -> Self {
        Self {
            m00: p[0],
            m10: p[1],
            m01: p[2],
            m11: p[3],
            m02: p[4],
            m12: p[5],
        }
    }

    /// Export as `[m00, m10, m01, m11, m02, m12]`.
    #[inline]
    pub fn to_params(&self) -> [f64; 6] {
        [self.m00, self.m10, self.m01, self.m11, self.m02, self.m12]
    }

    /// Apply to a point.
    #[inline]
    pub fn apply(&self, p: &Point2D) -> Point2D {
        Point2D::new(
            self.m00 * p.x + self.m01 * p.y + self.m02,
            self.m10 * p.x + self.m11 * p.y + self.m12,
        )
    }

    /// Transform that applies `self` first, then `after`.
    ///
    /// ```text
    /// T = after · self
    /// ```
    pub fn pre_concatenate(&self, after: &Affine2D) -> Affine2D {
        let a = after;
        Affine2D {
            m00: a.m00 * self.m00 + a.m01 * self.m10,
            m10: a.m10 * self.m00 + a.m11 * self.m10,
            m01: a.m00 * self.m01 + a.m01 * self.m11,
            m11: a.m10 * self.m01 + a.m11 * self.m11,
            m02: a.m00 * self.m02 + a.m01 * self.m12 + a.m02,
            m12: a.m10 * self.m02 + a.m11 * self.m12 + a.m12,
        }
    }

    /// Transform that applies `before` first, then `self`.
    #[inline]
    pub fn concatenate(&self, before: &Affine2D) -> Affine2D {
        before.pre_concatenate(self)
    }

    /// Determinant of the linear part.
    #[inline]
    pub fn determinant(&self) -> f64 {
        self.m00 * self.m11 - self.m01 * self.m10
    }

    /// Inverse transform.
    pub fn invert(&self) -> Result<Affine2D, ModelError> {
        let det = self.determinant();
        if !det.is_finite() || det.abs() < SINGULAR_DET {
            return Err(ModelError::Noninvertible(det));
        }
        let m00 = self.m11 / det;
        let m01 = -self.m01 / det;
        let m10 = -self.m10 / det;
        let m11 = self.m00 / det;
        Ok(Affine2D {
            m00,
            m10,
            m01,
            m11,
            m02: -(m00 * self.m02 + m01 * self.m12),
            m12: -(m10 * self.m02 + m11 * self.m12),
        })
    }

    /// Parameter-wise blend `(1 - lambda)·self + lambda·other`.
    pub fn interpolate(&self, other: &Affine2D, lambda: f64) -> Affine2D {
        let l1 = 1.0 - lambda;
        Affine2D {
            m00: l1 * self.m00 + lambda * other.m00,
            m10: l1 * self.m10 + lambda * other.m10,
            m01: l1 * self.m01 + lambda * other.m01,
            m11: l1 * self.m11 + lambda * other.m11,
            m02: l1 * self.m02 + lambda * other.m02,
            m12: l1 * self.m12 + lambda * other.m12,
        }
    }

    /// Rotation angle of the linear part (exact for rigid transforms).
    #[inline]
    pub fn rotation_angle(&self) -> f64 {
        self.m10.atan2(self.m00)
    }

    /// All six parameters are finite.
    #[inline]
    pub fn is_finite(&self) -> bool {
        self.to_params().iter().all(|v| v.is_finite())
    }
}

impl std::fmt::Display for Affine2D {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[[{:.6}, {:.6}, {:.3}], [{:.6}, {:.6}, {:.3}]]",
            self.m00, self.m01, self.m02, self.m10, self.m11, self.m12
        )
    }
}
