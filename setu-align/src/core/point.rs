//! Points and weighted point correspondences.

use serde::{Deserialize, Serialize};

/// A 2D point in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point2D {
    /// X coordinate
    pub x: f64,
    /// Y coordinate
    pub y: f64,
}

impl Point2D {
    /// Create a new point.
    #[inline]
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Squared distance to another point (avoids sqrt).
    #[inline]
    pub fn distance_squared(&self, other: &Point2D) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }

    /// Distance to another point.
    #[inline]
    pub fn distance(&self, other: &Point2D) -> f64 {
        self.distance_squared(other).sqrt()
    }
}

impl From<[f64; 2]> for Point2D {
    fn from(p: [f64; 2]) -> Self {
        Self::new(p[0], p[1])
    }
}

/// A weighted correspondence between two points.
///
/// Inside a tile link, `p1` is in the owning tile's local frame and `p2` in
/// the neighbor's local frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointMatch {
    /// Point in the first frame
    pub p1: Point2D,
    /// Point in the second frame
    pub p2: Point2D,
    /// Non-negative weight
    #[serde(default = "unit_weight")]
    pub weight: f64,
}

fn unit_weight() -> f64 {
    1.0
}

impl PointMatch {
    /// Create a match with the given weight.
    #[inline]
    pub fn new(p1: Point2D, p2: Point2D, weight: f64) -> Self {
        Self { p1, p2, weight }
    }

    /// Create a match with weight 1.
    #[inline]
    pub fn unweighted(p1: Point2D, p2: Point2D) -> Self {
        Self::new(p1, p2, 1.0)
    }

    /// Same correspondence seen from the other side.
    #[inline]
    pub fn flip(&self) -> Self {
        Self::new(self.p2, self.p1, self.weight)
    }

    /// Matches with non-positive (or NaN) weight carry no information.
    #[inline]
    pub fn is_informative(&self) -> bool {
        self.weight > 0.0
    }
}

/// Regular grid of `samples × samples` points over a `width × height`
/// footprint, corners included.
///
/// Spacing is `(width - 1) / (samples - 1)` so the last sample sits on the
/// last pixel. A single sample per dimension yields the origin.
pub fn footprint_grid(width: f64, height: f64, samples: usize) -> Vec<Point2D> {
    let samples = samples.max(1);
    let (step_x, step_y) = if samples > 1 {
        let divisor = (samples - 1) as f64;
        ((width - 1.0) / divisor, (height - 1.0) / divisor)
    } else {
        (0.0, 0.0)
    };

    let mut points = Vec::with_capacity(samples * samples);
    for iy in 0..samples {
        for ix in 0..samples {
            points.push(Point2D::new(ix as f64 * step_x, iy as f64 * step_y));
        }
    }
    points
}
