//! Geometric primitives for tile alignment.
//!
//! - [`Point2D`], [`PointMatch`]: weighted correspondences between tile frames
//! - [`Affine2D`]: the 2D affine transform every model reduces to
//! - [`Model`], [`ModelKind`]: fittable transform families and their blends
//!
//! ## Example
//!
//! ```rust
//! use setu_align::core::{Model, ModelKind, Point2D, PointMatch};
//!
//! let matches = [PointMatch::unweighted(Point2D::new(0.0, 0.0), Point2D::new(100.0, 0.0))];
//! let model = Model::identity(ModelKind::Translation).fit(&matches).unwrap();
//! assert_eq!(model.apply(&Point2D::new(1.0, 1.0)), Point2D::new(101.0, 1.0));
//! ```

mod affine;
mod fit;
mod model;
mod point;

pub use affine::Affine2D;
pub use model::{InterpolatedModel, Model, ModelKind};
pub use point::{Point2D, PointMatch, footprint_grid};
