//! Parametric tile transforms.
//!
//! [`Model`] is a closed family: translation, rigid, affine, and the convex
//! interpolation of two models. Fitting is pure and returns a new model;
//! the caller decides whether to keep it.
//!
//! ## Regularized block model
//!
//! Blocks solve with a nested interpolation
//! ```text
//! Interpolated(Interpolated(Affine, Rigid, λ_rigid), Translation, λ_translation)
//! ```
//! so a staged schedule can anneal from near-translation towards affine by
//! lowering the two lambdas ([`Model::set_regularization`]).

use serde::{Deserialize, Serialize};

use super::affine::Affine2D;
use super::fit::{fit_affine, fit_rigid, fit_translation};
use super::point::{Point2D, PointMatch, footprint_grid};
use crate::error::ModelError;

/// Transform family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    /// 2 parameters
    Translation,
    /// 3 parameters (rotation + translation)
    Rigid,
    /// 6 parameters
    Affine,
}

impl ModelKind {
    /// Degrees of freedom.
    pub fn degrees_of_freedom(self) -> usize {
        match self {
            ModelKind::Translation => 2,
            ModelKind::Rigid => 3,
            ModelKind::Affine => 6,
        }
    }

    /// Fewest matches that constrain a fit.
    pub fn min_matches(self) -> usize {
        match self {
            ModelKind::Translation => 1,
            ModelKind::Rigid => 2,
            ModelKind::Affine => 3,
        }
    }

    /// More constrained than an affine.
    pub fn is_rigid_or_simpler(self) -> bool {
        self <= ModelKind::Rigid
    }
}

impl std::fmt::Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ModelKind::Translation => "translation",
            ModelKind::Rigid => "rigid",
            ModelKind::Affine => "affine",
        };
        f.write_str(name)
    }
}

/// Convex blend of two models.
///
/// `apply(p) = (1 - lambda)·a(p) + lambda·b(p)`; the blended affine is cached
/// and recomputed whenever a part or the weight changes.
#[derive(Debug, Clone, PartialEq)]
pub struct InterpolatedModel {
    a: Box<Model>,
    b: Box<Model>,
    lambda: f64,
    blended: Affine2D,
}

impl InterpolatedModel {
    /// Blend `a` towards `b` with weight `lambda` (clamped to [0, 1]).
    pub fn new(a: Model, b: Model, lambda: f64) -> Self {
        let mut model = Self {
            a: Box::new(a),
            b: Box::new(b),
            lambda: clamp_lambda(lambda),
            blended: Affine2D::identity(),
        };
        model.refresh();
        model
    }

    /// First (less constrained) part.
    pub fn a(&self) -> &Model {
        &self.a
    }

    /// Second (regularizing) part.
    pub fn b(&self) -> &Model {
        &self.b
    }

    /// Blend weight of `b`.
    pub fn lambda(&self) -> f64 {
        self.lambda
    }

    fn set_lambda(&mut self, lambda: f64) {
        self.lambda = clamp_lambda(lambda);
        self.refresh();
    }

    fn refresh(&mut self) {
        self.blended = self.a.affine().interpolate(&self.b.affine(), self.lambda);
    }

    /// Only the side carrying weight has to be determined. A weightless
    /// side that cannot be fit takes over the other side's transform, so a
    /// later change of `lambda` starts from a coherent model.
    fn fit(&self, matches: &[PointMatch]) -> Result<InterpolatedModel, ModelError> {
        let (a, b) = if self.lambda >= 1.0 {
            let b = self.b.fit(matches)?;
            let a = self
                .a
                .fit(matches)
                .unwrap_or_else(|_| self.a.reset_to(&b.affine()));
            (a, b)
        } else if self.lambda <= 0.0 {
            let a = self.a.fit(matches)?;
            let b = self
                .b
                .fit(matches)
                .unwrap_or_else(|_| self.b.reset_to(&a.affine()));
            (a, b)
        } else {
            (self.a.fit(matches)?, self.b.fit(matches)?)
        };
        Ok(InterpolatedModel::new(a, b, self.lambda))
    }

    fn min_matches(&self) -> usize {
        if self.lambda >= 1.0 {
            self.b.min_matches()
        } else if self.lambda <= 0.0 {
            self.a.min_matches()
        } else {
            self.a.min_matches().max(self.b.min_matches())
        }
    }
}

fn clamp_lambda(lambda: f64) -> f64 {
    if lambda.is_nan() {
        0.0
    } else {
        lambda.clamp(0.0, 1.0)
    }
}

/// A tile transform.
#[derive(Debug, Clone, PartialEq)]
pub enum Model {
    /// Translation only
    Translation(Affine2D),
    /// Rotation and translation
    Rigid(Affine2D),
    /// Full affine
    Affine(Affine2D),
    /// Blend of two models
    Interpolated(InterpolatedModel),
}

impl Default for Model {
    fn default() -> Self {
        Model::Affine(Affine2D::identity())
    }
}

impl Model {
    /// Identity transform of a plain kind.
    pub fn identity(kind: ModelKind) -> Self {
        Self::from_affine(kind, Affine2D::identity())
    }

    /// Wrap an affine as the given kind without projecting it.
    pub fn from_affine(kind: ModelKind, affine: Affine2D) -> Self {
        match kind {
            ModelKind::Translation => Model::Translation(affine),
            ModelKind::Rigid => Model::Rigid(affine),
            ModelKind::Affine => Model::Affine(affine),
        }
    }

    /// Convex blend of two models.
    pub fn interpolated(a: Model, b: Model, lambda: f64) -> Self {
        Model::Interpolated(InterpolatedModel::new(a, b, lambda))
    }

    /// Nested regularized model at identity:
    /// `Interpolated(Interpolated(base, rigid_like, λ_rigid), translation_like, λ_translation)`.
    pub fn regularized(
        base: ModelKind,
        first_regularizer: ModelKind,
        second_regularizer: ModelKind,
        lambda_rigid: f64,
        lambda_translation: f64,
    ) -> Self {
        let inner = Model::interpolated(
            Model::identity(base),
            Model::identity(first_regularizer),
            lambda_rigid,
        );
        Model::interpolated(inner, Model::identity(second_regularizer), lambda_translation)
    }

    /// Affine regularized by rigid and translation.
    pub fn block_default(lambda_rigid: f64, lambda_translation: f64) -> Self {
        Self::regularized(
            ModelKind::Affine,
            ModelKind::Rigid,
            ModelKind::Translation,
            lambda_rigid,
            lambda_translation,
        )
    }

    /// Current transform.
    #[inline]
    pub fn affine(&self) -> Affine2D {
        match self {
            Model::Translation(t) | Model::Rigid(t) | Model::Affine(t) => *t,
            Model::Interpolated(m) => m.blended,
        }
    }

    /// Transform a point.
    #[inline]
    pub fn apply(&self, p: &Point2D) -> Point2D {
        match self {
            Model::Translation(t) | Model::Rigid(t) | Model::Affine(t) => t.apply(p),
            Model::Interpolated(m) => m.blended.apply(p),
        }
    }

    /// Most general family the transform can belong to.
    ///
    /// Interpolations are reported as affine.
    pub fn kind(&self) -> ModelKind {
        match self {
            Model::Translation(_) => ModelKind::Translation,
            Model::Rigid(_) => ModelKind::Rigid,
            Model::Affine(_) | Model::Interpolated(_) => ModelKind::Affine,
        }
    }

    /// Number of free parameters.
    pub fn degrees_of_freedom(&self) -> usize {
        match self {
            Model::Interpolated(m) => m.a.degrees_of_freedom().max(m.b.degrees_of_freedom()),
            _ => self.kind().degrees_of_freedom(),
        }
    }

    /// Fewest matches a fit needs at the current blend weights.
    pub fn min_matches(&self) -> usize {
        match self {
            Model::Interpolated(m) => m.min_matches(),
            _ => self.kind().min_matches(),
        }
    }

    /// Weighted least-squares fit mapping `p1` onto `p2`.
    ///
    /// Returns a new model of the same shape; `self` only supplies the
    /// structure and blend weights.
    pub fn fit(&self, matches: &[PointMatch]) -> Result<Model, ModelError> {
        match self {
            Model::Translation(_) => fit_translation(matches).map(Model::Translation),
            Model::Rigid(_) => fit_rigid(matches).map(Model::Rigid),
            Model::Affine(_) => fit_affine(matches).map(Model::Affine),
            Model::Interpolated(m) => m.fit(matches).map(Model::Interpolated),
        }
    }

    /// Fit this model's shape to `target`, sampled on a
    /// `samples × samples` grid over a `width × height` footprint.
    pub fn fit_to_affine(
        &self,
        target: &Affine2D,
        width: f64,
        height: f64,
        samples: usize,
    ) -> Result<Model, ModelError> {
        let matches: Vec<PointMatch> = footprint_grid(width, height, samples)
            .into_iter()
            .map(|p| PointMatch::unweighted(p, target.apply(&p)))
            .collect();
        self.fit(&matches)
    }

    /// Same shape and blend weights, every part set to `affine`.
    pub fn reset_to(&self, affine: &Affine2D) -> Model {
        match self {
            Model::Interpolated(m) => Model::Interpolated(InterpolatedModel::new(
                m.a.reset_to(affine),
                m.b.reset_to(affine),
                m.lambda,
            )),
            _ => Model::from_affine(self.kind(), *affine),
        }
    }

    /// Transform that applies `self` first, then `after`.
    ///
    /// The result is a plain model of the more general of the two kinds.
    pub fn pre_concatenate(&self, after: &Model) -> Model {
        let kind = self.kind().max(after.kind());
        Model::from_affine(kind, self.affine().pre_concatenate(&after.affine()))
    }

    /// Inverse transform, as a plain model of the same kind.
    pub fn invert(&self) -> Result<Model, ModelError> {
        let inverse = self.affine().invert()?;
        Ok(Model::from_affine(self.kind(), inverse))
    }

    /// Set the blend weight of an interpolated model. No-op on plain kinds.
    pub fn set_lambda(&mut self, lambda: f64) {
        if let Model::Interpolated(m) = self {
            m.set_lambda(lambda);
        }
    }

    /// Blend weight of an interpolated model.
    pub fn lambda(&self) -> Option<f64> {
        match self {
            Model::Interpolated(m) => Some(m.lambda),
            _ => None,
        }
    }

    /// Set both knobs of a nested regularized model.
    ///
    /// The outer blend gets `lambda_translation`, the inner one
    /// `lambda_rigid`. Levels that are not interpolations are left alone.
    pub fn set_regularization(&mut self, lambda_rigid: f64, lambda_translation: f64) {
        if let Model::Interpolated(outer) = self {
            outer.a.set_lambda(lambda_rigid);
            outer.set_lambda(lambda_translation);
        }
    }

    /// Move from `self` towards `fitted` by `damping` in (0, 1].
    ///
    /// Plain affine and translation parameters are blended linearly, rigid
    /// models by angle and offset so the result stays rigid.
    pub fn damped_towards(&self, fitted: Model, damping: f64) -> Model {
        if damping >= 1.0 {
            return fitted;
        }
        let d = damping.max(0.0);
        match (self, fitted) {
            (Model::Translation(prev), Model::Translation(next)) => {
                Model::Translation(prev.interpolate(&next, d))
            }
            (Model::Affine(prev), Model::Affine(next)) => Model::Affine(prev.interpolate(&next, d)),
            (Model::Rigid(prev), Model::Rigid(next)) => {
                let a0 = prev.rotation_angle();
                let mut delta = next.rotation_angle() - a0;
                delta = (delta + std::f64::consts::PI).rem_euclid(std::f64::consts::TAU)
                    - std::f64::consts::PI;
                Model::Rigid(Affine2D::rigid(
                    a0 + d * delta,
                    prev.m02 + d * (next.m02 - prev.m02),
                    prev.m12 + d * (next.m12 - prev.m12),
                ))
            }
            (Model::Interpolated(prev), Model::Interpolated(next)) => {
                let a = prev.a.damped_towards(*next.a, d);
                let b = prev.b.damped_towards(*next.b, d);
                Model::Interpolated(InterpolatedModel::new(a, b, next.lambda))
            }
            (_, fitted) => fitted,
        }
    }
}

impl std::fmt::Display for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Model::Interpolated(m) => write!(
                f,
                "interpolated(λ={:.3}) {}",
                m.lambda,
                m.blended
            ),
            _ => write!(f, "{} {}", self.kind(), self.affine()),
        }
    }
}
