//! Error types for model fitting and block solving.

/// Failures of a single model fit or inversion.
///
/// These are always recoverable: the caller keeps the model it had.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ModelError {
    /// Fewer correspondences than the model needs
    #[error("not enough data points: {required} required, {found} found")]
    NotEnoughDataPoints {
        /// Minimum number of matches for the model kind
        required: usize,
        /// Matches actually supplied
        found: usize,
    },

    /// Points are degenerate (coincident, collinear) or the system is singular
    #[error("ill-defined data: {0}")]
    IllDefinedData(&'static str),

    /// Transform has a (near) zero determinant
    #[error("transform is not invertible (det = {0:e})")]
    Noninvertible(f64),
}

/// Errors raised while assembling, solving or merging blocks.
#[derive(Debug, thiserror::Error)]
pub enum SolveError {
    /// A correspondence references a tile the geometry source does not know
    #[error("missing tile geometry for '{0}'")]
    MissingTileGeometry(String),

    /// A correspondence endpoint is not a node of the graph
    #[error("correspondence endpoint {0} is not in the graph")]
    MissingCorrespondenceEndpoint(usize),

    /// Internal consistency broken; fatal for the block being solved
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// Model fit or inversion failed
    #[error(transparent)]
    Model(#[from] ModelError),

    /// The correspondence source failed
    #[error("correspondence source error: {0}")]
    Source(String),

    /// The solve of a block panicked; the message is the panic payload
    #[error("block solve panicked: {0}")]
    BlockPanicked(String),

    /// Invalid runtime parameters
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Result type for solver operations
pub type Result<T> = std::result::Result<T, SolveError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_error_display() {
        let err = ModelError::NotEnoughDataPoints {
            required: 3,
            found: 1,
        };
        assert_eq!(
            err.to_string(),
            "not enough data points: 3 required, 1 found"
        );
    }

    #[test]
    fn test_model_error_converts() {
        let err: SolveError = ModelError::IllDefinedData("collinear").into();
        assert!(matches!(err, SolveError::Model(_)));
        assert_eq!(err.to_string(), "ill-defined data: collinear");
    }
}
