//! Configuration loading errors.

/// Config load error
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigLoadError {
    /// File could not be read
    #[error("IO error: {0}")]
    Io(String),
    /// YAML is malformed or has wrongly typed fields
    #[error("Parse error: {0}")]
    Parse(String),
    /// Values parse but cannot be used
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
