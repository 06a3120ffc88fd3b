//! Error types for flashgrid

use thiserror::Error;

/// Result type alias using [`CacheError`]
pub type Result<T> = std::result::Result<T, CacheError>;

/// Errors surfaced by the cache engine to its callers.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The object factory failed or produced nothing usable; no entry was created
    #[error("failed to create object for key {key}: {reason}")]
    Creation { key: String, reason: String },

    /// A replacement object could not be built or could not absorb the old state
    #[error("failed to upgrade objects of class {class}: {reason}")]
    Upgrade { class: String, reason: String },

    /// No factory constructor is registered under this name
    #[error("unknown factory: {0}")]
    UnknownFactory(String),

    /// Bucket counts may only be multiplied by an integer of at least 2
    #[error("invalid bucket multiplication factor: {0} (must be >= 2)")]
    InvalidFactor(usize),

    /// Bin counts must be positive
    #[error("invalid bin count: {0}")]
    InvalidBinCount(usize),

    /// A user object rejected a request
    #[error("object error: {0}")]
    Object(#[from] ObjectError),

    /// Configuration could not be applied
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The maintenance thread could not be spawned
    #[error("failed to spawn maintenance thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Errors returned by user objects and their factories.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ObjectError {
    #[error("{0}")]
    Failed(String),

    #[error("unsupported request: {0}")]
    Unsupported(String),

    #[error("invalid value: {0}")]
    InvalidValue(String),
}

/// Errors raised while reading a configuration snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value}")]
    Invalid { key: String, value: String },

    #[error("{key} must be between {min} and {max}, got {value}")]
    OutOfRange {
        key: String,
        value: u64,
        min: u64,
        max: u64,
    },
}
