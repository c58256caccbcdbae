//! Error types for the resolution engine

use thiserror::Error;

/// Resolution engine errors
#[derive(Debug, Error)]
pub enum AuthzError {
    /// A role, permission or entity reference that cannot be resolved
    #[error("Invalid reference: {0}")]
    InvalidReference(String),

    /// Invalid engine configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Storage backend error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<toml::de::Error> for AuthzError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for AuthzError {
    fn from(err: sqlx::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

/// Result type for resolution operations
pub type Result<T> = std::result::Result<T, AuthzError>;
