//! Cache backend errors.
//!
//! These never leave the crate's public fail-soft surface: [`PositionCache`]
//! turns every one of them into a miss or a logged no-op.
//!
//! [`PositionCache`]: crate::PositionCache

use thiserror::Error;

/// Result type for backend operations.
pub type Result<T> = std::result::Result<T, CacheError>;

#[derive(Debug, Error)]
pub enum CacheError {
    /// Backend cannot be reached
    #[error("cache unavailable: {0}")]
    Unavailable(String),

    /// Key holds a value of another shape (scalar vs list)
    #[error("wrong value type at key {0}")]
    WrongType(String),

    /// Value could not be encoded or decoded
    #[error("cache codec error: {0}")]
    Codec(#[from] serde_json::Error),
}
