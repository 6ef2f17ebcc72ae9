//! Error types for fedline-store.

use fedline_types::CodecError;

/// Storage layer errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored blob could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The write would break a cache invariant.
    #[error("integrity violation: {reason}")]
    Integrity {
        /// What was refused.
        reason: String,
    },

    /// A row could not be turned back into a model value.
    #[error("invalid row in {table}: {reason}")]
    InvalidRow {
        /// Table the row came from.
        table: &'static str,
        /// What was wrong with it.
        reason: String,
    },
}

/// Result type alias for storage operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
