//! Collection error types.

use thiserror::Error;
use vellum_postgres::PgError;

/// Type-erased error returned by external capabilities such as embedding generators.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result type for collection operations.
pub type VectorResult<T> = Result<T, VectorError>;

/// Collection errors.
///
/// Backing-store failures are carried unchanged in [`VectorError::Store`];
/// nothing in this crate retries them.
#[derive(Debug, Error)]
#[must_use = "collection errors should be handled appropriately"]
pub enum VectorError {
    /// Missing or invalid schema definition.
    #[error("schema error: {0}")]
    Schema(String),

    /// A record does not fit the collection's mapping.
    #[error("mapping error: {0}")]
    Mapping(String),

    /// The existing backing table does not match the mapping.
    #[error("schema mismatch for collection {collection}: {message}")]
    SchemaMismatch { collection: String, message: String },

    /// An argument is out of range or refers to an unknown field.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The collection was disposed.
    #[error("collection {0} has been disposed")]
    UseAfterDispose(String),

    /// The embedding generator failed or returned unusable output.
    #[error("embedding generation failed: {0}")]
    Embedding(#[source] BoxError),

    /// The operation was cancelled before it completed.
    #[error("operation cancelled")]
    Cancelled,

    /// A stored row could not be decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Backing-store error.
    #[error(transparent)]
    Store(#[from] PgError),
}

impl VectorError {
    /// Creates a schema error.
    pub fn schema(msg: impl Into<String>) -> Self {
        Self::Schema(msg.into())
    }

    /// Creates a mapping error.
    pub fn mapping(msg: impl Into<String>) -> Self {
        Self::Mapping(msg.into())
    }

    /// Creates a schema mismatch error.
    pub fn schema_mismatch(collection: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::SchemaMismatch {
            collection: collection.into(),
            message: msg.into(),
        }
    }

    /// Creates an invalid argument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Creates a use-after-dispose error.
    pub fn use_after_dispose(collection: impl Into<String>) -> Self {
        Self::UseAfterDispose(collection.into())
    }

    /// Creates an embedding error.
    pub fn embedding(err: impl Into<BoxError>) -> Self {
        Self::Embedding(err.into())
    }

    /// Creates a serialization error.
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Returns whether retrying the same call could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Store(err) => err.is_transient(),
            _ => false,
        }
    }
}

impl From<diesel::result::Error> for VectorError {
    fn from(err: diesel::result::Error) -> Self {
        Self::Store(PgError::from(err))
    }
}

impl From<serde_json::Error> for VectorError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_store_errors_are_transient() {
        let timeout = VectorError::from(PgError::Timeout(
            vellum_postgres::error::TimeoutType::Wait,
        ));
        assert!(timeout.is_transient());
        assert!(!VectorError::Cancelled.is_transient());
        assert!(!VectorError::schema("missing").is_transient());
    }

    #[test]
    fn test_error_messages() {
        let err = VectorError::schema_mismatch("books", "column title missing");
        assert_eq!(
            err.to_string(),
            "schema mismatch for collection books: column title missing"
        );

        let err = VectorError::embedding("service unavailable");
        assert_eq!(
            err.to_string(),
            "embedding generation failed: service unavailable"
        );
    }
}
