//! Store error types

use thiserror::Error;

/// Errors returned by the task store
#[derive(Debug, Error)]
pub enum StoreError {
    /// Bad input: empty project, unknown update field, self-loop, cycle
    #[error("validation error: {0}")]
    Validation(String),

    /// Task or row missing
    #[error("not found: {0}")]
    NotFound(String),

    /// Duplicate id or conflicting write
    #[error("conflict: {0}")]
    Conflict(String),

    /// Exhausted retries or broken invariants inside the store
    #[error("internal error: {0}")]
    Internal(String),

    /// Underlying SQLite failure
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl StoreError {
    /// Whether the caller may retry this operation
    ///
    /// Validation, NotFound, and Conflict are never retried. Storage
    /// contention (SQLITE_BUSY / SQLITE_LOCKED) is a retry candidate.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Sqlite(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

/// Convenience alias used throughout the crate
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_is_not_transient() {
        let err = StoreError::Validation("empty project".to_string());
        assert!(!err.is_transient());
    }

    #[test]
    fn test_busy_is_transient() {
        let err = StoreError::Sqlite(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        ));
        assert!(err.is_transient());
    }

    #[test]
    fn test_display_includes_kind() {
        let err = StoreError::NotFound("p-abc123".to_string());
        assert!(err.to_string().contains("not found"));
        assert!(err.to_string().contains("p-abc123"));
    }
}
