//! Error types for fedcat.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::TransactionId;

/// Result type alias using fedcat's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// One catalog's failure during a fan-out operation.
///
/// Backend errors are converted into these at the catalog boundary so that
/// a failure in one catalog is reported without touching another's result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogFailure {
    pub catalog_id: String,
    pub reason: String,
}

impl CatalogFailure {
    pub fn new(catalog_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            catalog_id: catalog_id.into(),
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for CatalogFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.catalog_id, self.reason)
    }
}

fn join_failures(causes: &[CatalogFailure]) -> String {
    causes
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Core error type for fedcat operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Backend could not be reached. Transient: retried once by the catalog.
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Backend rejected a write (constraint violation). Not retried.
    #[error("Backend write error: {0}")]
    BackendWrite(String),

    /// Ingest aborted under the all-or-nothing policy; compensation has
    /// already been attempted for every catalog that committed.
    #[error("Ingest failed for transaction {transaction_id}: {}", join_failures(.causes))]
    IngestFailed {
        transaction_id: TransactionId,
        causes: Vec<CatalogFailure>,
    },

    /// A fan-out branch exceeded its deadline.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Catalog id is not managed by this service
    #[error("Catalog not found: {0}")]
    CatalogNotFound(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation disabled by service or catalog permissions
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Ingest mapper failure
    #[error("Ingest mapper error: {0}")]
    Mapper(String),

    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether a backend call that failed with this error may be retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::BackendUnavailable(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_backend_unavailable() {
        let err = Error::BackendUnavailable("connection refused".to_string());
        assert_eq!(err.to_string(), "Backend unavailable: connection refused");
    }

    #[test]
    fn test_error_display_backend_write() {
        let err = Error::BackendWrite("duplicate key".to_string());
        assert_eq!(err.to_string(), "Backend write error: duplicate key");
    }

    #[test]
    fn test_error_display_ingest_failed_lists_causes() {
        let err = Error::IngestFailed {
            transaction_id: TransactionId::new("tx-1"),
            causes: vec![
                CatalogFailure::new("products", "disk full"),
                CatalogFailure::new("fulltext", "timed out"),
            ],
        };
        assert_eq!(
            err.to_string(),
            "Ingest failed for transaction tx-1: products: disk full; fulltext: timed out"
        );
    }

    #[test]
    fn test_error_display_catalog_not_found() {
        let err = Error::CatalogNotFound("archive".to_string());
        assert_eq!(err.to_string(), "Catalog not found: archive");
    }

    #[test]
    fn test_error_display_permission_denied() {
        let err = Error::PermissionDenied("ingest restricted".to_string());
        assert_eq!(err.to_string(), "Permission denied: ingest restricted");
    }

    #[test]
    fn test_only_unavailable_is_transient() {
        assert!(Error::BackendUnavailable("x".into()).is_transient());
        assert!(!Error::BackendWrite("x".into()).is_transient());
        assert!(!Error::Timeout("x".into()).is_transient());
        assert!(!Error::Internal("x".into()).is_transient());
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<i32>("not a number").unwrap_err();
        let err: Error = json_err.into();
        match err {
            Error::Serialization(msg) => assert!(!msg.is_empty()),
            _ => panic!("Expected Serialization error"),
        }
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.to_string().contains("access denied"));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<Error>();
        assert_sync::<Error>();
    }

    #[test]
    fn test_catalog_failure_serializes() {
        let failure = CatalogFailure::new("products", "boom");
        let json = serde_json::to_value(&failure).unwrap();
        assert_eq!(json["catalog_id"], "products");
        assert_eq!(json["reason"], "boom");
    }
}
