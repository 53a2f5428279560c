//! Error types for the portal core.
//!
//! Errors are classified by how the owning view should react:
//! - Transient: initial fetch / refetch failures — surfaced as a
//!   "failed to load" state, user retries manually.
//! - Non-fatal: persistence and geocode failures — logged, the view keeps
//!   going with whatever it has.

use thiserror::Error;

/// Errors surfaced by the reference data store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Failed to create state directory: {0}")]
    CreateDir(std::io::Error),

    #[error("Could not determine home directory")]
    NoHomeDir,

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("No such row: {table} id {id}")]
    RowNotFound { table: &'static str, id: String },
}

/// Errors surfaced by the portal core modules.
#[derive(Debug, Error)]
pub enum PortalError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Fetch failed: {0}")]
    Fetch(String),

    #[error("Persistence failed: {0}")]
    Persistence(String),

    #[error("Geocode provider error: {0}")]
    Geocode(String),
}

impl PortalError {
    /// True when the owning view should show a retryable "failed to load"
    /// state rather than degrade silently.
    pub fn is_transient(&self) -> bool {
        matches!(self, PortalError::Fetch(_) | PortalError::Geocode(_))
    }
}
