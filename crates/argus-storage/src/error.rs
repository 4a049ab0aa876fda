/// Errors produced by the time-series layer.
///
/// The catalog store ([`crate::store::CatalogStore`]) returns
/// `anyhow::Result` like the rest of the SeaORM call sites; the
/// partitioned time-series engine uses this typed error so callers can
/// distinguish deadline and truncation conditions from plain SQLite
/// faults.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A required record was not found.
    #[error("storage: {entity} not found (id={id})")]
    NotFound { entity: &'static str, id: String },

    /// The query window or filter is malformed.
    #[error("storage: invalid query: {0}")]
    InvalidQuery(String),

    /// The query did not complete within its deadline.
    #[error("storage: query deadline exceeded ({deadline_ms}ms)")]
    DeadlineExceeded { deadline_ms: u64 },

    /// An underlying SQLite error.
    #[error("storage: SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON serialization failure (labels / data columns).
    #[error("storage: JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Filesystem error while managing partition files.
    #[error("storage: IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic storage error for cases not covered by other variants.
    #[error("storage: {0}")]
    Other(String),
}

/// Convenience `Result` alias for time-series operations.
pub type Result<T> = std::result::Result<T, StorageError>;
