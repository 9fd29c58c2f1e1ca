use thiserror::Error;

/// Main error type for Recollex operations
#[derive(Error, Debug)]
pub enum RecollexError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Index corruption: {0}")]
    Corruption(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Metadata store error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Could not acquire index lock within {waited_ms} ms")]
    LockTimeout { waited_ms: u64 },

    #[error("Index is open read-only: {0}")]
    ReadOnly(String),

    #[error("No encoder configured; use search_terms/add_many or open with an encoder")]
    NoEncoder,
}

/// Result type alias for Recollex operations
pub type Result<T> = std::result::Result<T, RecollexError>;

impl RecollexError {
    /// Check if this error marks the index as unusable for writes
    pub fn is_corruption(&self) -> bool {
        matches!(self, RecollexError::Corruption(_))
    }
}
