/// Errors surfaced by ingestion and query operations.
///
/// Malformed model output has no variant: extraction recovers from it locally.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Expected embedding dimension {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unsupported document: {0}")]
    UnsupportedDocument(String),

    #[error("Document conversion failed: {0}")]
    Conversion(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::ServiceUnavailable(err.to_string())
    }
}

impl Error {
    /// Whether the caller is at fault (maps to a 4xx at the HTTP boundary)
    pub fn is_invalid_input(&self) -> bool {
        matches!(self, Error::InvalidInput(_) | Error::UnsupportedDocument(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
