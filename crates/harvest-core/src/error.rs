use thiserror::Error;

/// Application-wide error types for Harvest.
#[derive(Error, Debug)]
pub enum AppError {
    /// The remote service refused us (403/429) or the connection itself failed.
    /// `status` is `None` for transport-level failures.
    #[error("Hard block{}: {message}", .status.map_or(String::new(), |s| format!(" (HTTP {s})")))]
    HardBlock {
        status: Option<u16>,
        message: String,
    },

    /// Any other non-success fetch outcome.
    #[error("Fetch failed: {0}")]
    TransientFetch(String),

    /// Request timed out.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Connection could not be established (raw transport outcome).
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Other transport failure (raw transport outcome).
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// The document holds no record for the requested identifier.
    #[error("Record not found for identifier {0}")]
    ItemNotFound(u64),

    /// Field extraction failed on a fetched document.
    #[error("Extraction error: {0}")]
    ExtractionError(String),

    /// A proxy URI could not be parsed or uses an unsupported scheme.
    #[error("Invalid proxy '{uri}': {reason}")]
    InvalidProxy { uri: String, reason: String },

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    /// Returns true if this outcome suggests our network identity is blocked.
    pub fn is_hard_block(&self) -> bool {
        matches!(self, AppError::HardBlock { .. })
    }

    /// Returns true if this error is worth another attempt through a different proxy.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::HardBlock { .. }
                | AppError::TransientFetch(_)
                | AppError::Timeout(_)
                | AppError::NetworkError(_)
                | AppError::HttpError(_)
        )
    }
}
