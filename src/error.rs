use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Capture parse error: {0}")]
    CaptureParse(String),

    #[error("Price data error: {0}")]
    DataFetch(String),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Configuration error: {0}")]
    ConfigValue(String),

    #[error("Screen driver error: {0}")]
    Driver(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    /// Failures that mean "no item under the cursor" rather than a broken cycle.
    pub fn is_capture_miss(&self) -> bool {
        matches!(self, AppError::CaptureParse(_))
    }
}
