use thiserror::Error;

/// Library-wide error type
#[derive(Error, Debug)]
pub enum LibraryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Failed to parse PDF {path}: {message}")]
    Pdf { path: String, message: String },

    #[error("Failed to parse EPUB {path}: {message}")]
    Epub { path: String, message: String },

    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Timed out after {seconds}s: {path}")]
    Timeout { path: String, seconds: u64 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Task error: {0}")]
    Task(String),
}

pub type Result<T> = std::result::Result<T, LibraryError>;
