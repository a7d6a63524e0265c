use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Database connection error: {0}")]
    Connection(#[from] tokio_rusqlite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Feed parse error: {0}")]
    FeedParse(#[from] feed_rs::parser::ParseFeedError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid candidate {url:?}: {reason}")]
    Validation { url: String, reason: String },

    #[error("Extraction failed for {url}: {reason}")]
    Extraction { url: String, reason: String },

    #[error("Integrity violation for {url} (content_hash {content_hash}, canonical {canonical_id}): {reason}")]
    Integrity {
        url: String,
        content_hash: String,
        canonical_id: i64,
        reason: String,
    },

    #[error("Archive is locked by another run: {0}")]
    StoreLocked(String),

    #[error("Collection run interrupted")]
    Interrupted,

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    pub fn validation(url: impl Into<String>, reason: impl Into<String>) -> Self {
        AppError::Validation {
            url: url.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
