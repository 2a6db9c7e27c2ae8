//! Custom error types for tablesync

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for tablesync operations
///
/// Every variant maps onto one class of pass failure; [`Error::NotInitialized`]
/// is raised before a pass can start. Duplicate primary keys are not errors;
/// they are counted by the normalizer and logged as warnings.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Retrieval error: {0}")]
    Retrieval(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Store error (database): {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Unsupported update type: {0}")]
    UnsupportedPolicy(String),

    #[error("Credential error: {0}")]
    Credential(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Retrieval error (HTTP): {0}")]
    Http(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Config file not found: {}. Run 'tablesync init' first.", .0.display())]
    NotInitialized(PathBuf),
}

impl Error {
    /// True for failures raised while talking to the source system
    pub fn is_retrieval_error(&self) -> bool {
        matches!(self, Error::Retrieval(_) | Error::Http(_))
    }
}

/// Result type alias for tablesync
pub type Result<T> = std::result::Result<T, Error>;
