use thiserror::Error;

pub type Result<T> = std::result::Result<T, PostureError>;

#[derive(Error, Debug)]
pub enum PostureError {
    /// Credentials absent, invalid, or lacking permission. Never retried.
    #[error("Access error: {0}")]
    Access(String),

    /// Network or service fault while talking to the cloud provider.
    #[error("Transient error: {0}")]
    Transient(String),

    /// Malformed payload. Rule evaluators treat this as "not configured".
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl PostureError {
    pub fn exit_code(&self) -> i32 {
        2
    }
}
