/// Shared error type used across all orchestrator crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("bad time unit: {0}")]
    BadUnit(String),

    #[error("bad cron expression: {0}")]
    BadCronExpression(String),

    #[error("module already registered: {0}")]
    AlreadyRegistered(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("dispatch failed for module {module}: {message}")]
    DispatchException { module: String, message: String },

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
