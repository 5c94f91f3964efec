use thiserror::Error;

#[derive(Error, Debug)]
pub enum TokenBurnError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Missing input: {0}")]
    MissingInput(String),

    #[error("Cannot build {requested} strictly increasing prompts from {available} words")]
    InvalidPromptCount { requested: usize, available: usize },

    #[error("Cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, TokenBurnError>;
