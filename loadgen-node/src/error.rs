use thiserror::Error;

/// Errors that can occur in the load generator library
#[derive(Error, Debug)]
pub enum LoadgenError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transport-level failure talking to the target (connect, timeout, reset)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Response body could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Fixture setup or pre-flight failure
    #[error("Setup error: {0}")]
    Setup(String),

    /// Malformed threshold expression
    #[error("Threshold error: {0}")]
    Threshold(String),

    /// Local I/O error (config, report file)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// Result type alias using LoadgenError
pub type Result<T> = std::result::Result<T, LoadgenError>;

impl From<String> for LoadgenError {
    fn from(s: String) -> Self {
        LoadgenError::Other(s)
    }
}

impl From<&str> for LoadgenError {
    fn from(s: &str) -> Self {
        LoadgenError::Other(s.to_string())
    }
}

impl From<serde_json::Error> for LoadgenError {
    fn from(err: serde_json::Error) -> Self {
        LoadgenError::Decode(err.to_string())
    }
}

impl From<reqwest::Error> for LoadgenError {
    fn from(err: reqwest::Error) -> Self {
        LoadgenError::Transport(err.to_string())
    }
}

impl From<config::ConfigError> for LoadgenError {
    fn from(err: config::ConfigError) -> Self {
        LoadgenError::Config(err.to_string())
    }
}
