//! Error types for the datawatch client

/// Errors that can occur in the datawatch client
#[derive(Debug, thiserror::Error)]
pub enum DatawatchError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Malformed entry: {0}")]
    MalformedEntry(String),

    #[error("Stale update for '{0}'")]
    StaleUpdate(String),

    #[error("Push channel error: {0}")]
    PushChannel(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for datawatch operations
pub type Result<T> = std::result::Result<T, DatawatchError>;
