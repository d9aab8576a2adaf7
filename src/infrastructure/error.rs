use thiserror::Error;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error("Remote store error: {0}")]
    Remote(String),
    #[error("Network unavailable")]
    NetworkUnavailable,
    #[error("Authentication error: {0}")]
    Auth(String),
    #[error("Credential store error: {0}")]
    Credential(String),
    #[error("Not authenticated")]
    Unauthenticated,
}

impl InfraError {
    /// Failures that are expected to clear up on their own; a later sync
    /// trigger may simply try again.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::NetworkUnavailable => true,
            Self::Remote(message) | Self::Auth(message) => {
                let message = message.to_ascii_lowercase();
                message.contains("network error")
                    || message.contains("timeout")
                    || message.contains("timed out")
                    || message.contains("temporarily unavailable")
                    || message.contains("connection reset")
                    || message.contains("http 429")
                    || message.contains("http 5")
            }
            _ => false,
        }
    }
}
