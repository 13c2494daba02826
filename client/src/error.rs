//! Error types for the sync client.

/// Failures of one synchronization attempt.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Engine error: {0}")]
    Engine(#[from] listsync_engine::Error),
}

impl SyncError {
    /// Whether another attempt can succeed without the caller changing
    /// anything. Missing configuration needs outside action first.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, SyncError::Config(_))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SyncError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::{http::StatusCode, Error};
        match e {
            Error::Http(response)
                if response.status() == StatusCode::UNAUTHORIZED
                    || response.status() == StatusCode::FORBIDDEN =>
            {
                SyncError::Auth(format!("server refused credential ({})", response.status()))
            }
            other => SyncError::Network(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Protocol(e.to_string())
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("LISTSYNC_SERVER_URL environment variable is required")]
    MissingServerUrl,

    #[error("Invalid server URL {url}: {reason}")]
    InvalidServerUrl { url: String, reason: String },

    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },

    #[error("No sync group is selected")]
    MissingGroup,
}

pub type Result<T> = std::result::Result<T, SyncError>;
