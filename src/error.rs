//! Error types for the RTK client.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RtkError {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WebSocket: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Task join: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("Config: {0}")]
    Config(String),

    #[error("Protocol: {0}")]
    Protocol(String),

    #[error("Transport: {0}")]
    Transport(String),

    #[error("Timed out: {0}")]
    Timeout(String),
}

pub type Result<T> = std::result::Result<T, RtkError>;
