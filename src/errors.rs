use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GoldFeedError {
    #[error("WebSocket error: {0}")]
    WebSocketError(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("configuration error: {0}")]
    ConfigError(#[from] config::ConfigError),

    #[error("URL parse error: {0}")]
    UrlParseError(#[from] url::ParseError),

    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("channel closed")]
    ChannelClosed,

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    SerializationError(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, GoldFeedError>;
