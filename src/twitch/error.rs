use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TwitchError {
    #[error("HTTP request failed: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("JSON deserialization failed: {0}")]
    SerdeJson(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TCP connection timed out after {0:?}")]
    ConnectTimeout(Duration),
    #[error("Connection is closed")]
    ConnectionClosed,
    #[error("Received a line longer than {0} bytes")]
    LineTooLong(usize),
    #[error("Server requested a reconnect")]
    ReconnectRequested,
    #[error("Twitch IRC authentication/API error: {0}")]
    TwitchAuth(String),
    #[error("Channel not found: {0}")]
    ChannelNotFound(String),
}

pub type Result<T, E = TwitchError> = std::result::Result<T, E>;
