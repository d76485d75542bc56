#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connection closed")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed message: {0}")]
    Decode(#[from] serde_json::Error),

    /// A frame header announced more bytes than the configured limit.
    #[error("message too large: {0}")]
    Oversized(String),

    #[error("websocket error: {0}")]
    WebSocket(String),
}

impl TransportError {
    /// Whether the peer is gone, as opposed to having sent a bad message.
    pub fn is_disconnect(&self) -> bool {
        !matches!(self, Self::Decode(_) | Self::Oversized(_))
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
