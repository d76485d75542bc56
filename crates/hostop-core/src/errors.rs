/// Client-facing error taxonomy.
///
/// Every crate-level error converts into one of these before it crosses the
/// HTTP boundary. `Internal` carries a public message only; the underlying
/// cause is logged where it happens and never serialized.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum OperatorError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Internal(String),
    #[error("{0}")]
    Transport(String),
    #[error("stage {stage} failed: {message}")]
    Stage { stage: String, message: String },
    #[error("{0}")]
    Unavailable(String),
    #[error("{0}")]
    BadGateway(String),
}

impl OperatorError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// HTTP status code used when this error is returned to a client.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::NotFound(_) => 404,
            Self::Internal(_) | Self::Transport(_) | Self::Stage { .. } => 500,
            Self::BadGateway(_) => 502,
            Self::Unavailable(_) => 503,
        }
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound(_) => "not_found",
            Self::Internal(_) => "internal",
            Self::Transport(_) => "transport",
            Self::Stage { .. } => "stage",
            Self::Unavailable(_) => "unavailable",
            Self::BadGateway(_) => "bad_gateway",
        }
    }

    /// Message safe to show to a client.
    pub fn public_message(&self) -> String {
        match self {
            Self::Transport(_) | Self::Stage { .. } => "Internal server error".into(),
            other => other.to_string(),
        }
    }
}
