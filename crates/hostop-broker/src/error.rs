use hostop_core::OperatorError;
use hostop_transport::TransportError;

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Device disconnected")]
    DeviceGone,

    #[error("Client disconnected: {0}")]
    UnknownClient(i64),

    #[error("Polled connection not found: {0}")]
    ConnectionNotFound(String),

    #[error("{0}")]
    InvalidRange(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("proxy request failed: {0}")]
    Proxy(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<BrokerError> for OperatorError {
    fn from(err: BrokerError) -> Self {
        match err {
            BrokerError::DeviceNotFound(_)
            | BrokerError::DeviceGone
            | BrokerError::UnknownClient(_)
            | BrokerError::ConnectionNotFound(_)
            | BrokerError::FileNotFound(_) => OperatorError::NotFound(err.to_string()),
            BrokerError::InvalidRange(msg) => OperatorError::Validation(msg),
            BrokerError::Proxy(msg) => OperatorError::BadGateway(msg),
            BrokerError::Transport(e) => OperatorError::Transport(e.to_string()),
            BrokerError::Io(e) => {
                tracing::error!(error = %e, "broker IO failure");
                OperatorError::internal("Internal server error")
            }
        }
    }
}
