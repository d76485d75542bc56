use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use hostop_broker::BrokerError;
use hostop_core::OperatorError;
use hostop_engine::{InstanceError, OperationError};

/// Error returned by every HTTP handler. Renders as `{"error": "<message>"}`.
#[derive(Debug)]
pub struct ApiError(pub OperatorError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::warn!(kind = self.0.error_kind(), error = %self.0, "request failed");
        }
        let body = serde_json::json!({ "error": self.0.public_message() });
        (status, Json(body)).into_response()
    }
}

impl From<OperatorError> for ApiError {
    fn from(err: OperatorError) -> Self {
        Self(err)
    }
}

impl From<BrokerError> for ApiError {
    fn from(err: BrokerError) -> Self {
        Self(err.into())
    }
}

impl From<InstanceError> for ApiError {
    fn from(err: InstanceError) -> Self {
        Self(err.into())
    }
}

impl From<OperationError> for ApiError {
    fn from(err: OperationError) -> Self {
        Self(err.into())
    }
}
