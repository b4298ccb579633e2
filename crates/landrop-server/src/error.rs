use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use landrop_shared::error::TransferStateError;
use landrop_shared::types::{DeviceId, TransferId};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Transfer already exists: {0}")]
    TransferExists(TransferId),

    #[error("Transfer not found: {0}")]
    TransferNotFound(TransferId),

    #[error("Device not found: {0}")]
    DeviceNotFound(DeviceId),

    #[error(transparent)]
    TransferState(#[from] TransferStateError),

    /// Download attempted without a prior accept. Deliberately carries no
    /// transfer id so the response cannot confirm existence.
    #[error("Forbidden")]
    NotAccepted,

    #[error("No relayed payload for transfer: {0}")]
    RelayMissing(TransferId),

    #[error("Payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: u64, max: u64 },

    #[error("Upload timed out waiting for body data")]
    UploadTimeout,

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::TransferExists(_) => (StatusCode::CONFLICT, self.to_string()),
            ServerError::TransferNotFound(_) | ServerError::DeviceNotFound(_) => {
                (StatusCode::NOT_FOUND, self.to_string())
            }
            ServerError::TransferState(_) => (StatusCode::CONFLICT, self.to_string()),
            ServerError::NotAccepted => (StatusCode::FORBIDDEN, self.to_string()),
            ServerError::RelayMissing(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ServerError::PayloadTooLarge { .. } => {
                (StatusCode::PAYLOAD_TOO_LARGE, self.to_string())
            }
            ServerError::UploadTimeout => (StatusCode::REQUEST_TIMEOUT, self.to_string()),
            ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}
