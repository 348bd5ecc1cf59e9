use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::error;

use parley_chat::ChatError;
use parley_types::api::ErrorBody;

/// HTTP face of a [`ChatError`].
#[derive(Debug)]
pub struct ApiError(pub ChatError);

impl From<ChatError> for ApiError {
    fn from(e: ChatError) -> Self {
        Self(e)
    }
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self(ChatError::validation(msg))
    }

    pub fn status_code(&self) -> StatusCode {
        match &self.0 {
            ChatError::Validation(_) => StatusCode::BAD_REQUEST,
            ChatError::NotFound(_) => StatusCode::NOT_FOUND,
            ChatError::AlreadyParticipant { .. } | ChatError::InvalidState { .. } => {
                StatusCode::CONFLICT
            }
            ChatError::Staging(_) | ChatError::Database(_) | ChatError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        // Internal details stay in the log.
        let message = if status.is_server_error() {
            error!("Request failed: {}", self.0);
            "internal server error".to_string()
        } else {
            self.0.to_string()
        };

        let body = ErrorBody {
            code: self.0.code().to_string(),
            message,
        };
        (status, Json(body)).into_response()
    }
}
