use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tts_core::{InvalidRequest, SynthesisError};

/// API Error types
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Synthesis(#[from] SynthesisError),

    #[error("Internal server error: {0}")]
    InternalError(String),
}

impl From<InvalidRequest> for ApiError {
    fn from(err: InvalidRequest) -> Self {
        ApiError::Synthesis(SynthesisError::InvalidRequest(err))
    }
}

/// Error response structure
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    kind: &'static str,
    code: u16,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Synthesis(err) => match err {
                SynthesisError::InvalidRequest(InvalidRequest::TextTooLong { .. }) => {
                    StatusCode::PAYLOAD_TOO_LARGE
                }
                SynthesisError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
                SynthesisError::EngineUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                SynthesisError::EngineTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
                SynthesisError::Engine(_)
                | SynthesisError::Storage(_)
                | SynthesisError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::Synthesis(err) => err.kind(),
            ApiError::InternalError(_) => "internal_error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(kind = self.kind(), "Request failed: {}", self);
        }

        let body = Json(ErrorResponse {
            error: self.to_string(),
            kind: self.kind(),
            code: status.as_u16(),
        });

        (status, body).into_response()
    }
}
