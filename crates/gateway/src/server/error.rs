//! HTTP error mapping.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use protocol::{ErrorBody, ErrorCode};
use thiserror::Error;

use crate::session::SessionError;

/// Errors returned by the HTTP surface.
#[derive(Error, Debug)]
pub enum ApiError {
    /// Missing or malformed parameters.
    #[error("{0}")]
    Validation(String),

    /// Missing or wrong bearer token.
    #[error("unauthorized")]
    Unauthorized,

    /// A gateway operation failed.
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        ApiError::Validation(message.into())
    }

    /// Returns the wire error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            ApiError::Validation(_) => ErrorCode::InvalidRequest,
            ApiError::Unauthorized => ErrorCode::Unauthorized,
            ApiError::Session(e) => session_error_code(e),
        }
    }

    /// Returns the HTTP status.
    pub fn status(&self) -> StatusCode {
        match self.code() {
            ErrorCode::InvalidRequest => StatusCode::BAD_REQUEST,
            ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::NotReady | ErrorCode::Aborted => StatusCode::CONFLICT,
            ErrorCode::ConnectFailed | ErrorCode::ChannelFailed => StatusCode::BAD_GATEWAY,
            ErrorCode::LimitReached => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            code: self.code(),
            message: self.to_string(),
        }
    }
}

/// Maps a gateway error to its wire code.
pub fn session_error_code(error: &SessionError) -> ErrorCode {
    match error {
        SessionError::NotFound(_) => ErrorCode::NotFound,
        SessionError::NotReady(_) => ErrorCode::NotReady,
        SessionError::Connect(_) => ErrorCode::ConnectFailed,
        SessionError::Channel(_) => ErrorCode::ChannelFailed,
        SessionError::Aborted(_) => ErrorCode::Aborted,
        SessionError::LimitReached(_) => ErrorCode::LimitReached,
        SessionError::InvalidSize { .. } => ErrorCode::InvalidRequest,
        SessionError::IdInUse(_) => ErrorCode::InternalError,
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Validation(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(status = %status, error = %self, "Request failed");
        } else {
            tracing::debug!(status = %status, error = %self, "Request rejected");
        }
        (status, Json(self.body())).into_response()
    }
}
