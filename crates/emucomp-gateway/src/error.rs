//! Mapping of core errors onto HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use emucomp_core::{CoreError, ErrorKind};
use serde::Serialize;

/// Error body returned by every endpoint.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// A failed request.
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct ApiError(#[from] pub CoreError);

impl ApiError {
    /// HTTP status for the wrapped error.
    pub fn status(&self) -> StatusCode {
        match self.0.kind() {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::BadRequest => StatusCode::BAD_REQUEST,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        } else {
            tracing::debug!(error = %self.0, status = status.as_u16(), "Request rejected");
        }

        let details = match &self.0 {
            CoreError::Process(e) => Some(format!("{e:?}")),
            _ => None,
        };
        let body = ErrorBody {
            message: self.0.to_string(),
            details,
        };
        (status, Json(body)).into_response()
    }
}

/// Result type for handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let status = |e: CoreError| ApiError(e).status();
        assert_eq!(status(CoreError::not_found("component", "x")), StatusCode::NOT_FOUND);
        assert_eq!(
            status(CoreError::InvalidArgument("bad".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status(CoreError::DuplicateEndpoint("ws://x".into())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status(CoreError::Spawn("vde_switch".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_error_body() {
        let response = ApiError(CoreError::TypeMismatch {
            id: "c".into(),
            expected: "switch".into(),
            actual: "emulator".into(),
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
