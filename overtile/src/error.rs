//! API-facing error type.
//!
//! Every error leaving the HTTP layer is a status code plus a
//! `{"error": "<message>"}` body; internals are logged, never serialized.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::error;

use crate::dispatch::DispatchError;

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn payload_too_large(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::PAYLOAD_TOO_LARGE,
            message: message.into(),
        }
    }

    pub fn bad_gateway() -> Self {
        Self {
            status: StatusCode::BAD_GATEWAY,
            message: "Upstream error".to_string(),
        }
    }

    pub fn internal() -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "Internal server error".to_string(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<DispatchError> for ApiError {
    fn from(error: DispatchError) -> Self {
        match &error {
            DispatchError::MissingQuery | DispatchError::MissingBoundingBox => {
                Self::bad_request(error.to_string())
            }
            DispatchError::TooManyTiles(_) => Self::payload_too_large(error.to_string()),
            DispatchError::Grid(_) | DispatchError::Store(_) | DispatchError::Upstream(_) => {
                error!(%error, "dispatch failed");
                Self::internal()
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_errors_map_onto_the_documented_statuses() {
        let cases = [
            (DispatchError::MissingQuery, StatusCode::BAD_REQUEST),
            (DispatchError::MissingBoundingBox, StatusCode::BAD_REQUEST),
            (
                DispatchError::TooManyTiles(4097),
                StatusCode::PAYLOAD_TOO_LARGE,
            ),
        ];
        for (error, status) in cases {
            assert_eq!(ApiError::from(error).status(), status);
        }
    }

    #[test]
    fn validation_messages_are_client_facing() {
        assert_eq!(
            ApiError::from(DispatchError::MissingQuery).message(),
            "Query payload required"
        );
        assert_eq!(
            ApiError::from(DispatchError::MissingBoundingBox).message(),
            "Bounding box required"
        );
        assert_eq!(
            ApiError::from(DispatchError::TooManyTiles(9)).message(),
            "Request requires 9 tiles"
        );
    }

    #[test]
    fn internal_errors_never_leak_details() {
        let error = ApiError::from(DispatchError::Upstream(
            overtile_core::FetchError::Unavailable("secret-host refused".to_string()),
        ));
        assert_eq!(error.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(error.message(), "Internal server error");
    }
}
