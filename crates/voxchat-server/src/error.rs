//! API error handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use voxchat_core::Error;

/// API error type
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: msg.into(),
        }
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: msg.into(),
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: msg.into(),
        }
    }

    pub fn service_unavailable(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            message: msg.into(),
        }
    }

    fn kind(&self) -> &'static str {
        match self.status {
            StatusCode::BAD_REQUEST => "invalid_request_error",
            StatusCode::NOT_FOUND => "not_found_error",
            StatusCode::SERVICE_UNAVAILABLE => "service_unavailable",
            _ => "server_error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "detail": self.message,
            "error": {
                "message": self.message,
                "type": self.kind(),
                "code": self.status.as_str()
            }
        }));
        (self.status, body).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::ModelNotLoaded(msg) => ApiError::service_unavailable(msg),
            Error::InvalidInput(msg) => ApiError::bad_request(msg),
            Error::ModelFilesNotFound(msg) => ApiError::not_found(msg),
            Error::Inference(msg) => ApiError::internal(msg),
            other => ApiError::internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_errors_map_to_status_codes() {
        let cases = [
            (Error::ModelNotLoaded("x".into()), StatusCode::SERVICE_UNAVAILABLE),
            (Error::InvalidInput("x".into()), StatusCode::BAD_REQUEST),
            (Error::ModelFilesNotFound("x".into()), StatusCode::NOT_FOUND),
            (Error::Inference("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (Error::Worker("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status, status);
        }
    }

    #[test]
    fn unavailable_keeps_plain_detail() {
        let err = ApiError::from(Error::ModelNotLoaded("LLM model is not available".into()));
        assert_eq!(err.message, "LLM model is not available");
        assert_eq!(err.kind(), "service_unavailable");
    }
}
