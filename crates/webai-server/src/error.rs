//! Mapping from the core error taxonomy to HTTP responses.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::warn;
use webai_core::Error;

/// Handler error. Renders as `{"error": {"message", "type", "code"}}`.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::ProviderUnavailable(_) | Error::CredentialsUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Error::AuthExpired(_) => StatusCode::UNAUTHORIZED,
            Error::Transport(_) => StatusCode::BAD_GATEWAY,
            Error::Config(_) | Error::Io(_) | Error::Json(_) | Error::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn kind(&self) -> &'static str {
        match &self.0 {
            Error::Validation(_) => "invalid_request_error",
            Error::AuthExpired(_) | Error::CredentialsUnavailable(_) => "authentication_error",
            _ => "api_error",
        }
    }

    pub fn body(&self) -> serde_json::Value {
        serde_json::json!({
            "error": {
                "message": self.0.to_string(),
                "type": self.kind(),
                "code": self.0.code(),
            }
        })
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(Error::Validation(rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!("Request failed ({}): {}", self.0.code(), self.0);
        }
        (status, Json(self.body())).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
