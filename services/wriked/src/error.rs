//! HTTP error responses
//!
//! Maps token manager failures and bad input onto status codes and a JSON
//! body of the form `{"error":{"type":...,"message":...}}`.

use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};

/// Errors surfaced by the HTTP handlers.
#[derive(Debug)]
pub enum ApiError {
    /// Caller sent unusable input
    BadRequest(&'static str),
    Token(token_manager::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        use token_manager::Error;
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Token(Error::CodePending) => StatusCode::CONFLICT,
            ApiError::Token(Error::NoTokenAvailable | Error::TokenExpired) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ApiError::Token(Error::SchedulerStopped) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Token(_) => StatusCode::BAD_GATEWAY,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "invalid_request",
            ApiError::Token(e) => e.kind(),
        }
    }
}

impl From<token_manager::Error> for ApiError {
    fn from(e: token_manager::Error) -> Self {
        ApiError::Token(e)
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::BadRequest(msg) => f.write_str(msg),
            ApiError::Token(e) => write!(f, "{e}"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": {
                "type": self.kind(),
                "message": self.to_string(),
            }
        });
        (
            self.status(),
            [(header::CONTENT_TYPE, "application/json")],
            body.to_string(),
        )
            .into_response()
    }
}
