//! HTTP mapping for core errors.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};

use gazetrack_core::Error;

/// A core [`Error`] on its way out as a `{"detail": ...}` response.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        // Storage and encoding failures stay in the log, not in the body.
        let detail = match &self.0 {
            Error::Io(_) | Error::Json(_) | Error::Transport(_) => {
                log::error!("request failed: {}", self.0);
                "internal server error".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(serde_json::json!({ "detail": detail }))).into_response()
    }
}
