pub mod agenda;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tokio::task::JoinError;
use tracing::error;

/// Standard API error response
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Failures a display can get back instead of an agenda.
#[derive(Debug)]
pub enum AppError {
    /// The refresh task ended without reporting an outcome. The previous
    /// agenda is still being served.
    RefreshAborted(&'static str),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::RefreshAborted(why) => (
                StatusCode::SERVICE_UNAVAILABLE,
                format!("Refresh {why}; the previous agenda is still served"),
            ),
        };
        error!(status = status.as_u16(), "{message}");
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<JoinError> for AppError {
    fn from(err: JoinError) -> Self {
        if err.is_panic() {
            AppError::RefreshAborted("panicked")
        } else {
            AppError::RefreshAborted("was cancelled")
        }
    }
}
