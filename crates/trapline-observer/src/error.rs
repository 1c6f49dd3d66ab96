//! Error types for the observer API.
//!
//! [`ObserverError`] unifies the handler failure modes into one enum that
//! converts into an Axum HTTP response via its
//! [`IntoResponse`](axum::response::IntoResponse) implementation.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use trapline_core::operator::ConfirmError;

/// Errors that can occur in the observer API layer.
#[derive(Debug, thiserror::Error)]
pub enum ObserverError {
    /// The request was malformed or failed validation.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Settings could not be delivered to the loop.
    #[error("settings not accepted: {source}")]
    Confirm {
        /// Why the confirmation was refused.
        #[from]
        source: ConfirmError,
    },

    /// The endpoint needs a running session and none is attached.
    #[error("unavailable: {0}")]
    Unavailable(String),
}

impl IntoResponse for ObserverError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Confirm { .. } => StatusCode::CONFLICT,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };

        let body = serde_json::json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        });

        (status, axum::Json(body)).into_response()
    }
}
