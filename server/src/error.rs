//! HTTP error mapping.
//!
//! Every failure a route can produce maps to a status code plus a JSON body
//! of the form `{"error": ..., "details": ...}`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Pushed content failed validation against the group schema.
    #[error("Invalid content: {0}")]
    InvalidContent(#[from] listsync_engine::Error),

    #[error("Invalid group id: {0:?}")]
    InvalidGroup(String),

    /// The server has never seen the group.
    #[error("Unknown group: {0}")]
    UnknownGroup(String),

    #[error("Unauthorized")]
    Unauthorized,
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::InvalidContent(_) | AppError::InvalidGroup(_) => StatusCode::BAD_REQUEST,
            AppError::UnknownGroup(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = match &self {
            AppError::InvalidContent(e) => {
                tracing::warn!(error = %e, "Rejected pushed content");
                ErrorBody {
                    error: "Invalid content".to_string(),
                    details: Some(e.to_string()),
                }
            }
            other => ErrorBody {
                error: other.to_string(),
                details: None,
            },
        };

        (self.status(), Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
