use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Request-level failures surfaced to the editing client.
///
/// Every variant maps to one HTTP status so the front end can decide the
/// next action: 403 means "you may not do this at all", 409 means "reload
/// and retry with fresh state", 500 means "the save itself broke".
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("unauthorized: {0}")]
    Unauthorized(&'static str),

    #[error("edit conflict: file is at generation {current}")]
    Conflict { current: u64 },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Unauthorized(reason) => {
                (StatusCode::FORBIDDEN, format!("forbidden: {reason}")).into_response()
            }
            ApiError::Conflict { current } => (
                StatusCode::CONFLICT,
                format!(
                    "someone else saved this file first (now at generation {current}); \
                     save your work elsewhere and reload"
                ),
            )
                .into_response(),
            ApiError::Io(err) => {
                (StatusCode::INTERNAL_SERVER_ERROR, format!("save failed: {err}")).into_response()
            }
        }
    }
}
