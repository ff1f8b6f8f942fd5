//! Error taxonomy for the deployment orchestrator.
//!
//! Every operation failure surfaces as one of these variants; the HTTP
//! layer maps them onto status codes via `IntoResponse`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed input (bad branch, pagination params). Not retried.
    #[error("{0}")]
    Validation(String),

    /// Missing or invalid credentials on an authenticated surface.
    #[error("{0}")]
    Unauthorized(String),

    /// Mutation attempted by a non-owner.
    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    /// An active deployment already exists for the project.
    #[error("{0}")]
    Conflict(String),

    /// Cancel (or any transition) targeting a finished deployment.
    #[error("{0}")]
    AlreadyTerminal(String),

    /// The build backend rejected the submission. Terminal for that
    /// deployment; an operator may redeploy manually.
    #[error("build submission rejected: {0}")]
    Submission(String),

    /// Build backend credentials could not be acquired.
    #[error("build backend credentials unavailable: {0}")]
    BackendAuth(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Conflict(_) | Error::AlreadyTerminal(_) => StatusCode::CONFLICT,
            Error::Submission(_) | Error::BackendAuth(_) => StatusCode::BAD_GATEWAY,
            Error::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

impl From<diesel::result::Error> for Error {
    fn from(e: diesel::result::Error) -> Self {
        use diesel::result::{DatabaseErrorKind, Error as DieselError};
        match e {
            DieselError::NotFound => Error::NotFound("record not found".to_string()),
            DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
                Error::Conflict(info.message().to_string())
            }
            other => Error::Storage(other.to_string()),
        }
    }
}
