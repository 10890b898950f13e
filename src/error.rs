use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;
use validator::ValidationErrors;

use crate::{
    dao::storage::StorageError,
    services::identity::AuthError,
    state::{contest::RoomCode, coordinator::CoordinatorError},
};

/// Message shown to clients for failures they cannot act on.
pub const GENERIC_FAILURE: &str = "internal server error";

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The session token could not be verified.
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),
    /// The identity already belongs to a room.
    #[error("already in a room")]
    AlreadyInRoom,
    #[error("room `{0}` does not exist")]
    RoomNotFound(RoomCode),
    #[error("room `{0}` is full")]
    RoomFull(RoomCode),
    /// A record other than the room itself does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// Caller lacks the privilege for the operation (e.g. not the host).
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    /// Invalid input provided by the client.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Operation cannot be performed in the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("not in a room")]
    NotInRoom,
    /// The same identity already has a create or join in progress.
    #[error("request already in progress")]
    Duplicate,
    /// Storage backend failed.
    #[error("storage unavailable")]
    Unavailable(#[source] StorageError),
    /// Too many concurrent writers on one record.
    #[error("contention on `{key}` did not resolve")]
    Transient { key: String },
    /// Application is running in degraded mode without storage.
    #[error("storage unavailable (degraded mode)")]
    Degraded,
}

impl ServiceError {
    /// Stable machine-readable code sent to clients.
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::Auth(_) => "auth_error",
            ServiceError::AlreadyInRoom => "already_in_room",
            ServiceError::RoomNotFound(_) => "room_not_found",
            ServiceError::RoomFull(_) => "room_full",
            ServiceError::NotFound(_) => "not_found",
            ServiceError::PermissionDenied(_) => "permission_denied",
            ServiceError::InvalidInput(_) => "input_error",
            ServiceError::InvalidState(_) => "invalid_state",
            ServiceError::NotInRoom => "not_in_room",
            ServiceError::Duplicate
            | ServiceError::Unavailable(_)
            | ServiceError::Transient { .. }
            | ServiceError::Degraded => "server_error",
        }
    }

    /// Whether the failure is ours rather than the caller's.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            ServiceError::Unavailable(_) | ServiceError::Transient { .. } | ServiceError::Degraded
        )
    }

    /// Message safe to send to the caller.
    pub fn client_message(&self) -> String {
        if self.is_internal() {
            GENERIC_FAILURE.to_string()
        } else {
            self.to_string()
        }
    }
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        ServiceError::Unavailable(err)
    }
}

impl From<CoordinatorError> for ServiceError {
    fn from(err: CoordinatorError) -> Self {
        match err {
            CoordinatorError::Storage(source) => ServiceError::Unavailable(source),
            CoordinatorError::RetriesExhausted { key, .. } => ServiceError::Transient { key },
        }
    }
}

impl From<ValidationErrors> for ServiceError {
    fn from(err: ValidationErrors) -> Self {
        ServiceError::InvalidInput(format!("validation failed: {err}"))
    }
}

/// Application-level errors that are converted to HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// Bad request with invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// Unauthorized access attempt.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    /// Requested resource not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Conflict with current state.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Service unavailable or degraded.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    /// Internal server error.
    #[error("internal server error")]
    Internal,
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        let message = err.to_string();
        match err {
            ServiceError::Auth(_) => AppError::Unauthorized(message),
            ServiceError::PermissionDenied(_) => AppError::Forbidden(message),
            ServiceError::InvalidInput(_) => AppError::BadRequest(message),
            ServiceError::RoomNotFound(_) | ServiceError::NotFound(_) => {
                AppError::NotFound(message)
            }
            ServiceError::AlreadyInRoom
            | ServiceError::RoomFull(_)
            | ServiceError::InvalidState(_)
            | ServiceError::NotInRoom
            | ServiceError::Duplicate => AppError::Conflict(message),
            ServiceError::Degraded => AppError::ServiceUnavailable("degraded mode".into()),
            ServiceError::Unavailable(_) | ServiceError::Transient { .. } => AppError::Internal,
        }
    }
}

impl From<ValidationErrors> for AppError {
    fn from(err: ValidationErrors) -> Self {
        AppError::BadRequest(format!("validation failed: {}", err))
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let payload = Json(ErrorBody {
            message: self.to_string(),
        });

        (status, payload).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_failures_hide_details_from_clients() {
        let err: ServiceError = CoordinatorError::RetriesExhausted {
            key: "rooms/ABCDEF".into(),
            attempts: 16,
        }
        .into();
        assert_eq!(err.code(), "server_error");
        assert_eq!(err.client_message(), GENERIC_FAILURE);
    }

    #[test]
    fn domain_failures_keep_their_code() {
        let code = RoomCode::parse("ABCDEF").unwrap();
        assert_eq!(ServiceError::RoomFull(code.clone()).code(), "room_full");
        assert_eq!(
            ServiceError::RoomNotFound(code).client_message(),
            "room `ABCDEF` does not exist"
        );
        assert_eq!(
            ServiceError::Auth(AuthError::Rejected).code(),
            "auth_error"
        );
    }
}
