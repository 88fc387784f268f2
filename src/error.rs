use axum::{http::StatusCode, response::{IntoResponse, Response}};
use thiserror::Error;
use tracing::error;

use crate::store::StoreError;

pub type AppResult<T> = Result<T, AppError>;

/// Reasons a connection attempt (or request) is refused. The deny variants
/// surface their message to the client; everything else collapses to a
/// plain 500 so no storage detail leaks out.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid credential")]
    AuthRejected,
    #[error("room not found")]
    RoomNotFound,
    #[error("not a member")]
    NotMember,
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::AuthRejected => StatusCode::UNAUTHORIZED,
            AppError::RoomNotFound => StatusCode::NOT_FOUND,
            AppError::NotMember => StatusCode::FORBIDDEN,
            AppError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self, "request failed");
            (status, "internal error").into_response()
        } else {
            (status, self.to_string()).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deny_reasons_map_to_distinct_statuses() {
        assert_eq!(AppError::AuthRejected.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::RoomNotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::NotMember.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn deny_reasons_are_caller_visible() {
        assert_eq!(AppError::AuthRejected.to_string(), "invalid credential");
        assert_eq!(AppError::RoomNotFound.to_string(), "room not found");
        assert_eq!(AppError::NotMember.to_string(), "not a member");
    }

    #[test]
    fn store_errors_do_not_leak_details() {
        let err = AppError::Store(StoreError::InvalidOperation("secret detail".into()));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
