use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::auth::identity::IdentityError;
use crate::blog::repository::RepositoryError;
use crate::storage::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Not found")]
    NotFound,

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unprocessable: {0}")]
    Unprocessable(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<RepositoryError> for AppError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(_) => AppError::NotFound,
            RepositoryError::Conflict(msg) => AppError::Conflict(msg),
            RepositoryError::TooMany(msg) => AppError::Unprocessable(msg),
            RepositoryError::Invalid(msg) => AppError::BadRequest(msg),
            RepositoryError::Database(e) => AppError::Pool(e),
            RepositoryError::Sql(e) => AppError::Database(e),
        }
    }
}

fn internal(kind: &str, cause: &dyn std::fmt::Display) -> (StatusCode, String) {
    tracing::error!("{}: {}", kind, cause);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "Internal server error".to_string(),
    )
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::NotFound => (StatusCode::NOT_FOUND, "Not found".to_string()),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "Not authorized".to_string()),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::Unprocessable(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg.clone()),
            AppError::Database(e) => internal("Database error", e),
            AppError::Pool(e) => internal("Pool error", e),
            AppError::Internal(msg) => internal("Internal error", msg),
            AppError::Storage(e) => internal("Storage error", e),
            AppError::Json(e) => internal("JSON error", e),
            AppError::Identity(e) => match e {
                IdentityError::InvalidToken(_) | IdentityError::InvalidCredentials => {
                    tracing::warn!("Identity rejected: {}", e);
                    (StatusCode::UNAUTHORIZED, "Not authorized".to_string())
                }
                IdentityError::EmailInUse => (
                    StatusCode::CONFLICT,
                    "Email is already in use".to_string(),
                ),
                IdentityError::InvalidCode => (
                    StatusCode::BAD_REQUEST,
                    "Invalid verification code".to_string(),
                ),
                IdentityError::InvalidEmail => (
                    StatusCode::BAD_REQUEST,
                    "Invalid email address".to_string(),
                ),
                IdentityError::WeakPassword => (
                    StatusCode::BAD_REQUEST,
                    "Password must be at least 6 characters".to_string(),
                ),
                IdentityError::UnknownAccount => (StatusCode::NOT_FOUND, "Not found".to_string()),
                _ => internal("Identity error", e),
            },
        };

        (status, message).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    fn response_status(err: AppError) -> StatusCode {
        let response = err.into_response();
        response.status()
    }

    #[test]
    fn not_found_returns_404() {
        assert_eq!(response_status(AppError::NotFound), StatusCode::NOT_FOUND);
    }

    #[test]
    fn unauthorized_returns_401() {
        assert_eq!(
            response_status(AppError::Unauthorized),
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn forbidden_returns_403() {
        assert_eq!(
            response_status(AppError::Forbidden("Please verify your Email".into())),
            StatusCode::FORBIDDEN
        );
    }

    #[test]
    fn conflict_returns_409() {
        assert_eq!(
            response_status(AppError::Conflict("taken".into())),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn too_many_posts_returns_422() {
        let err: AppError = RepositoryError::TooMany("Cannot update the username".into()).into();
        assert_eq!(response_status(err), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn internal_returns_500() {
        assert_eq!(
            response_status(AppError::Internal("boom".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn invalid_token_returns_401() {
        let err = AppError::Identity(IdentityError::InvalidToken("expired".into()));
        assert_eq!(response_status(err), StatusCode::UNAUTHORIZED);
    }
}
