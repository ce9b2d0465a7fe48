use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::auth::SessionData;
use crate::error::AppError;
use crate::state::AppState;

pub const VERIFY_EMAIL: &str = "Please verify your Email";

/// The signed session of the current request.
/// Returns 401 if the cookie is missing, tampered or expired.
#[derive(Debug, Clone)]
pub struct CurrentSession(pub SessionData);

impl FromRequestParts<AppState> for CurrentSession {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        state
            .sessions
            .from_headers(&parts.headers)
            .map(CurrentSession)
            .ok_or(AppError::Unauthorized)
    }
}

/// Optional session extractor, `None` instead of 401.
#[derive(Debug, Clone)]
pub struct MaybeSession(pub Option<SessionData>);

impl FromRequestParts<AppState> for MaybeSession {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        Ok(MaybeSession(state.sessions.from_headers(&parts.headers)))
    }
}

/// A session whose identity account has a verified email.
/// Returns 401 without a session and 403 while unverified.
#[derive(Debug, Clone)]
pub struct VerifiedSession(pub SessionData);

impl FromRequestParts<AppState> for VerifiedSession {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let CurrentSession(session) = CurrentSession::from_request_parts(parts, state).await?;

        let account = state
            .identity
            .account(&session.uid)
            .await?
            .ok_or(AppError::Unauthorized)?;
        if !account.email_verified {
            return Err(AppError::Forbidden(VERIFY_EMAIL.into()));
        }

        Ok(VerifiedSession(session))
    }
}
