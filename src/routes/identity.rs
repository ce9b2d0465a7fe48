use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::auth::LocalIdentity;
use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// Account endpoints of the built-in identity provider
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/identity/signup", post(signup))
        .route("/identity/signin", post(signin))
        .route("/identity/verify-email", post(verify_email))
}

#[derive(Debug, Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub uid: String,
    pub id_token: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyEmailRequest {
    pub uid: String,
    pub code: String,
}

fn provider(state: &AppState) -> AppResult<&LocalIdentity> {
    state.local_identity.as_deref().ok_or(AppError::NotFound)
}

async fn signup(
    State(state): State<AppState>,
    Json(req): Json<Credentials>,
) -> AppResult<(StatusCode, Json<TokenResponse>)> {
    let signup = provider(&state)?.signup(&req.email, &req.password).await?;
    Ok((
        StatusCode::CREATED,
        Json(TokenResponse {
            uid: signup.uid,
            id_token: signup.id_token,
        }),
    ))
}

async fn signin(
    State(state): State<AppState>,
    Json(req): Json<Credentials>,
) -> AppResult<Json<TokenResponse>> {
    let (account, id_token) = provider(&state)?.signin(&req.email, &req.password).await?;
    Ok(Json(TokenResponse {
        uid: account.uid,
        id_token,
    }))
}

async fn verify_email(
    State(state): State<AppState>,
    Json(req): Json<VerifyEmailRequest>,
) -> AppResult<StatusCode> {
    provider(&state)?.verify_email(&req.uid, &req.code).await?;
    Ok(StatusCode::OK)
}
