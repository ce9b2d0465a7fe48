use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::blog::domain::Username;
use crate::db::models::{Post, PublicProfile};
use crate::error::{AppError, AppResult};
use crate::extractors::MaybeSession;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/users/username-available", get(username_available))
        .route("/users/{username}", get(profile))
        .route("/users/{username}/posts/{slug}", get(user_post))
}

#[derive(Debug, Deserialize)]
pub struct UsernameQuery {
    pub username: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UsernameAvailability {
    pub username: String,
    pub available: bool,
    pub error: Option<String>,
}

/// GET /api/users/username-available?username=
async fn username_available(
    State(state): State<AppState>,
    Query(query): Query<UsernameQuery>,
) -> AppResult<Json<UsernameAvailability>> {
    let username = match Username::parse(&query.username) {
        Ok(username) => username,
        Err(e) => {
            return Ok(Json(UsernameAvailability {
                username: query.username.trim().to_lowercase(),
                available: false,
                error: Some(e.to_string()),
            }))
        }
    };

    let available = state.repo.resolve_username(username.as_str()).await?.is_none();
    Ok(Json(UsernameAvailability {
        username: username.into_inner(),
        available,
        error: (!available).then(|| "Username already taken".to_string()),
    }))
}

/// GET /api/users/{username}
async fn profile(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> AppResult<Json<PublicProfile>> {
    let user = state
        .repo
        .user_by_username(&username.to_lowercase())
        .await?
        .ok_or(AppError::NotFound)?;
    Ok(Json(user.into()))
}

/// GET /api/users/{username}/posts/{slug} - drafts only for their owner
async fn user_post(
    State(state): State<AppState>,
    MaybeSession(session): MaybeSession,
    Path((username, slug)): Path<(String, String)>,
) -> AppResult<Json<Post>> {
    let uid = state
        .repo
        .resolve_username(&username.to_lowercase())
        .await?
        .ok_or(AppError::NotFound)?;
    let post = state.repo.post(&uid, &slug).await?.ok_or(AppError::NotFound)?;

    let is_owner = session.is_some_and(|s| s.uid == uid);
    if !post.published && !is_owner {
        return Err(AppError::NotFound);
    }
    Ok(Json(post))
}
