use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::blog::domain::{self, Username, SLUG_TAKEN};
use crate::blog::repository::PostPatch;
use crate::db::models::{HeartState, Post};
use crate::error::{AppError, AppResult};
use crate::extractors::{CurrentSession, VerifiedSession};
use crate::routes::auth::verify_owner;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/posts/delete-post", post(delete_post))
        .route("/posts/update-post-username", post(update_post_username))
        .route("/posts/slug-available", get(slug_available))
        .route("/posts/create", post(create_post))
        .route("/posts/update", post(update_post))
        .route("/posts/update-summary", post(update_summary))
        .route("/posts/heart", post(add_heart).get(heart_state))
        .route("/posts/unheart", post(remove_heart))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletePostRequest {
    pub id_token: String,
    pub slug: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostUsernameRequest {
    pub id_token: String,
    pub new_username: String,
}

#[derive(Debug, Deserialize)]
pub struct TitleQuery {
    pub title: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SlugAvailability {
    pub slug: String,
    pub available: bool,
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreatePostRequest {
    pub title: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePostRequest {
    pub slug: String,
    pub content: Option<String>,
    pub published: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSummaryRequest {
    pub slug: String,
    pub summary: Option<String>,
    pub summary_photo: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartRequest {
    pub author_uid: String,
    pub slug: String,
}

/// POST /api/posts/delete-post - hearts, then media, then the record
async fn delete_post(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Json(req): Json<DeletePostRequest>,
) -> AppResult<&'static str> {
    if req.slug.is_empty() {
        return Err(AppError::BadRequest("No slug was provided".into()));
    }
    let uid = session.uid.as_str();
    verify_owner(&state, &req.id_token, uid).await?;

    if state.repo.post(uid, &req.slug).await?.is_none() {
        return Err(AppError::NotFound);
    }
    let target = format!("{uid}/{}", req.slug);

    let hearts = state
        .repo
        .delete_hearts(uid, &req.slug, state.config.posts.heart_delete_batch)
        .await
        .map_err(|e| AppError::Internal(format!("Deleting hearts of {target}: {e}")))?;
    tracing::info!("Deleted {} hearts of {}", hearts, target);

    let media = state
        .storage
        .delete_prefix(&format!("users/{uid}/posts/{}/", req.slug))
        .await
        .map_err(|e| AppError::Internal(format!("Deleting media of {target}: {e}")))?;
    tracing::info!("Deleted {} media objects of {}", media, target);

    state
        .repo
        .delete_post(uid, &req.slug)
        .await
        .map_err(|e| AppError::Internal(format!("Deleting post {target}: {e}")))?;
    tracing::info!("Deleted post {}", target);

    Ok("Post deleted successfully")
}

/// POST /api/posts/update-post-username - rewrite the author name on every post
async fn update_post_username(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Json(req): Json<PostUsernameRequest>,
) -> AppResult<&'static str> {
    if session.username.is_none() {
        return Err(AppError::Unauthorized);
    }
    verify_owner(&state, &req.id_token, &session.uid).await?;

    let new_username =
        Username::parse(&req.new_username).map_err(|e| AppError::BadRequest(e.to_string()))?;
    let user = state
        .repo
        .user(&session.uid)
        .await?
        .ok_or(AppError::NotFound)?;
    if user.username != new_username.as_str() {
        return Err(AppError::BadRequest(
            "Username does not match your profile".into(),
        ));
    }

    let updated = state
        .repo
        .patch_posts_username(
            &session.uid,
            new_username.as_str(),
            state.config.posts.username_patch_limit,
        )
        .await?;
    tracing::info!("Patched username on {} posts of {}", updated, session.uid);

    Ok("Username changed in the posts")
}

/// GET /api/posts/slug-available?title=
async fn slug_available(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Query(query): Query<TitleQuery>,
) -> AppResult<Json<SlugAvailability>> {
    let slug = domain::slugify(query.title.trim());
    if let Err(error) = domain::validate_slug(&slug) {
        return Ok(Json(SlugAvailability {
            slug,
            available: false,
            error: Some(error),
        }));
    }

    let available = state.repo.slug_available(&session.uid, &slug).await?;
    Ok(Json(SlugAvailability {
        slug,
        available,
        error: (!available).then(|| SLUG_TAKEN.to_string()),
    }))
}

/// POST /api/posts/create
async fn create_post(
    State(state): State<AppState>,
    VerifiedSession(session): VerifiedSession,
    Json(req): Json<CreatePostRequest>,
) -> AppResult<impl IntoResponse> {
    let post = state.repo.create_post(&session.uid, &req.title).await?;
    tracing::info!("Created post {}/{}", post.uid, post.slug);
    Ok((StatusCode::CREATED, Json(post)))
}

/// POST /api/posts/update - content and/or published flag
async fn update_post(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Json(req): Json<UpdatePostRequest>,
) -> AppResult<Json<Post>> {
    if let Some(ref content) = req.content {
        domain::validate_content(content).map_err(AppError::BadRequest)?;
    }
    let patch = PostPatch {
        content: req.content,
        published: req.published,
        ..Default::default()
    };
    if patch.is_empty() {
        return Err(AppError::BadRequest("Nothing to update".into()));
    }

    let post = state.repo.update_post(&session.uid, &req.slug, &patch).await?;
    Ok(Json(post))
}

/// POST /api/posts/update-summary
async fn update_summary(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Json(req): Json<UpdateSummaryRequest>,
) -> AppResult<Json<Post>> {
    if let Some(ref summary) = req.summary {
        domain::validate_summary(summary).map_err(AppError::BadRequest)?;
    }
    let patch = PostPatch {
        summary: req.summary,
        summary_photo: req.summary_photo,
        ..Default::default()
    };
    if patch.is_empty() {
        return Err(AppError::BadRequest("Nothing to update".into()));
    }

    let post = state.repo.update_post(&session.uid, &req.slug, &patch).await?;
    Ok(Json(post))
}

/// POST /api/posts/heart
async fn add_heart(
    State(state): State<AppState>,
    VerifiedSession(session): VerifiedSession,
    Json(req): Json<HeartRequest>,
) -> AppResult<Json<HeartState>> {
    let heart = state
        .repo
        .add_heart(&req.author_uid, &req.slug, &session.uid)
        .await?;
    Ok(Json(heart))
}

/// POST /api/posts/unheart
async fn remove_heart(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Json(req): Json<HeartRequest>,
) -> AppResult<Json<HeartState>> {
    let heart = state
        .repo
        .remove_heart(&req.author_uid, &req.slug, &session.uid)
        .await?;
    Ok(Json(heart))
}

/// GET /api/posts/heart?authorUid=&slug=
async fn heart_state(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Query(req): Query<HeartRequest>,
) -> AppResult<Json<HeartState>> {
    let heart = state
        .repo
        .heart_state(&req.author_uid, &req.slug, &session.uid)
        .await?;
    Ok(Json(heart))
}
