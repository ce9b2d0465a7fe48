use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::auth::identity::IdentityClaims;
use crate::auth::SessionData;
use crate::blog::domain::{self, Username};
use crate::blog::repository::{NewUser, RenameOutcome, RepositoryError};
use crate::db::models::User;
use crate::error::{AppError, AppResult};
use crate::extractors::{CurrentSession, MaybeSession, VerifiedSession};
use crate::state::AppState;

const GENERATE_ATTEMPTS: u32 = 5;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/auth/delete", post(delete_account))
        .route("/auth/username", get(session_username))
        .route("/auth/update-username", post(update_username))
        .route("/auth/update-photo-url", post(update_photo_url))
        .route("/auth/update-display-name", post(update_display_name))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub id_token: String,
    pub username: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdTokenRequest {
    pub id_token: String,
}

#[derive(Debug, Deserialize)]
pub struct UsernameRequest {
    pub username: String,
}

#[derive(Debug, Deserialize)]
pub struct PhotoUrlRequest {
    #[serde(rename = "photoURL")]
    pub photo_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayNameRequest {
    pub display_name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UsernameResponse {
    pub username: String,
}

/// Attach a `Set-Cookie` header to a response
pub(crate) fn with_cookie(cookie: String, body: impl IntoResponse) -> Response {
    ([(header::SET_COOKIE, cookie)], body).into_response()
}

pub(crate) fn session_response(
    state: &AppState,
    session: &SessionData,
    body: impl IntoResponse,
) -> AppResult<Response> {
    let cookie = state.sessions.session_cookie(session)?;
    Ok(with_cookie(cookie, body))
}

/// Verify `id_token` and require it to belong to `uid`.
pub(crate) async fn verify_owner(state: &AppState, id_token: &str, uid: &str) -> AppResult<()> {
    if id_token.is_empty() {
        return Err(AppError::BadRequest("No idToken was provided".into()));
    }
    let claims = state.identity.verify_id_token(id_token).await.map_err(|e| {
        tracing::warn!("Rejected ID token for {}: {}", uid, e);
        AppError::Unauthorized
    })?;
    if claims.sub != uid {
        tracing::warn!("ID token subject {} does not match session {}", claims.sub, uid);
        return Err(AppError::Unauthorized);
    }
    Ok(())
}

fn step_failed(step: &str, target: &str, err: impl std::fmt::Display) -> AppError {
    AppError::Internal(format!("{step} failed for {target}: {err}"))
}

async fn register(
    state: &AppState,
    claims: &IdentityClaims,
    requested: Option<&str>,
) -> AppResult<User> {
    let mut new_user = NewUser {
        uid: claims.sub.clone(),
        email: claims.email.clone(),
        display_name: domain::display_name_from_email(&claims.email),
        username: Username::generate(&claims.email, 0),
        photo_url: domain::default_photo_url(&claims.sub),
    };

    if let Some(requested) = requested {
        new_user.username =
            Username::parse(requested).map_err(|e| AppError::BadRequest(e.to_string()))?;
        let user = state.repo.register_user(&new_user).await?;
        tracing::info!("Registered {} as {}", user.uid, user.username);
        return Ok(user);
    }

    let mut suffix = chrono::Utc::now().timestamp_subsec_millis();
    for _ in 0..GENERATE_ATTEMPTS {
        new_user.username = Username::generate(&claims.email, suffix);
        match state.repo.register_user(&new_user).await {
            Ok(user) => {
                tracing::info!("Registered {} as {}", user.uid, user.username);
                return Ok(user);
            }
            Err(RepositoryError::Conflict(msg)) if msg == "Username already taken" => {
                suffix = rand::random::<u32>() % 1000;
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(AppError::Conflict("Username already taken".into()))
}

/// POST /api/auth/login - create the session, registering on first login
async fn login(State(state): State<AppState>, Json(req): Json<LoginRequest>) -> AppResult<Response> {
    if req.id_token.is_empty() {
        return Err(AppError::BadRequest("idToken not provided".into()));
    }
    let claims = state.identity.verify_id_token(&req.id_token).await?;

    let user = match state.repo.user(&claims.sub).await? {
        Some(user) => user,
        None => register(&state, &claims, req.username.as_deref()).await?,
    };

    let session = state
        .sessions
        .mint(&user.uid, Some(user.username.clone()), &user.photo_url);
    tracing::info!("User {} logged in as {}", user.uid, user.username);

    session_response(&state, &session, Json(user))
}

/// POST /api/auth/logout
async fn logout(State(state): State<AppState>) -> Response {
    with_cookie(state.sessions.clear_session_cookie(), "User logged out")
}

/// GET /api/auth/username - `{username}` from the session, or `null`
async fn session_username(MaybeSession(session): MaybeSession) -> Json<Option<UsernameResponse>> {
    Json(
        session
            .and_then(|s| s.username)
            .map(|username| UsernameResponse { username }),
    )
}

/// POST /api/auth/delete - remove the account and everything it owns
async fn delete_account(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Json(req): Json<IdTokenRequest>,
) -> AppResult<Response> {
    let session_username = session.username.clone().ok_or(AppError::Unauthorized)?;
    let uid = session.uid.as_str();
    verify_owner(&state, &req.id_token, uid).await?;

    // the cookie may predate a rename made from another device
    let username = match state.repo.user(uid).await? {
        Some(user) => user.username,
        None => session_username,
    };

    // Each step is independent; a failure stops here without undoing earlier ones
    state
        .repo
        .delete_user_data(uid)
        .await
        .map_err(|e| step_failed("Deleting user data", uid, e))?;
    tracing::info!("Deleted user data for {}", uid);

    state
        .repo
        .release_username(uid, &username)
        .await
        .map_err(|e| step_failed("Releasing username", uid, e))?;
    tracing::info!("Released username {}", username);

    let removed = state
        .storage
        .delete_prefix(&format!("users/{uid}/"))
        .await
        .map_err(|e| step_failed("Deleting media", uid, e))?;
    tracing::info!("Deleted {} media objects for {}", removed, uid);

    state
        .identity
        .delete_account(uid)
        .await
        .map_err(|e| step_failed("Deleting identity account", uid, e))?;
    tracing::info!("Deleted identity account {}", uid);

    Ok(with_cookie(
        state.sessions.clear_session_cookie(),
        "User account deleted",
    ))
}

/// POST /api/auth/update-username - swap the reservation, then patch the session
async fn update_username(
    State(state): State<AppState>,
    VerifiedSession(session): VerifiedSession,
    Json(req): Json<UsernameRequest>,
) -> AppResult<Response> {
    let username = Username::parse(&req.username).map_err(|e| AppError::BadRequest(e.to_string()))?;

    match state.repo.rename_username(&session.uid, &username).await? {
        RenameOutcome::Renamed { old } => {
            tracing::info!("Renamed {} from {} to {}", session.uid, old, username)
        }
        RenameOutcome::Unchanged => {}
    }

    let patched = SessionData {
        username: Some(username.as_str().to_string()),
        ..session
    };
    session_response(
        &state,
        &patched,
        Json(UsernameResponse {
            username: username.into_inner(),
        }),
    )
}

/// POST /api/auth/update-photo-url
async fn update_photo_url(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Json(req): Json<PhotoUrlRequest>,
) -> AppResult<Response> {
    let photo_url = req.photo_url.trim();
    if photo_url.is_empty() {
        return Err(AppError::BadRequest("photoURL not provided".into()));
    }

    state.repo.set_photo_url(&session.uid, photo_url).await?;

    let patched = SessionData {
        photo_url: photo_url.to_string(),
        ..session
    };
    session_response(&state, &patched, "photoURL changed successfully")
}

/// POST /api/auth/update-display-name
async fn update_display_name(
    State(state): State<AppState>,
    VerifiedSession(session): VerifiedSession,
    Json(req): Json<DisplayNameRequest>,
) -> AppResult<StatusCode> {
    let display_name =
        domain::validate_display_name(&req.display_name).map_err(AppError::BadRequest)?;
    state.repo.set_display_name(&session.uid, &display_name).await?;
    Ok(StatusCode::OK)
}
