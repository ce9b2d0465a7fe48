use axum::extract::multipart::{Field, MultipartError};
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use futures::{StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};

use crate::auth::SessionData;
use crate::blog::repository::PostPatch;
use crate::error::{AppError, AppResult};
use crate::extractors::CurrentSession;
use crate::routes::auth::session_response;
use crate::state::AppState;
use crate::storage::{StorageError, UploadProgress};

pub fn router(max_bytes: usize) -> Router<AppState> {
    Router::new()
        .route("/media", post(upload))
        .layer(DefaultBodyLimit::max(max_bytes))
}

/// Where an uploaded image belongs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    /// Inline image in a post body
    Content,
    /// A post's summary photo
    Summary,
    /// The user's profile picture
    Avatar,
}

impl MediaKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "content" => Some(Self::Content),
            "summary" => Some(Self::Summary),
            "avatar" => Some(Self::Avatar),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Content => "content",
            Self::Summary => "summary",
            Self::Avatar => "avatar",
        }
    }

    /// Object path for an upload of this kind
    pub fn object_path(&self, uid: &str, slug: Option<&str>, ext: &str) -> Option<String> {
        match (self, slug) {
            (Self::Content, Some(slug)) => Some(format!(
                "users/{uid}/posts/{slug}/{}.{ext}",
                chrono::Utc::now().timestamp_millis()
            )),
            (Self::Summary, Some(slug)) => {
                Some(format!("users/{uid}/posts/{slug}/summary/summary.{ext}"))
            }
            (Self::Avatar, _) => Some(format!("users/{uid}/profile/avatar.{ext}")),
            _ => None,
        }
    }

    /// Prefix holding the single object an upload of this kind replaces
    pub fn replaced_prefix(&self, uid: &str, slug: Option<&str>) -> Option<String> {
        match (self, slug) {
            (Self::Summary, Some(slug)) => Some(format!("users/{uid}/posts/{slug}/summary/")),
            (Self::Avatar, _) => Some(format!("users/{uid}/profile/")),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub path: String,
    pub url: String,
    pub bytes: u64,
}

fn bad_multipart(err: MultipartError) -> AppError {
    AppError::BadRequest(format!("Invalid upload: {err}"))
}

/// Image content type and file extension of an upload field
fn image_type(field: &Field<'_>) -> AppResult<(String, String)> {
    let file_ext = field
        .file_name()
        .and_then(|name| std::path::Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()));

    let content_type = match field.content_type() {
        Some(ct) => ct.to_string(),
        None => field
            .file_name()
            .and_then(|name| mime_guess::from_path(name).first())
            .map(|mime| mime.essence_str().to_string())
            .unwrap_or_default(),
    };
    if !content_type.starts_with("image/") {
        return Err(AppError::BadRequest("Only images can be uploaded".into()));
    }

    let ext = file_ext
        .or_else(|| {
            mime_guess::get_mime_extensions_str(&content_type)
                .and_then(|exts| exts.first())
                .map(|ext| ext.to_string())
        })
        .unwrap_or_else(|| "img".to_string());

    Ok((content_type, ext))
}

/// POST /api/media - multipart `kind`, optional `slug`, then `file`
async fn upload(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    mut multipart: Multipart,
) -> AppResult<Response> {
    let mut kind = None;
    let mut slug = None;

    while let Some(field) = multipart.next_field().await.map_err(bad_multipart)? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("kind") => {
                let value = field.text().await.map_err(bad_multipart)?;
                kind = Some(
                    MediaKind::parse(&value)
                        .ok_or_else(|| AppError::BadRequest(format!("Unknown media kind: {value}")))?,
                );
            }
            Some("slug") => {
                let value = field.text().await.map_err(bad_multipart)?;
                slug = Some(value.trim().to_string()).filter(|s| !s.is_empty());
            }
            Some("file") => {
                let kind = kind.ok_or_else(|| AppError::BadRequest("No media kind was provided".into()))?;
                let (content_type, ext) = image_type(&field)?;

                if kind != MediaKind::Avatar {
                    let slug = slug
                        .as_deref()
                        .ok_or_else(|| AppError::BadRequest("No slug was provided".into()))?;
                    if state.repo.post(&session.uid, slug).await?.is_none() {
                        return Err(AppError::NotFound);
                    }
                }
                let path = kind
                    .object_path(&session.uid, slug.as_deref(), &ext)
                    .ok_or_else(|| AppError::BadRequest("No slug was provided".into()))?;

                // one summary photo per post, one avatar per user
                if let Some(prefix) = kind.replaced_prefix(&session.uid, slug.as_deref()) {
                    let removed = state.storage.delete_prefix(&prefix).await?;
                    tracing::debug!("Replaced {} objects under {}", removed, prefix);
                }

                let body = field
                    .map_err(|e| StorageError::Upload(e.to_string()))
                    .boxed();
                let report = |p: UploadProgress| {
                    tracing::debug!("Upload {}: {} bytes", path, p.bytes_transferred);
                };
                let bytes = state.storage.put(&path, body, 0, &report).await?;
                let url = state.storage.url_for(&path);
                tracing::info!(
                    "Stored {} upload {} ({}, {} bytes)",
                    kind.as_str(),
                    path,
                    content_type,
                    bytes
                );

                let response = UploadResponse {
                    path: path.clone(),
                    url: url.clone(),
                    bytes,
                };

                return match kind {
                    MediaKind::Content => Ok(Json(response).into_response()),
                    MediaKind::Summary => {
                        let patch = PostPatch {
                            summary_photo: Some(url),
                            ..Default::default()
                        };
                        let slug = slug.as_deref().unwrap_or_default();
                        state.repo.update_post(&session.uid, slug, &patch).await?;
                        Ok(Json(response).into_response())
                    }
                    MediaKind::Avatar => {
                        state.repo.set_photo_url(&session.uid, &url).await?;
                        let patched = SessionData {
                            photo_url: url,
                            ..session
                        };
                        session_response(&state, &patched, Json(response))
                    }
                };
            }
            _ => {}
        }
    }

    Err(AppError::BadRequest("No file was provided".into()))
}

/// GET /media/{*path} - serve a stored object
pub async fn serve(State(state): State<AppState>, Path(path): Path<String>) -> AppResult<Response> {
    let data = match state.storage.get(&path).await {
        Ok(Some(data)) => data,
        Ok(None) | Err(StorageError::InvalidPath(_)) => return Err(AppError::NotFound),
        Err(e) => return Err(e.into()),
    };

    let mime = mime_guess::from_path(&path).first_or_octet_stream();
    Ok((
        [
            (header::CONTENT_TYPE, mime.as_ref().to_string()),
            (header::CACHE_CONTROL, "public, max-age=3600".to_string()),
        ],
        data,
    )
        .into_response())
}
