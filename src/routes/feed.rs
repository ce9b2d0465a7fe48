use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;

use crate::db::models::PostSummary;
use crate::error::{AppError, AppResult};
use crate::extractors::CurrentSession;
use crate::feed::FeedScope;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/feed", get(home_feed))
        .route("/users/{username}/posts", get(user_feed))
        .route("/admin/posts", get(admin_feed))
}

/// `?before=&limit=` cursor parameters
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub before: Option<i64>,
    pub limit: Option<usize>,
    /// Restrict the home feed to one author
    pub uid: Option<String>,
}

impl PageQuery {
    fn limit(&self, default: usize, max: usize) -> usize {
        self.limit.unwrap_or(default).clamp(1, max.max(1))
    }
}

async fn page(
    state: &AppState,
    scope: FeedScope,
    query: &PageQuery,
    default_limit: usize,
) -> AppResult<Json<Vec<PostSummary>>> {
    let limit = query.limit(default_limit, state.config.feed.max_page_size);
    let posts = state.repo.list_posts(&scope, query.before, limit).await?;
    Ok(Json(posts))
}

/// GET /api/feed - published posts of every user, or of `?uid=`
async fn home_feed(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> AppResult<Json<Vec<PostSummary>>> {
    let (scope, default) = match query.uid.clone() {
        Some(uid) => (FeedScope::User(uid), state.config.feed.initial_page_size),
        None => (FeedScope::Home, state.config.feed.home_page_size),
    };
    page(&state, scope, &query, default).await
}

/// GET /api/users/{username}/posts - published posts of one user
async fn user_feed(
    State(state): State<AppState>,
    Path(username): Path<String>,
    Query(query): Query<PageQuery>,
) -> AppResult<Json<Vec<PostSummary>>> {
    let uid = state
        .repo
        .resolve_username(&username.to_lowercase())
        .await?
        .ok_or(AppError::NotFound)?;
    let default = state.config.feed.initial_page_size;
    page(&state, FeedScope::User(uid), &query, default).await
}

/// GET /api/admin/posts - every post of the session user, drafts included
async fn admin_feed(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Query(query): Query<PageQuery>,
) -> AppResult<Json<Vec<PostSummary>>> {
    let default = state.config.feed.initial_page_size;
    page(&state, FeedScope::Owner(session.uid), &query, default).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_defaults_and_clamps() {
        let query = PageQuery::default();
        assert_eq!(query.limit(6, 50), 6);

        let query = PageQuery {
            limit: Some(500),
            ..Default::default()
        };
        assert_eq!(query.limit(6, 50), 50);

        let query = PageQuery {
            limit: Some(0),
            ..Default::default()
        };
        assert_eq!(query.limit(6, 50), 1);
    }
}
