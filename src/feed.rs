// Cursor-based incremental post feeds
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::db::models::PostSummary;

/// Which posts a feed covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeedScope {
    /// Published posts of every user
    Home,
    /// Published posts of one user
    User(String),
    /// Every post of the session user, drafts included
    Owner(String),
}

/// Anything that can return a page of posts older than a cursor.
#[async_trait]
pub trait PostSource: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Up to `limit` posts with `created_at < before`, newest first.
    async fn fetch_page(
        &self,
        scope: &FeedScope,
        before: Option<i64>,
        limit: usize,
    ) -> Result<Vec<PostSummary>, Self::Error>;
}

#[async_trait]
impl<T: PostSource + ?Sized> PostSource for &T {
    type Error = T::Error;

    async fn fetch_page(
        &self,
        scope: &FeedScope,
        before: Option<i64>,
        limit: usize,
    ) -> Result<Vec<PostSummary>, Self::Error> {
        (**self).fetch_page(scope, before, limit).await
    }
}

/// Growing list of post summaries, ordered by creation time descending.
pub struct FeedLoader<S> {
    source: S,
    scope: FeedScope,
    page_size: usize,
    items: Vec<PostSummary>,
    end: bool,
}

impl<S: PostSource> FeedLoader<S> {
    pub fn new(source: S, scope: FeedScope, page_size: usize) -> Self {
        Self {
            source,
            scope,
            page_size: page_size.max(1),
            items: Vec::new(),
            end: false,
        }
    }

    /// Replace the list with the newest `n` posts.
    pub async fn load_first(&mut self, n: usize) -> Result<usize, S::Error> {
        let n = n.max(1);
        let page = self.source.fetch_page(&self.scope, None, n).await?;
        let loaded = page.len();
        self.end = loaded < n;
        self.items = page;
        tracing::debug!(scope = ?self.scope, loaded, end = self.end, "Loaded first page");
        Ok(loaded)
    }

    /// Append the next page. Returns how many posts were added.
    pub async fn load_more(&mut self) -> Result<usize, S::Error> {
        if self.end {
            return Ok(0);
        }
        if self.items.is_empty() {
            return self.load_first(self.page_size).await;
        }

        let before = self.cursor();
        let page = self
            .source
            .fetch_page(&self.scope, before, self.page_size)
            .await?;
        let loaded = page.len();
        if loaded < self.page_size {
            self.end = true;
        }
        self.items.extend(page);
        tracing::debug!(scope = ?self.scope, loaded, end = self.end, "Loaded more posts");
        Ok(loaded)
    }

    pub fn items(&self) -> &[PostSummary] {
        &self.items
    }

    pub fn is_end(&self) -> bool {
        self.end
    }

    /// `created_at` of the oldest loaded post.
    pub fn cursor(&self) -> Option<i64> {
        self.items.last().map(|post| post.created_at)
    }

    pub fn scope(&self) -> &FeedScope {
        &self.scope
    }

    pub fn into_items(self) -> Vec<PostSummary> {
        self.items
    }
}
