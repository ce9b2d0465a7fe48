use std::collections::HashMap;
use std::sync::Mutex;

use crate::db::models::Post;

/// Posts fetched through the client, keyed by `(username, slug)`.
///
/// Entries are dropped by every mutation that touches them; there is no
/// time-based expiry.
#[derive(Debug, Default)]
pub struct PostCache {
    entries: Mutex<HashMap<(String, String), Post>>,
}

impl PostCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, username: &str, slug: &str) -> Option<Post> {
        let entries = self.entries.lock().ok()?;
        entries
            .get(&(username.to_string(), slug.to_string()))
            .cloned()
    }

    pub fn insert(&self, username: &str, post: Post) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert((username.to_string(), post.slug.clone()), post);
        }
    }

    /// Drop the post owned by `uid` with `slug`, whatever username it was cached under.
    pub fn invalidate_post(&self, uid: &str, slug: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.retain(|_, post| !(post.uid == uid && post.slug == slug));
        }
    }

    /// Drop every cached post with `slug`, for callers that do not know the owner.
    pub fn invalidate_slug(&self, slug: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.retain(|_, post| post.slug != slug);
        }
    }

    /// Drop every post of `uid`.
    pub fn invalidate_owner(&self, uid: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.retain(|_, post| post.uid != uid);
        }
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
