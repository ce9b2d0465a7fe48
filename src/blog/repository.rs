// Repository pattern - isolates all database side effects
use async_trait::async_trait;
use rusqlite::{params, OptionalExtension, Row, TransactionBehavior};
use thiserror::Error;

use crate::blog::domain::{self, Username, DEFAULT_CONTENT, DEFAULT_SUMMARY, SLUG_TAKEN};
use crate::db::models::{HeartState, Post, PostSummary, User};
use crate::feed::{FeedScope, PostSource};
use crate::state::DbPool;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    Database(#[from] r2d2::Error),

    #[error("SQL error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Too many records: {0}")]
    TooMany(String),

    #[error("Invalid: {0}")]
    Invalid(String),
}

pub type RepoResult<T> = Result<T, RepositoryError>;

/// Fields of a user record created on first login.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub uid: String,
    pub email: String,
    pub display_name: String,
    pub username: Username,
    pub photo_url: String,
}

/// Partial post update; `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct PostPatch {
    pub content: Option<String>,
    pub published: Option<bool>,
    pub summary: Option<String>,
    pub summary_photo: Option<String>,
}

impl PostPatch {
    pub fn is_empty(&self) -> bool {
        self.content.is_none()
            && self.published.is_none()
            && self.summary.is_none()
            && self.summary_photo.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenameOutcome {
    Renamed { old: String },
    Unchanged,
}

/// Repository trait - all document store operations
#[async_trait]
pub trait BlogRepository: Send + Sync {
    async fn user(&self, uid: &str) -> RepoResult<Option<User>>;

    async fn user_by_username(&self, username: &str) -> RepoResult<Option<User>>;

    /// Uid holding the reservation for `username`
    async fn resolve_username(&self, username: &str) -> RepoResult<Option<String>>;

    /// Create the user record and its username reservation together
    async fn register_user(&self, user: &NewUser) -> RepoResult<User>;

    /// Swap the reservation and the record's username in one transaction
    async fn rename_username(&self, uid: &str, username: &Username) -> RepoResult<RenameOutcome>;

    async fn release_username(&self, uid: &str, username: &str) -> RepoResult<bool>;

    async fn set_display_name(&self, uid: &str, display_name: &str) -> RepoResult<()>;

    async fn set_photo_url(&self, uid: &str, photo_url: &str) -> RepoResult<()>;

    async fn slug_available(&self, uid: &str, slug: &str) -> RepoResult<bool>;

    /// Insert a draft post and bump the owner's post count
    async fn create_post(&self, uid: &str, title: &str) -> RepoResult<Post>;

    async fn post(&self, uid: &str, slug: &str) -> RepoResult<Option<Post>>;

    async fn update_post(&self, uid: &str, slug: &str, patch: &PostPatch) -> RepoResult<Post>;

    async fn list_posts(
        &self,
        scope: &FeedScope,
        before: Option<i64>,
        limit: usize,
    ) -> RepoResult<Vec<PostSummary>>;

    async fn add_heart(&self, owner: &str, slug: &str, user: &str) -> RepoResult<HeartState>;

    async fn remove_heart(&self, owner: &str, slug: &str, user: &str) -> RepoResult<HeartState>;

    async fn heart_state(&self, owner: &str, slug: &str, user: &str) -> RepoResult<HeartState>;

    /// Delete every heart marker of a post, `batch` rows at a time
    async fn delete_hearts(&self, owner: &str, slug: &str, batch: usize) -> RepoResult<usize>;

    /// Remove the post record and decrement the owner's post count
    async fn delete_post(&self, owner: &str, slug: &str) -> RepoResult<bool>;

    /// Rewrite the denormalized username on all of a user's posts
    async fn patch_posts_username(
        &self,
        uid: &str,
        username: &str,
        limit: usize,
    ) -> RepoResult<usize>;

    /// Remove the user record with its posts and their heart markers
    async fn delete_user_data(&self, uid: &str) -> RepoResult<bool>;
}

/// SQLite implementation
#[derive(Clone)]
pub struct SqliteBlogRepository {
    pool: DbPool,
}

impl SqliteBlogRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

const USER_COLUMNS: &str = "uid, email, display_name, username, photo_url, post_count";

const POST_COLUMNS: &str = "uid, username, slug, title, content, summary, summary_photo, \
                            published, hearts, created_at, updated_at";

const SUMMARY_COLUMNS: &str = "uid, username, slug, title, summary, summary_photo, \
                               published, hearts, created_at, updated_at";

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        uid: row.get(0)?,
        email: row.get(1)?,
        display_name: row.get(2)?,
        username: row.get(3)?,
        photo_url: row.get(4)?,
        post_count: row.get(5)?,
    })
}

fn post_from_row(row: &Row<'_>) -> rusqlite::Result<Post> {
    Ok(Post {
        uid: row.get(0)?,
        username: row.get(1)?,
        slug: row.get(2)?,
        title: row.get(3)?,
        content: row.get(4)?,
        summary: row.get(5)?,
        summary_photo: row.get(6)?,
        published: row.get(7)?,
        hearts: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

fn summary_from_row(row: &Row<'_>) -> rusqlite::Result<PostSummary> {
    Ok(PostSummary {
        uid: row.get(0)?,
        username: row.get(1)?,
        slug: row.get(2)?,
        title: row.get(3)?,
        summary: row.get(4)?,
        summary_photo: row.get(5)?,
        published: row.get(6)?,
        hearts: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn load_post(conn: &rusqlite::Connection, uid: &str, slug: &str) -> rusqlite::Result<Option<Post>> {
    conn.query_row(
        &format!("SELECT {POST_COLUMNS} FROM posts WHERE uid = ?1 AND slug = ?2"),
        params![uid, slug],
        post_from_row,
    )
    .optional()
}

/// Heart count of a post `viewer` can see; drafts are visible to their owner only.
fn heart_count(
    conn: &rusqlite::Connection,
    owner: &str,
    slug: &str,
    viewer: &str,
) -> RepoResult<i64> {
    conn.query_row(
        "SELECT hearts FROM posts WHERE uid = ?1 AND slug = ?2 AND (published = 1 OR uid = ?3)",
        params![owner, slug, viewer],
        |row| row.get(0),
    )
    .optional()?
    .ok_or_else(|| RepositoryError::NotFound(format!("post {owner}/{slug}")))
}

#[async_trait]
impl BlogRepository for SqliteBlogRepository {
    async fn user(&self, uid: &str) -> RepoResult<Option<User>> {
        let conn = self.pool.get()?;
        let user = conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE uid = ?1"),
                params![uid],
                user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    async fn user_by_username(&self, username: &str) -> RepoResult<Option<User>> {
        let conn = self.pool.get()?;
        let user = conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?1 LIMIT 1"),
                params![username],
                user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    async fn resolve_username(&self, username: &str) -> RepoResult<Option<String>> {
        let conn = self.pool.get()?;
        let uid = conn
            .query_row(
                "SELECT uid FROM usernames WHERE username = ?1",
                params![username],
                |row| row.get(0),
            )
            .optional()?;
        Ok(uid)
    }

    async fn register_user(&self, user: &NewUser) -> RepoResult<User> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let exists: bool = tx.query_row(
            "SELECT COUNT(*) > 0 FROM users WHERE uid = ?1",
            params![user.uid],
            |row| row.get(0),
        )?;
        if exists {
            return Err(RepositoryError::Conflict("User already registered".into()));
        }

        let taken: bool = tx.query_row(
            "SELECT COUNT(*) > 0 FROM usernames WHERE username = ?1",
            params![user.username.as_str()],
            |row| row.get(0),
        )?;
        if taken {
            return Err(RepositoryError::Conflict("Username already taken".into()));
        }

        tx.execute(
            "INSERT INTO usernames (username, uid) VALUES (?1, ?2)",
            params![user.username.as_str(), user.uid],
        )?;
        tx.execute(
            "INSERT INTO users (uid, email, display_name, username, photo_url, post_count)
             VALUES (?1, ?2, ?3, ?4, ?5, 0)",
            params![
                user.uid,
                user.email,
                user.display_name,
                user.username.as_str(),
                user.photo_url
            ],
        )?;
        tx.commit()?;

        Ok(User {
            uid: user.uid.clone(),
            email: user.email.clone(),
            display_name: user.display_name.clone(),
            username: user.username.as_str().to_string(),
            photo_url: user.photo_url.clone(),
            post_count: 0,
        })
    }

    async fn rename_username(&self, uid: &str, username: &Username) -> RepoResult<RenameOutcome> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let old: String = tx
            .query_row(
                "SELECT username FROM users WHERE uid = ?1",
                params![uid],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| RepositoryError::NotFound(format!("user {uid}")))?;

        let holder: Option<String> = tx
            .query_row(
                "SELECT uid FROM usernames WHERE username = ?1",
                params![username.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        match holder.as_deref() {
            Some(owner) if owner != uid => {
                return Err(RepositoryError::Conflict("Username already taken".into()));
            }
            Some(_) if old == username.as_str() => return Ok(RenameOutcome::Unchanged),
            Some(_) => {}
            None => {
                tx.execute(
                    "INSERT INTO usernames (username, uid) VALUES (?1, ?2)",
                    params![username.as_str(), uid],
                )?;
            }
        }

        if old != username.as_str() {
            tx.execute(
                "DELETE FROM usernames WHERE username = ?1 AND uid = ?2",
                params![old, uid],
            )?;
        }
        tx.execute(
            "UPDATE users SET username = ?1 WHERE uid = ?2",
            params![username.as_str(), uid],
        )?;
        tx.commit()?;

        if old == username.as_str() {
            Ok(RenameOutcome::Unchanged)
        } else {
            Ok(RenameOutcome::Renamed { old })
        }
    }

    async fn release_username(&self, uid: &str, username: &str) -> RepoResult<bool> {
        let conn = self.pool.get()?;
        let rows = conn.execute(
            "DELETE FROM usernames WHERE username = ?1 AND uid = ?2",
            params![username, uid],
        )?;
        Ok(rows > 0)
    }

    async fn set_display_name(&self, uid: &str, display_name: &str) -> RepoResult<()> {
        let conn = self.pool.get()?;
        let rows = conn.execute(
            "UPDATE users SET display_name = ?1 WHERE uid = ?2",
            params![display_name, uid],
        )?;
        if rows == 0 {
            return Err(RepositoryError::NotFound(format!("user {uid}")));
        }
        Ok(())
    }

    async fn set_photo_url(&self, uid: &str, photo_url: &str) -> RepoResult<()> {
        let conn = self.pool.get()?;
        let rows = conn.execute(
            "UPDATE users SET photo_url = ?1 WHERE uid = ?2",
            params![photo_url, uid],
        )?;
        if rows == 0 {
            return Err(RepositoryError::NotFound(format!("user {uid}")));
        }
        Ok(())
    }

    async fn slug_available(&self, uid: &str, slug: &str) -> RepoResult<bool> {
        let conn = self.pool.get()?;
        let taken: bool = conn.query_row(
            "SELECT COUNT(*) > 0 FROM posts WHERE uid = ?1 AND slug = ?2",
            params![uid, slug],
            |row| row.get(0),
        )?;
        Ok(!taken)
    }

    async fn create_post(&self, uid: &str, title: &str) -> RepoResult<Post> {
        let title = title.trim();
        let slug = domain::slugify(title);
        domain::validate_slug(&slug).map_err(RepositoryError::Invalid)?;

        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let username: String = tx
            .query_row(
                "SELECT username FROM users WHERE uid = ?1",
                params![uid],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| RepositoryError::NotFound(format!("user {uid}")))?;

        if load_post(&tx, uid, &slug)?.is_some() {
            return Err(RepositoryError::Conflict(SLUG_TAKEN.into()));
        }

        // Creation times are kept strictly increasing so cursors never tie
        let latest: Option<i64> =
            tx.query_row("SELECT MAX(created_at) FROM posts", [], |row| row.get(0))?;
        let now = match latest {
            Some(latest) if latest >= now_millis() => latest + 1,
            _ => now_millis(),
        };

        tx.execute(
            "INSERT INTO posts (uid, slug, username, title, content, summary, summary_photo,
                                published, hearts, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, '', 0, 0, ?7, ?7)",
            params![uid, slug, username, title, DEFAULT_CONTENT, DEFAULT_SUMMARY, now],
        )?;
        tx.execute(
            "UPDATE users SET post_count = post_count + 1 WHERE uid = ?1",
            params![uid],
        )?;
        tx.commit()?;

        Ok(Post {
            uid: uid.to_string(),
            username,
            slug,
            title: title.to_string(),
            content: DEFAULT_CONTENT.to_string(),
            summary: DEFAULT_SUMMARY.to_string(),
            summary_photo: String::new(),
            published: false,
            hearts: 0,
            created_at: now,
            updated_at: now,
        })
    }

    async fn post(&self, uid: &str, slug: &str) -> RepoResult<Option<Post>> {
        let conn = self.pool.get()?;
        Ok(load_post(&conn, uid, slug)?)
    }

    async fn update_post(&self, uid: &str, slug: &str, patch: &PostPatch) -> RepoResult<Post> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut post = load_post(&tx, uid, slug)?
            .ok_or_else(|| RepositoryError::NotFound(format!("post {uid}/{slug}")))?;

        if let Some(ref content) = patch.content {
            post.content = content.clone();
        }
        if let Some(published) = patch.published {
            post.published = published;
        }
        if let Some(ref summary) = patch.summary {
            post.summary = summary.clone();
        }
        if let Some(ref photo) = patch.summary_photo {
            post.summary_photo = photo.clone();
        }
        post.updated_at = now_millis().max(post.updated_at);

        tx.execute(
            "UPDATE posts SET content = ?1, published = ?2, summary = ?3, summary_photo = ?4,
                              updated_at = ?5
             WHERE uid = ?6 AND slug = ?7",
            params![
                post.content,
                post.published,
                post.summary,
                post.summary_photo,
                post.updated_at,
                uid,
                slug
            ],
        )?;
        tx.commit()?;

        Ok(post)
    }

    async fn list_posts(
        &self,
        scope: &FeedScope,
        before: Option<i64>,
        limit: usize,
    ) -> RepoResult<Vec<PostSummary>> {
        let (filter, uid) = match scope {
            FeedScope::Home => ("published = 1", None),
            FeedScope::User(uid) => ("uid = ?3 AND published = 1", Some(uid.as_str())),
            FeedScope::Owner(uid) => ("uid = ?3", Some(uid.as_str())),
        };
        let sql = format!(
            "SELECT {SUMMARY_COLUMNS} FROM posts
             WHERE {filter} AND (?1 IS NULL OR created_at < ?1)
             ORDER BY created_at DESC
             LIMIT ?2"
        );

        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&sql)?;
        let limit = limit as i64;
        let posts = match uid {
            Some(uid) => stmt
                .query_map(params![before, limit, uid], summary_from_row)?
                .collect::<Result<Vec<_>, _>>()?,
            None => stmt
                .query_map(params![before, limit], summary_from_row)?
                .collect::<Result<Vec<_>, _>>()?,
        };
        Ok(posts)
    }

    async fn add_heart(&self, owner: &str, slug: &str, user: &str) -> RepoResult<HeartState> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        heart_count(&tx, owner, slug, user)?;
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO hearts (owner_uid, slug, user_uid, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![owner, slug, user, now_millis()],
        )?;
        if inserted == 1 {
            tx.execute(
                "UPDATE posts SET hearts = hearts + 1 WHERE uid = ?1 AND slug = ?2",
                params![owner, slug],
            )?;
        }
        let hearts = heart_count(&tx, owner, slug, user)?;
        tx.commit()?;

        Ok(HeartState {
            hearted: true,
            hearts,
        })
    }

    async fn remove_heart(&self, owner: &str, slug: &str, user: &str) -> RepoResult<HeartState> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        heart_count(&tx, owner, slug, user)?;
        let deleted = tx.execute(
            "DELETE FROM hearts WHERE owner_uid = ?1 AND slug = ?2 AND user_uid = ?3",
            params![owner, slug, user],
        )?;
        if deleted == 1 {
            tx.execute(
                "UPDATE posts SET hearts = hearts - 1 WHERE uid = ?1 AND slug = ?2",
                params![owner, slug],
            )?;
        }
        let hearts = heart_count(&tx, owner, slug, user)?;
        tx.commit()?;

        Ok(HeartState {
            hearted: false,
            hearts,
        })
    }

    async fn heart_state(&self, owner: &str, slug: &str, user: &str) -> RepoResult<HeartState> {
        let conn = self.pool.get()?;
        let hearts = heart_count(&conn, owner, slug, user)?;
        let hearted: bool = conn.query_row(
            "SELECT COUNT(*) > 0 FROM hearts WHERE owner_uid = ?1 AND slug = ?2 AND user_uid = ?3",
            params![owner, slug, user],
            |row| row.get(0),
        )?;
        Ok(HeartState { hearted, hearts })
    }

    async fn delete_hearts(&self, owner: &str, slug: &str, batch: usize) -> RepoResult<usize> {
        let conn = self.pool.get()?;
        let batch = batch.max(1) as i64;
        let mut total = 0;

        loop {
            let deleted = conn.execute(
                "DELETE FROM hearts WHERE rowid IN (
                    SELECT rowid FROM hearts WHERE owner_uid = ?1 AND slug = ?2 LIMIT ?3
                 )",
                params![owner, slug, batch],
            )?;
            if deleted == 0 {
                break;
            }
            total += deleted;
        }

        Ok(total)
    }

    async fn delete_post(&self, owner: &str, slug: &str) -> RepoResult<bool> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let deleted = tx.execute(
            "DELETE FROM posts WHERE uid = ?1 AND slug = ?2",
            params![owner, slug],
        )?;
        if deleted == 1 {
            tx.execute(
                "UPDATE users SET post_count = MAX(post_count - 1, 0) WHERE uid = ?1",
                params![owner],
            )?;
        }
        tx.commit()?;

        Ok(deleted == 1)
    }

    async fn patch_posts_username(
        &self,
        uid: &str,
        username: &str,
        limit: usize,
    ) -> RepoResult<usize> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let count: i64 = tx.query_row(
            "SELECT COUNT(*) FROM posts WHERE uid = ?1",
            params![uid],
            |row| row.get(0),
        )?;
        if count as usize > limit {
            return Err(RepositoryError::TooMany("Cannot update the username".into()));
        }

        let updated = tx.execute(
            "UPDATE posts SET username = ?1 WHERE uid = ?2",
            params![username, uid],
        )?;
        tx.commit()?;

        Ok(updated)
    }

    async fn delete_user_data(&self, uid: &str) -> RepoResult<bool> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        tx.execute("DELETE FROM hearts WHERE owner_uid = ?1", params![uid])?;
        tx.execute("DELETE FROM posts WHERE uid = ?1", params![uid])?;
        let deleted = tx.execute("DELETE FROM users WHERE uid = ?1", params![uid])?;
        tx.commit()?;

        Ok(deleted == 1)
    }
}

#[async_trait]
impl PostSource for SqliteBlogRepository {
    type Error = RepositoryError;

    async fn fetch_page(
        &self,
        scope: &FeedScope,
        before: Option<i64>,
        limit: usize,
    ) -> Result<Vec<PostSummary>, Self::Error> {
        self.list_posts(scope, before, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn repo() -> SqliteBlogRepository {
        let pool = db::memory_pool().unwrap();
        db::run_migrations(&pool).unwrap();
        SqliteBlogRepository::new(pool)
    }

    fn new_user(uid: &str, username: &str) -> NewUser {
        NewUser {
            uid: uid.to_string(),
            email: format!("{username}@example.com"),
            display_name: username.to_string(),
            username: Username::parse(username).unwrap(),
            photo_url: domain::default_photo_url(uid),
        }
    }

    async fn repo_with_user(uid: &str, username: &str) -> SqliteBlogRepository {
        let repo = repo();
        repo.register_user(&new_user(uid, username)).await.unwrap();
        repo
    }

    async fn published_post(repo: &SqliteBlogRepository, uid: &str, title: &str) -> Post {
        let post = repo.create_post(uid, title).await.unwrap();
        let patch = PostPatch {
            published: Some(true),
            ..Default::default()
        };
        repo.update_post(uid, &post.slug, &patch).await.unwrap()
    }

    #[tokio::test]
    async fn register_creates_record_and_reservation() {
        let repo = repo_with_user("u1", "alice").await;

        let user = repo.user("u1").await.unwrap().unwrap();
        assert_eq!(user.username, "alice");
        assert_eq!(user.post_count, 0);
        assert_eq!(
            repo.resolve_username("alice").await.unwrap().as_deref(),
            Some("u1")
        );
    }

    #[tokio::test]
    async fn register_rejects_taken_username() {
        let repo = repo_with_user("u1", "alice").await;
        let err = repo.register_user(&new_user("u2", "alice")).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
        assert!(repo.user("u2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rename_moves_reservation() {
        let repo = repo_with_user("u1", "alice").await;
        let bob = Username::parse("bob").unwrap();

        let outcome = repo.rename_username("u1", &bob).await.unwrap();
        assert_eq!(
            outcome,
            RenameOutcome::Renamed {
                old: "alice".into()
            }
        );
        assert!(repo.resolve_username("alice").await.unwrap().is_none());
        assert_eq!(
            repo.resolve_username("bob").await.unwrap().as_deref(),
            Some("u1")
        );
        assert_eq!(repo.user("u1").await.unwrap().unwrap().username, "bob");

        // the old name is free again
        repo.register_user(&new_user("u2", "alice")).await.unwrap();
    }

    #[tokio::test]
    async fn rename_is_idempotent() {
        let repo = repo_with_user("u1", "alice").await;
        let bob = Username::parse("bob").unwrap();
        repo.rename_username("u1", &bob).await.unwrap();
        assert_eq!(
            repo.rename_username("u1", &bob).await.unwrap(),
            RenameOutcome::Unchanged
        );
        assert_eq!(
            repo.resolve_username("bob").await.unwrap().as_deref(),
            Some("u1")
        );
    }

    #[tokio::test]
    async fn rename_to_someone_elses_name_conflicts() {
        let repo = repo_with_user("u1", "alice").await;
        repo.register_user(&new_user("u2", "bob")).await.unwrap();

        let err = repo
            .rename_username("u1", &Username::parse("bob").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
        assert_eq!(repo.user("u1").await.unwrap().unwrap().username, "alice");
        assert_eq!(
            repo.resolve_username("alice").await.unwrap().as_deref(),
            Some("u1")
        );
    }

    #[tokio::test]
    async fn create_post_uses_slug_and_defaults() {
        let repo = repo_with_user("u1", "alice").await;
        let post = repo.create_post("u1", "Hello World").await.unwrap();

        assert_eq!(post.slug, "hello-world");
        assert_eq!(post.username, "alice");
        assert!(!post.published);
        assert_eq!(post.hearts, 0);
        assert_eq!(post.content, DEFAULT_CONTENT);
        assert_eq!(repo.user("u1").await.unwrap().unwrap().post_count, 1);
        assert!(!repo.slug_available("u1", "hello-world").await.unwrap());
    }

    #[tokio::test]
    async fn colliding_slug_is_blocked() {
        let repo = repo_with_user("u1", "alice").await;
        repo.create_post("u1", "Hello World").await.unwrap();

        let err = repo.create_post("u1", "Hello   World!!").await.unwrap_err();
        match err {
            RepositoryError::Conflict(msg) => assert!(msg.contains("already created")),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(repo.user("u1").await.unwrap().unwrap().post_count, 1);
    }

    #[tokio::test]
    async fn same_slug_for_different_owners_is_fine() {
        let repo = repo_with_user("u1", "alice").await;
        repo.register_user(&new_user("u2", "bob")).await.unwrap();
        repo.create_post("u1", "Hello World").await.unwrap();
        assert!(repo.create_post("u2", "Hello World").await.is_ok());
    }

    #[tokio::test]
    async fn short_titles_are_invalid() {
        let repo = repo_with_user("u1", "alice").await;
        let err = repo.create_post("u1", "Hi").await.unwrap_err();
        assert!(matches!(err, RepositoryError::Invalid(_)));
    }

    #[tokio::test]
    async fn creation_times_are_strictly_increasing() {
        let repo = repo_with_user("u1", "alice").await;
        let mut last = i64::MIN;
        for i in 0..5 {
            let post = repo.create_post("u1", &format!("post number {i}")).await.unwrap();
            assert!(post.created_at > last);
            last = post.created_at;
        }
    }

    #[tokio::test]
    async fn update_post_overwrites_given_fields() {
        let repo = repo_with_user("u1", "alice").await;
        repo.create_post("u1", "Hello World").await.unwrap();

        let patch = PostPatch {
            content: Some("Some real content here".into()),
            published: Some(true),
            ..Default::default()
        };
        let post = repo.update_post("u1", "hello-world", &patch).await.unwrap();
        assert!(post.published);
        assert_eq!(post.content, "Some real content here");
        assert_eq!(post.summary, DEFAULT_SUMMARY);

        let stored = repo.post("u1", "hello-world").await.unwrap().unwrap();
        assert_eq!(stored, post);
    }

    #[tokio::test]
    async fn update_missing_post_is_not_found() {
        let repo = repo_with_user("u1", "alice").await;
        let err = repo
            .update_post("u1", "nope", &PostPatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound(_)));
    }

    #[tokio::test]
    async fn alternating_hearts_track_parity() {
        let repo = repo_with_user("u1", "alice").await;
        repo.register_user(&new_user("u2", "bob")).await.unwrap();
        published_post(&repo, "u1", "Hello World").await;

        for n in 1..=7 {
            let state = if n % 2 == 1 {
                repo.add_heart("u1", "hello-world", "u2").await.unwrap()
            } else {
                repo.remove_heart("u1", "hello-world", "u2").await.unwrap()
            };
            let expected = if n % 2 == 1 { 1 } else { 0 };
            assert_eq!(state.hearts, expected);
            assert_eq!(state.hearted, n % 2 == 1);

            let observed = repo.heart_state("u1", "hello-world", "u2").await.unwrap();
            assert_eq!(observed, state);
        }
    }

    #[tokio::test]
    async fn duplicate_heart_requests_do_not_drift() {
        let repo = repo_with_user("u1", "alice").await;
        published_post(&repo, "u1", "Hello World").await;

        repo.add_heart("u1", "hello-world", "u2").await.unwrap();
        let state = repo.add_heart("u1", "hello-world", "u2").await.unwrap();
        assert_eq!(state.hearts, 1);

        repo.remove_heart("u1", "hello-world", "u2").await.unwrap();
        let state = repo.remove_heart("u1", "hello-world", "u2").await.unwrap();
        assert_eq!(state.hearts, 0);
        assert!(!state.hearted);
    }

    #[tokio::test]
    async fn hearting_missing_post_is_not_found() {
        let repo = repo_with_user("u1", "alice").await;
        let err = repo.add_heart("u1", "ghost", "u2").await.unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound(_)));
    }

    #[tokio::test]
    async fn drafts_are_heartable_by_their_owner_only() {
        let repo = repo_with_user("u1", "alice").await;
        repo.create_post("u1", "Hello World").await.unwrap();

        let err = repo.add_heart("u1", "hello-world", "u2").await.unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound(_)));
        let err = repo.heart_state("u1", "hello-world", "u2").await.unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound(_)));

        let state = repo.add_heart("u1", "hello-world", "u1").await.unwrap();
        assert_eq!(state.hearts, 1);
        let err = repo.remove_heart("u1", "hello-world", "u2").await.unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_duplicate_hearts_count_once() {
        let tmp = tempfile::tempdir().unwrap();
        let pool = db::create_pool(&tmp.path().join("hearts.db")).unwrap();
        db::run_migrations(&pool).unwrap();
        let repo = SqliteBlogRepository::new(pool);
        repo.register_user(&new_user("u1", "alice")).await.unwrap();
        published_post(&repo, "u1", "Hello World").await;

        let submits: Vec<_> = (0..8)
            .map(|_| {
                let repo = repo.clone();
                tokio::spawn(async move { repo.add_heart("u1", "hello-world", "u2").await })
            })
            .collect();
        for submit in submits {
            assert!(submit.await.unwrap().unwrap().hearted);
        }
        let state = repo.heart_state("u1", "hello-world", "u2").await.unwrap();
        assert_eq!(state.hearts, 1);

        let (first, second) = tokio::join!(
            repo.remove_heart("u1", "hello-world", "u2"),
            repo.remove_heart("u1", "hello-world", "u2"),
        );
        assert_eq!(first.unwrap().hearts, 0);
        assert_eq!(second.unwrap().hearts, 0);
    }

    #[tokio::test]
    async fn delete_hearts_runs_in_batches() {
        let repo = repo_with_user("u1", "alice").await;
        published_post(&repo, "u1", "Hello World").await;
        for i in 0..10 {
            repo.add_heart("u1", "hello-world", &format!("fan{i}"))
                .await
                .unwrap();
        }

        let deleted = repo.delete_hearts("u1", "hello-world", 4).await.unwrap();
        assert_eq!(deleted, 10);
        let state = repo.heart_state("u1", "hello-world", "fan0").await.unwrap();
        assert!(!state.hearted);
    }

    #[tokio::test]
    async fn delete_post_decrements_count() {
        let repo = repo_with_user("u1", "alice").await;
        repo.create_post("u1", "Hello World").await.unwrap();

        assert!(repo.delete_post("u1", "hello-world").await.unwrap());
        assert!(!repo.delete_post("u1", "hello-world").await.unwrap());
        assert_eq!(repo.user("u1").await.unwrap().unwrap().post_count, 0);
        assert!(repo.post("u1", "hello-world").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn patch_posts_username_respects_limit() {
        let repo = repo_with_user("u1", "alice").await;
        for title in ["first post", "second post", "third post"] {
            repo.create_post("u1", title).await.unwrap();
        }

        let err = repo.patch_posts_username("u1", "bob", 2).await.unwrap_err();
        assert!(matches!(err, RepositoryError::TooMany(_)));
        let post = repo.post("u1", "first-post").await.unwrap().unwrap();
        assert_eq!(post.username, "alice");

        assert_eq!(repo.patch_posts_username("u1", "bob", 3).await.unwrap(), 3);
        let post = repo.post("u1", "first-post").await.unwrap().unwrap();
        assert_eq!(post.username, "bob");
    }

    #[tokio::test]
    async fn list_posts_scopes_and_cursor() {
        let repo = repo_with_user("u1", "alice").await;
        repo.register_user(&new_user("u2", "bob")).await.unwrap();

        let published = PostPatch {
            published: Some(true),
            ..Default::default()
        };
        for title in ["alpha one", "alpha two", "alpha three"] {
            let post = repo.create_post("u1", title).await.unwrap();
            repo.update_post("u1", &post.slug, &published).await.unwrap();
        }
        repo.create_post("u1", "alpha draft").await.unwrap();
        let bob = repo.create_post("u2", "bob post").await.unwrap();
        repo.update_post("u2", &bob.slug, &published).await.unwrap();

        let home = repo.list_posts(&FeedScope::Home, None, 10).await.unwrap();
        let slugs: Vec<_> = home.iter().map(|p| p.slug.as_str()).collect();
        assert_eq!(slugs, ["bob-post", "alpha-three", "alpha-two", "alpha-one"]);

        let user = repo
            .list_posts(&FeedScope::User("u1".into()), None, 10)
            .await
            .unwrap();
        assert_eq!(user.len(), 3);

        let owner = repo
            .list_posts(&FeedScope::Owner("u1".into()), None, 10)
            .await
            .unwrap();
        assert_eq!(owner.len(), 4);
        assert_eq!(owner[0].slug, "alpha-draft");

        let cursor = home[1].created_at;
        let older = repo
            .list_posts(&FeedScope::Home, Some(cursor), 10)
            .await
            .unwrap();
        let slugs: Vec<_> = older.iter().map(|p| p.slug.as_str()).collect();
        assert_eq!(slugs, ["alpha-two", "alpha-one"]);
    }

    #[tokio::test]
    async fn delete_user_data_removes_posts_and_hearts() {
        let repo = repo_with_user("u1", "alice").await;
        published_post(&repo, "u1", "Hello World").await;
        repo.add_heart("u1", "hello-world", "u2").await.unwrap();

        assert!(repo.delete_user_data("u1").await.unwrap());
        assert!(repo.user("u1").await.unwrap().is_none());
        assert!(repo.post("u1", "hello-world").await.unwrap().is_none());

        // reservation is released separately
        assert!(repo.resolve_username("alice").await.unwrap().is_some());
        assert!(repo.release_username("u1", "alice").await.unwrap());
        assert!(repo.resolve_username("alice").await.unwrap().is_none());
    }
}
