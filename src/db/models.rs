use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub uid: String,
    pub email: String,
    pub display_name: String,
    pub username: String,
    #[serde(rename = "photoURL")]
    pub photo_url: String,
    pub post_count: i64,
}

/// What visitors may see of a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicProfile {
    pub uid: String,
    pub display_name: String,
    pub username: String,
    #[serde(rename = "photoURL")]
    pub photo_url: String,
    pub post_count: i64,
}

impl From<User> for PublicProfile {
    fn from(user: User) -> Self {
        Self {
            uid: user.uid,
            display_name: user.display_name,
            username: user.username,
            photo_url: user.photo_url,
            post_count: user.post_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub uid: String,
    pub username: String,
    pub slug: String,
    pub title: String,
    pub content: String,
    pub summary: String,
    pub summary_photo: String,
    pub published: bool,
    pub hearts: i64,
    /// Milliseconds since the Unix epoch
    pub created_at: i64,
    pub updated_at: i64,
}

/// Feed entry: a post without its body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostSummary {
    pub uid: String,
    pub username: String,
    pub slug: String,
    pub title: String,
    pub summary: String,
    pub summary_photo: String,
    pub published: bool,
    pub hearts: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl From<Post> for PostSummary {
    fn from(post: Post) -> Self {
        Self {
            uid: post.uid,
            username: post.username,
            slug: post.slug,
            title: post.title,
            summary: post.summary,
            summary_photo: post.summary_photo,
            published: post.published,
            hearts: post.hearts,
            created_at: post.created_at,
            updated_at: post.updated_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartState {
    pub hearted: bool,
    pub hearts: i64,
}
