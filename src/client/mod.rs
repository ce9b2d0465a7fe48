//! Typed HTTP client for the blog API.
//!
//! The client keeps the session cookie in its own cookie store, sends the
//! shared route credential on every `/api` call and caches posts it has read
//! until a mutation through the same client touches them.

pub mod cache;
pub mod reconcile;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::json;
use url::Url;

use crate::db::models::{HeartState, Post, PostSummary, PublicProfile, User};
use crate::feed::{FeedScope, PostSource};
use crate::routes::identity::TokenResponse;
use crate::routes::media::{MediaKind, UploadResponse};
use crate::routes::posts::SlugAvailability;
use crate::routes::users::UsernameAvailability;

pub use cache::PostCache;
pub use reconcile::{
    decide, AuthState, PasswordTokens, ReconcileAction, ReconcileOutcome, SessionReconciler,
    StaticToken, TokenSource,
};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// Server answered with a non-success status
    #[error("API error {status}: {message}")]
    Status { status: u16, message: String },

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl ClientError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Text suitable for showing to a user.
    pub fn user_message(&self) -> String {
        match self {
            ClientError::Status { status: 401, .. } => "You are not authorized".to_string(),
            ClientError::Status { status: 403, message }
            | ClientError::Status { status: 409, message }
            | ClientError::Status { status: 422, message } => message.clone(),
            _ => "Something went wrong, please try again".to_string(),
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

/// Blog API client.
pub struct ApiClient {
    http: reqwest::Client,
    base: Url,
    route_username: String,
    route_password: String,
    posts: PostCache,
}

impl ApiClient {
    /// Client for the server at `base_url` using the shared route credential.
    pub fn new(
        base_url: &str,
        route_username: impl Into<String>,
        route_password: impl Into<String>,
    ) -> ClientResult<Self> {
        let http = reqwest::Client::builder().cookie_store(true).build()?;
        let base = Url::parse(base_url)?;
        if base.cannot_be_a_base() {
            return Err(ClientError::Configuration(format!("{base_url} is not a base URL")));
        }

        Ok(Self {
            http,
            base,
            route_username: route_username.into(),
            route_password: route_password.into(),
            posts: PostCache::new(),
        })
    }

    pub fn cache(&self) -> &PostCache {
        &self.posts
    }

    fn url(&self, segments: &[&str]) -> ClientResult<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ClientError::Configuration("base URL cannot hold a path".into()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn api(&self, method: Method, segments: &[&str]) -> ClientResult<RequestBuilder> {
        let mut path = vec!["api"];
        path.extend_from_slice(segments);
        Ok(self
            .http
            .request(method, self.url(&path)?)
            .basic_auth(&self.route_username, Some(&self.route_password)))
    }

    async fn send(&self, request: RequestBuilder) -> ClientResult<Response> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = response.text().await.unwrap_or_default();
        tracing::debug!("Request failed with {}: {}", status, message);
        Err(ClientError::Status {
            status: status.as_u16(),
            message,
        })
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> ClientResult<T> {
        Ok(self.send(request).await?.json().await?)
    }

    async fn send_text(&self, request: RequestBuilder) -> ClientResult<String> {
        Ok(self.send(request).await?.text().await?)
    }

    // -- Identity provider --

    pub async fn signup(&self, email: &str, password: &str) -> ClientResult<TokenResponse> {
        let request = self
            .http
            .post(self.url(&["identity", "signup"])?)
            .json(&json!({ "email": email, "password": password }));
        self.send_json(request).await
    }

    pub async fn signin(&self, email: &str, password: &str) -> ClientResult<TokenResponse> {
        let request = self
            .http
            .post(self.url(&["identity", "signin"])?)
            .json(&json!({ "email": email, "password": password }));
        self.send_json(request).await
    }

    pub async fn verify_email(&self, uid: &str, code: &str) -> ClientResult<()> {
        let request = self
            .http
            .post(self.url(&["identity", "verify-email"])?)
            .json(&json!({ "uid": uid, "code": code }));
        self.send(request).await?;
        Ok(())
    }

    // -- Session --

    /// Exchange an ID token for a session cookie, registering on first login.
    pub async fn login(&self, id_token: &str, username: Option<&str>) -> ClientResult<User> {
        let request = self
            .api(Method::POST, &["auth", "login"])?
            .json(&json!({ "idToken": id_token, "username": username }));
        self.send_json(request).await
    }

    pub async fn logout(&self) -> ClientResult<()> {
        self.send(self.api(Method::POST, &["auth", "logout"])?).await?;
        self.posts.clear();
        Ok(())
    }

    /// Username held by the current session, if any
    pub async fn session_username(&self) -> ClientResult<Option<String>> {
        #[derive(serde::Deserialize)]
        struct Body {
            username: String,
        }

        let body: Option<Body> = self
            .send_json(self.api(Method::GET, &["auth", "username"])?)
            .await?;
        Ok(body.map(|b| b.username))
    }

    pub async fn delete_account(&self, id_token: &str) -> ClientResult<String> {
        let request = self
            .api(Method::POST, &["auth", "delete"])?
            .json(&json!({ "idToken": id_token }));
        let text = self.send_text(request).await?;
        self.posts.clear();
        Ok(text)
    }

    /// Rename, then rewrite the author name on the user's posts.
    pub async fn change_username(
        &self,
        uid: &str,
        username: &str,
        id_token: &str,
    ) -> ClientResult<String> {
        let new_username = self.update_username(username).await?;
        self.posts.invalidate_owner(uid);
        self.update_post_username(id_token, &new_username).await?;
        Ok(new_username)
    }

    pub async fn update_username(&self, username: &str) -> ClientResult<String> {
        #[derive(serde::Deserialize)]
        struct Body {
            username: String,
        }

        let request = self
            .api(Method::POST, &["auth", "update-username"])?
            .json(&json!({ "username": username }));
        let body: Body = self.send_json(request).await?;
        Ok(body.username)
    }

    pub async fn update_photo_url(&self, photo_url: &str) -> ClientResult<()> {
        let request = self
            .api(Method::POST, &["auth", "update-photo-url"])?
            .json(&json!({ "photoURL": photo_url }));
        self.send(request).await?;
        Ok(())
    }

    pub async fn update_display_name(&self, display_name: &str) -> ClientResult<()> {
        let request = self
            .api(Method::POST, &["auth", "update-display-name"])?
            .json(&json!({ "displayName": display_name }));
        self.send(request).await?;
        Ok(())
    }

    // -- Posts --

    pub async fn slug_available(&self, title: &str) -> ClientResult<SlugAvailability> {
        let request = self
            .api(Method::GET, &["posts", "slug-available"])?
            .query(&[("title", title)]);
        self.send_json(request).await
    }

    pub async fn create_post(&self, title: &str) -> ClientResult<Post> {
        let request = self
            .api(Method::POST, &["posts", "create"])?
            .json(&json!({ "title": title }));
        self.send_json(request).await
    }

    pub async fn update_post(
        &self,
        slug: &str,
        content: Option<&str>,
        published: Option<bool>,
    ) -> ClientResult<Post> {
        let request = self
            .api(Method::POST, &["posts", "update"])?
            .json(&json!({ "slug": slug, "content": content, "published": published }));
        let post: Post = self.send_json(request).await?;
        self.posts.invalidate_post(&post.uid, slug);
        Ok(post)
    }

    pub async fn update_summary(
        &self,
        slug: &str,
        summary: Option<&str>,
        summary_photo: Option<&str>,
    ) -> ClientResult<Post> {
        let request = self
            .api(Method::POST, &["posts", "update-summary"])?
            .json(&json!({ "slug": slug, "summary": summary, "summaryPhoto": summary_photo }));
        let post: Post = self.send_json(request).await?;
        self.posts.invalidate_post(&post.uid, slug);
        Ok(post)
    }

    pub async fn delete_post(&self, uid: &str, id_token: &str, slug: &str) -> ClientResult<()> {
        let request = self
            .api(Method::POST, &["posts", "delete-post"])?
            .json(&json!({ "idToken": id_token, "slug": slug }));
        let result = self.send(request).await;
        // a partial delete still leaves the cached copy stale
        self.posts.invalidate_post(uid, slug);
        result.map(|_| ())
    }

    pub async fn update_post_username(&self, id_token: &str, new_username: &str) -> ClientResult<()> {
        let request = self
            .api(Method::POST, &["posts", "update-post-username"])?
            .json(&json!({ "idToken": id_token, "newUsername": new_username }));
        self.send(request).await?;
        Ok(())
    }

    // -- Hearts --

    pub async fn heart(&self, author_uid: &str, slug: &str) -> ClientResult<HeartState> {
        let request = self
            .api(Method::POST, &["posts", "heart"])?
            .json(&json!({ "authorUid": author_uid, "slug": slug }));
        let state = self.send_json(request).await?;
        self.posts.invalidate_post(author_uid, slug);
        Ok(state)
    }

    pub async fn unheart(&self, author_uid: &str, slug: &str) -> ClientResult<HeartState> {
        let request = self
            .api(Method::POST, &["posts", "unheart"])?
            .json(&json!({ "authorUid": author_uid, "slug": slug }));
        let state = self.send_json(request).await?;
        self.posts.invalidate_post(author_uid, slug);
        Ok(state)
    }

    pub async fn heart_state(&self, author_uid: &str, slug: &str) -> ClientResult<HeartState> {
        let request = self
            .api(Method::GET, &["posts", "heart"])?
            .query(&[("authorUid", author_uid), ("slug", slug)]);
        self.send_json(request).await
    }

    // -- Users --

    pub async fn profile(&self, username: &str) -> ClientResult<PublicProfile> {
        self.send_json(self.api(Method::GET, &["users", username])?)
            .await
    }

    pub async fn username_available(&self, username: &str) -> ClientResult<UsernameAvailability> {
        let request = self
            .api(Method::GET, &["users", "username-available"])?
            .query(&[("username", username)]);
        self.send_json(request).await
    }

    /// Post by author and slug, answered from the cache when possible.
    pub async fn post(&self, username: &str, slug: &str) -> ClientResult<Post> {
        if let Some(post) = self.posts.get(username, slug) {
            return Ok(post);
        }

        let post: Post = self
            .send_json(self.api(Method::GET, &["users", username, "posts", slug])?)
            .await?;
        self.posts.insert(username, post.clone());
        Ok(post)
    }

    pub async fn user_posts(
        &self,
        username: &str,
        before: Option<i64>,
        limit: usize,
    ) -> ClientResult<Vec<PostSummary>> {
        let request = self
            .api(Method::GET, &["users", username, "posts"])?
            .query(&page_query(before, limit));
        self.send_json(request).await
    }

    // -- Media --

    /// Upload an image; `slug` is required for post media.
    pub async fn upload_media(
        &self,
        kind: MediaKind,
        slug: Option<&str>,
        file_name: &str,
        content_type: &str,
        data: Vec<u8>,
    ) -> ClientResult<UploadResponse> {
        let part = Part::bytes(data)
            .file_name(file_name.to_string())
            .mime_str(content_type)?;
        let mut form = Form::new().text("kind", kind.as_str());
        if let Some(slug) = slug {
            form = form.text("slug", slug.to_string());
        }
        let form = form.part("file", part);

        let request = self.api(Method::POST, &["media"])?.multipart(form);
        let uploaded: UploadResponse = self.send_json(request).await?;
        if let Some(slug) = slug {
            self.posts.invalidate_slug(slug);
        }
        Ok(uploaded)
    }

    /// Raw bytes of a stored object, by the URL path the server returned
    pub async fn fetch_media(&self, url_path: &str) -> ClientResult<Vec<u8>> {
        let url = self.base.join(url_path)?;
        let response = self.send(self.http.get(url)).await?;
        Ok(response.bytes().await?.to_vec())
    }
}

fn page_query(before: Option<i64>, limit: usize) -> Vec<(&'static str, String)> {
    let mut query = vec![("limit", limit.to_string())];
    if let Some(before) = before {
        query.push(("before", before.to_string()));
    }
    query
}

impl ApiClient {
    async fn feed_page(
        &self,
        scope: &FeedScope,
        before: Option<i64>,
        limit: usize,
    ) -> ClientResult<Vec<PostSummary>> {
        let mut query = page_query(before, limit);
        let request = match scope {
            FeedScope::Home => self.api(Method::GET, &["feed"])?,
            FeedScope::User(uid) => {
                query.push(("uid", uid.clone()));
                self.api(Method::GET, &["feed"])?
            }
            // the server reads the owner from the session cookie
            FeedScope::Owner(_) => self.api(Method::GET, &["admin", "posts"])?,
        };
        self.send_json(request.query(&query)).await
    }
}

#[async_trait]
impl PostSource for ApiClient {
    type Error = ClientError;

    /// The server caps page sizes, so a short page only means the end once
    /// the next request comes back empty.
    async fn fetch_page(
        &self,
        scope: &FeedScope,
        before: Option<i64>,
        limit: usize,
    ) -> ClientResult<Vec<PostSummary>> {
        let mut posts: Vec<PostSummary> = Vec::new();
        let mut cursor = before;

        while posts.len() < limit {
            let page = self.feed_page(scope, cursor, limit - posts.len()).await?;
            let Some(last) = page.last() else {
                break;
            };
            cursor = Some(last.created_at);
            posts.extend(page);
        }

        Ok(posts)
    }
}
