use axum::http::{header, HeaderMap};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::config::AuthConfig;

type HmacSha256 = Hmac<Sha256>;

/// Claims carried by the session cookie.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionData {
    pub uid: String,
    pub username: Option<String>,
    #[serde(rename = "photoURL")]
    pub photo_url: String,
    /// Unix seconds
    pub expires_at: i64,
}

/// Signs, verifies and formats session cookies.
///
/// A cookie value is `base64url(json) "." hex(hmac_sha256(secret, base64url(json)))`.
#[derive(Debug, Clone)]
pub struct SessionCodec {
    secret: String,
    cookie_name: String,
    hours: u64,
    secure: bool,
}

impl SessionCodec {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            secret: config.session_secret.clone(),
            cookie_name: config.cookie_name.clone(),
            hours: config.session_hours,
            secure: config.secure_cookie,
        }
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    /// Fresh session for `uid` expiring after the configured lifetime.
    pub fn mint(&self, uid: &str, username: Option<String>, photo_url: &str) -> SessionData {
        let expires_at = chrono::Utc::now().timestamp() + (self.hours as i64) * 3600;
        SessionData {
            uid: uid.to_string(),
            username,
            photo_url: photo_url.to_string(),
            expires_at,
        }
    }

    pub fn encode(&self, session: &SessionData) -> Result<String, serde_json::Error> {
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(session)?);
        let signature = hmac_sha256_hex(&self.secret, &payload);
        Ok(format!("{payload}.{signature}"))
    }

    /// Verified, unexpired session, or `None` for anything else.
    pub fn decode(&self, value: &str) -> Option<SessionData> {
        let (payload, signature) = value.split_once('.')?;
        let expected = hmac_sha256_hex(&self.secret, payload);
        if !constant_time_eq(&expected, signature) {
            tracing::warn!("Rejected session cookie with a bad signature");
            return None;
        }

        let json = URL_SAFE_NO_PAD.decode(payload).ok()?;
        let session: SessionData = serde_json::from_slice(&json).ok()?;
        if session.expires_at <= chrono::Utc::now().timestamp() {
            return None;
        }
        Some(session)
    }

    /// Session from the request's cookie header
    pub fn from_headers(&self, headers: &HeaderMap) -> Option<SessionData> {
        cookie_value(headers, &self.cookie_name).and_then(|value| self.decode(value))
    }

    pub fn session_cookie(&self, session: &SessionData) -> Result<String, serde_json::Error> {
        let value = self.encode(session)?;
        let max_age_secs = self.hours * 3600;
        Ok(format!(
            "{}={}; HttpOnly; SameSite=Strict; Path=/; Max-Age={}{}",
            self.cookie_name,
            value,
            max_age_secs,
            self.secure_attr()
        ))
    }

    pub fn clear_session_cookie(&self) -> String {
        format!(
            "{}=; HttpOnly; SameSite=Strict; Path=/; Max-Age=0{}",
            self.cookie_name,
            self.secure_attr()
        )
    }

    fn secure_attr(&self) -> &'static str {
        if self.secure {
            "; Secure"
        } else {
            ""
        }
    }
}

pub fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|s| s.split(';'))
        .map(|s| s.trim())
        .find_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            (key == name).then_some(value)
        })
}

fn hmac_sha256_hex(secret: &str, message: &str) -> String {
    // HMAC accepts keys of any size
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC-SHA256 accepts any key size");
    mac.update(message.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

pub(crate) fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}
