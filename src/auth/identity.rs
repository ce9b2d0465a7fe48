use async_trait::async_trait;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::Rng;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::IdentityConfig;
use crate::state::DbPool;

const HASH_COST: u32 = 10;
const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Invalid ID token: {0}")]
    InvalidToken(String),

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Email is already in use")]
    EmailInUse,

    #[error("Invalid email address")]
    InvalidEmail,

    #[error("Invalid verification code")]
    InvalidCode,

    #[error("Password is too weak")]
    WeakPassword,

    #[error("Unknown account")]
    UnknownAccount,

    #[error("Database error: {0}")]
    Database(#[from] r2d2::Error),

    #[error("SQL error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("Hashing error: {0}")]
    Hash(#[from] bcrypt::BcryptError),

    #[error("Token signing error: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),
}

/// Claims of an ID token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityClaims {
    /// Account uid
    pub sub: String,
    pub email: String,
    pub email_verified: bool,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityAccount {
    pub uid: String,
    pub email: String,
    pub email_verified: bool,
}

/// What the blog needs from an identity provider.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn verify_id_token(&self, token: &str) -> Result<IdentityClaims, IdentityError>;

    /// Current state of an account, `None` once deleted
    async fn account(&self, uid: &str) -> Result<Option<IdentityAccount>, IdentityError>;

    async fn delete_account(&self, uid: &str) -> Result<bool, IdentityError>;
}

/// Result of creating an account.
#[derive(Debug, Clone)]
pub struct Signup {
    pub uid: String,
    pub id_token: String,
    /// Plaintext code; only its hash is stored
    pub verification_code: String,
}

/// Email/password accounts stored alongside the blog data.
#[derive(Clone)]
pub struct LocalIdentity {
    pool: DbPool,
    secret: String,
    issuer: String,
    ttl_minutes: i64,
}

impl LocalIdentity {
    pub fn new(pool: DbPool, config: &IdentityConfig) -> Self {
        Self {
            pool,
            secret: config.token_secret.clone(),
            issuer: config.issuer.clone(),
            ttl_minutes: config.token_ttl_minutes,
        }
    }

    pub async fn signup(&self, email: &str, password: &str) -> Result<Signup, IdentityError> {
        let email = normalize_email(email)?;
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(IdentityError::WeakPassword);
        }

        let uid = uuid::Uuid::now_v7().simple().to_string();
        let code = generate_code();
        let password_hash = bcrypt::hash(password, HASH_COST)?;
        let code_hash = bcrypt::hash(&code, HASH_COST)?;

        let conn = self.pool.get()?;
        // the UNIQUE email column settles concurrent signups
        conn.execute(
            "INSERT INTO identity_accounts (uid, email, password_hash, email_verified, verification_hash)
             VALUES (?1, ?2, ?3, 0, ?4)",
            params![uid, email, password_hash, code_hash],
        )
        .map_err(|e| match e.sqlite_error_code() {
            Some(rusqlite::ErrorCode::ConstraintViolation) => IdentityError::EmailInUse,
            _ => IdentityError::Sql(e),
        })?;
        drop(conn);

        tracing::info!("Created identity account {} <{}>", uid, email);
        tracing::info!("Verification code for {}: {}", email, code);

        let account = IdentityAccount {
            uid: uid.clone(),
            email,
            email_verified: false,
        };
        let id_token = self.issue_token(&account)?;

        Ok(Signup {
            uid,
            id_token,
            verification_code: code,
        })
    }

    pub async fn signin(
        &self,
        email: &str,
        password: &str,
    ) -> Result<(IdentityAccount, String), IdentityError> {
        let email = normalize_email(email).map_err(|_| IdentityError::InvalidCredentials)?;

        let conn = self.pool.get()?;
        let row: Option<(String, String, bool)> = conn
            .query_row(
                "SELECT uid, password_hash, email_verified FROM identity_accounts WHERE email = ?1",
                params![email],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;
        drop(conn);

        let (uid, password_hash, email_verified) = row.ok_or(IdentityError::InvalidCredentials)?;
        if !bcrypt::verify(password, &password_hash).unwrap_or(false) {
            tracing::warn!("Failed sign-in for {}", email);
            return Err(IdentityError::InvalidCredentials);
        }

        let account = IdentityAccount {
            uid,
            email,
            email_verified,
        };
        let token = self.issue_token(&account)?;
        Ok((account, token))
    }

    /// Mark the account's email verified when `code` matches.
    pub async fn verify_email(&self, uid: &str, code: &str) -> Result<(), IdentityError> {
        let conn = self.pool.get()?;
        let row: Option<(bool, Option<String>)> = conn
            .query_row(
                "SELECT email_verified, verification_hash FROM identity_accounts WHERE uid = ?1",
                params![uid],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let (verified, hash) = row.ok_or(IdentityError::UnknownAccount)?;
        if verified {
            return Ok(());
        }
        let hash = hash.ok_or(IdentityError::InvalidCode)?;
        if !bcrypt::verify(code.trim(), &hash).unwrap_or(false) {
            return Err(IdentityError::InvalidCode);
        }

        conn.execute(
            "UPDATE identity_accounts SET email_verified = 1, verification_hash = NULL WHERE uid = ?1",
            params![uid],
        )?;
        tracing::info!("Verified email for {}", uid);
        Ok(())
    }

    /// Signed HS256 ID token for `account`.
    pub fn issue_token(&self, account: &IdentityAccount) -> Result<String, IdentityError> {
        let now = chrono::Utc::now().timestamp();
        let claims = IdentityClaims {
            sub: account.uid.clone(),
            email: account.email.clone(),
            email_verified: account.email_verified,
            iss: self.issuer.clone(),
            iat: now,
            exp: now + self.ttl_minutes * 60,
        };
        Ok(encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )?)
    }

    /// Fresh token for an existing account
    pub async fn token_for(&self, uid: &str) -> Result<String, IdentityError> {
        let account = self
            .account(uid)
            .await?
            .ok_or(IdentityError::UnknownAccount)?;
        self.issue_token(&account)
    }
}

#[async_trait]
impl IdentityProvider for LocalIdentity {
    async fn verify_id_token(&self, token: &str) -> Result<IdentityClaims, IdentityError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);

        let data = decode::<IdentityClaims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        )
        .map_err(|e| IdentityError::InvalidToken(e.to_string()))?;

        if self.account(&data.claims.sub).await?.is_none() {
            return Err(IdentityError::InvalidToken("account no longer exists".into()));
        }
        Ok(data.claims)
    }

    async fn account(&self, uid: &str) -> Result<Option<IdentityAccount>, IdentityError> {
        let conn = self.pool.get()?;
        let account = conn
            .query_row(
                "SELECT uid, email, email_verified FROM identity_accounts WHERE uid = ?1",
                params![uid],
                |row| {
                    Ok(IdentityAccount {
                        uid: row.get(0)?,
                        email: row.get(1)?,
                        email_verified: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(account)
    }

    async fn delete_account(&self, uid: &str) -> Result<bool, IdentityError> {
        let conn = self.pool.get()?;
        let deleted = conn.execute("DELETE FROM identity_accounts WHERE uid = ?1", params![uid])?;
        Ok(deleted > 0)
    }
}

fn normalize_email(email: &str) -> Result<String, IdentityError> {
    let email = email.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(email),
        _ => Err(IdentityError::InvalidEmail),
    }
}

/// Six-digit verification code
fn generate_code() -> String {
    let mut rng = rand::thread_rng();
    format!("{:06}", rng.gen_range(0..1_000_000))
}
