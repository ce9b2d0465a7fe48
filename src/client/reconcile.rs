//! Keeps the session cookie in step with the identity provider.
//!
//! The identity provider session, the signed cookie and the user record change
//! independently. When the provider says someone is logged in but the cookie
//! has no username, the cookie is re-minted once from a fresh ID token.

use async_trait::async_trait;

use super::{ApiClient, ClientError, ClientResult};
use crate::db::models::User;

/// Snapshot of what the caller currently knows about authentication.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthState {
    /// Identity provider is still restoring its session
    pub validating: bool,
    /// Uid of the user logged in at the identity provider
    pub provider_uid: Option<String>,
    /// Username carried by the session cookie
    pub session_username: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileAction {
    Wait,
    Nothing,
    Remint,
}

pub fn decide(state: &AuthState) -> ReconcileAction {
    if state.validating {
        return ReconcileAction::Wait;
    }
    match (&state.provider_uid, &state.session_username) {
        (Some(_), None) => ReconcileAction::Remint,
        _ => ReconcileAction::Nothing,
    }
}

/// Supplies a fresh ID token for the logged-in user.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn id_token(&self) -> ClientResult<String>;
}

/// A token obtained elsewhere
pub struct StaticToken(pub String);

#[async_trait]
impl TokenSource for StaticToken {
    async fn id_token(&self) -> ClientResult<String> {
        Ok(self.0.clone())
    }
}

/// Signs in to the built-in identity provider for every token.
pub struct PasswordTokens<'a> {
    pub client: &'a ApiClient,
    pub email: String,
    pub password: String,
}

#[async_trait]
impl TokenSource for PasswordTokens<'_> {
    async fn id_token(&self) -> ClientResult<String> {
        let signed_in = self.client.signin(&self.email, &self.password).await?;
        Ok(signed_in.id_token)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Provider state not settled yet, try again later
    Waiting,
    InSync,
    Reminted(User),
}

pub struct SessionReconciler<'a> {
    client: &'a ApiClient,
}

impl<'a> SessionReconciler<'a> {
    pub fn new(client: &'a ApiClient) -> Self {
        Self { client }
    }

    /// Apply [`decide`] to `state`. A failed login is returned as is and
    /// not retried.
    pub async fn reconcile(
        &self,
        state: &AuthState,
        tokens: &dyn TokenSource,
    ) -> Result<ReconcileOutcome, ClientError> {
        match decide(state) {
            ReconcileAction::Wait => Ok(ReconcileOutcome::Waiting),
            ReconcileAction::Nothing => Ok(ReconcileOutcome::InSync),
            ReconcileAction::Remint => {
                let id_token = tokens.id_token().await?;
                match self.client.login(&id_token, None).await {
                    Ok(user) => {
                        tracing::info!("Re-minted session for {}", user.uid);
                        Ok(ReconcileOutcome::Reminted(user))
                    }
                    Err(e) => {
                        tracing::warn!(
                            "Session re-mint failed for {:?}: {}",
                            state.provider_uid,
                            e
                        );
                        Err(e)
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(validating: bool, uid: Option<&str>, username: Option<&str>) -> AuthState {
        AuthState {
            validating,
            provider_uid: uid.map(String::from),
            session_username: username.map(String::from),
        }
    }

    #[test]
    fn waits_while_validating() {
        assert_eq!(decide(&state(true, Some("u1"), None)), ReconcileAction::Wait);
        assert_eq!(decide(&state(true, None, None)), ReconcileAction::Wait);
    }

    #[test]
    fn remints_only_when_username_missing() {
        assert_eq!(decide(&state(false, Some("u1"), None)), ReconcileAction::Remint);
        assert_eq!(
            decide(&state(false, Some("u1"), Some("alice"))),
            ReconcileAction::Nothing
        );
        assert_eq!(decide(&state(false, None, None)), ReconcileAction::Nothing);
        assert_eq!(decide(&state(false, None, Some("stale"))), ReconcileAction::Nothing);
    }

    #[tokio::test]
    async fn settled_states_make_no_requests() {
        // nothing listens here; any request would fail
        let client = ApiClient::new("http://127.0.0.1:9", "quill", "quill").unwrap();
        let reconciler = SessionReconciler::new(&client);
        let tokens = StaticToken("unused".into());

        let outcome = reconciler
            .reconcile(&state(true, Some("u1"), None), &tokens)
            .await
            .unwrap();
        assert_eq!(outcome, ReconcileOutcome::Waiting);

        let outcome = reconciler
            .reconcile(&state(false, Some("u1"), Some("alice")), &tokens)
            .await
            .unwrap();
        assert_eq!(outcome, ReconcileOutcome::InSync);
    }
}
