use crate::domain::models::Session;
use crate::infrastructure::auth_client::{AuthHttpClient, AuthTokenResponse, PasswordSignInRequest};
use crate::infrastructure::credential_store::SessionStore;
use crate::infrastructure::error::InfraError;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

pub const REFRESH_LEEWAY_SECONDS: i64 = 60;

pub type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionTransition {
    SignedIn,
    SignedOut,
    AccountChanged,
    Refreshed,
    Unchanged,
}

impl SessionTransition {
    /// Whether this transition starts a new authenticated lifetime.
    pub fn starts_identity(self) -> bool {
        matches!(self, Self::SignedIn | Self::AccountChanged)
    }
}

/// The current identity, shared by everything that talks to the remote
/// store. Observers can subscribe to changes.
#[derive(Debug)]
pub struct SessionHolder {
    sender: watch::Sender<Option<Session>>,
}

impl SessionHolder {
    pub fn new(initial: Option<Session>) -> Self {
        let (sender, _) = watch::channel(initial);
        Self { sender }
    }

    pub fn current(&self) -> Option<Session> {
        self.sender.borrow().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.sender.borrow().is_some()
    }

    pub fn user_id(&self) -> Option<String> {
        self.sender.borrow().as_ref().map(|session| session.user_id.clone())
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Session>> {
        self.sender.subscribe()
    }

    pub fn replace(&self, next: Option<Session>) -> SessionTransition {
        let previous = self.sender.send_replace(next.clone());
        match (previous, next) {
            (None, None) => SessionTransition::Unchanged,
            (None, Some(_)) => SessionTransition::SignedIn,
            (Some(_), None) => SessionTransition::SignedOut,
            (Some(previous), Some(next)) if previous.user_id != next.user_id => {
                SessionTransition::AccountChanged
            }
            (Some(previous), Some(next)) if previous != next => SessionTransition::Refreshed,
            (Some(_), Some(_)) => SessionTransition::Unchanged,
        }
    }
}

impl Default for SessionHolder {
    fn default() -> Self {
        Self::new(None)
    }
}

pub struct SessionManager<S, C>
where
    S: SessionStore + ?Sized,
    C: AuthHttpClient + ?Sized,
{
    holder: Arc<SessionHolder>,
    store: Arc<S>,
    auth_client: Arc<C>,
    now_provider: NowProvider,
}

impl<S, C> SessionManager<S, C>
where
    S: SessionStore + ?Sized,
    C: AuthHttpClient + ?Sized,
{
    pub fn new(holder: Arc<SessionHolder>, store: Arc<S>, auth_client: Arc<C>) -> Self {
        Self {
            holder,
            store,
            auth_client,
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn holder(&self) -> &Arc<SessionHolder> {
        &self.holder
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<SessionTransition, InfraError> {
        let email = email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(InfraError::Validation("email must be a valid address".to_string()));
        }
        if password.is_empty() {
            return Err(InfraError::Validation("password must not be empty".to_string()));
        }

        let response = self
            .auth_client
            .sign_in_with_password(PasswordSignInRequest {
                email: email.to_string(),
                password: password.to_string(),
            })
            .await?;
        let session = self.session_from_response(response, None);
        self.store.save_session(&session)?;
        info!(user_id = %session.user_id, "signed in");
        Ok(self.holder.replace(Some(session)))
    }

    /// Loads the persisted session at launch, refreshing it when it is about
    /// to expire. A session the identity service rejects is forgotten; local
    /// data is left alone because nobody was signed in yet.
    pub async fn restore(&self) -> Result<SessionTransition, InfraError> {
        let Some(stored) = self.store.load_session()? else {
            return Ok(SessionTransition::Unchanged);
        };

        if stored.is_valid_at((self.now_provider)(), REFRESH_LEEWAY_SECONDS) {
            return Ok(self.holder.replace(Some(stored)));
        }

        match self.refresh(&stored).await {
            Ok(session) => Ok(self.holder.replace(Some(session))),
            Err(error) if error.is_transient() => Err(error),
            Err(error) => {
                warn!(%error, "stored session could not be restored");
                self.store.delete_session()?;
                Ok(SessionTransition::Unchanged)
            }
        }
    }

    /// Returns a session valid for the next remote call, or `None` in guest
    /// mode. A rejected refresh ends the session and yields
    /// [`InfraError::Unauthenticated`].
    pub async fn ensure_fresh(&self) -> Result<Option<Session>, InfraError> {
        let Some(current) = self.holder.current() else {
            return Ok(None);
        };
        if current.is_valid_at((self.now_provider)(), REFRESH_LEEWAY_SECONDS) {
            return Ok(Some(current));
        }

        match self.refresh(&current).await {
            Ok(session) => {
                self.holder.replace(Some(session.clone()));
                Ok(Some(session))
            }
            Err(error) if error.is_transient() => Err(error),
            Err(error) => {
                warn!(%error, "session refresh rejected; signing out");
                if let Err(error) = self.store.delete_session() {
                    warn!(%error, "failed to delete stored session");
                }
                self.holder.replace(None);
                Err(InfraError::Unauthenticated)
            }
        }
    }

    /// Ends the session locally even when the identity service cannot be
    /// reached.
    pub async fn sign_out(&self) -> SessionTransition {
        if let Some(session) = self.holder.current() {
            if let Err(error) = self.auth_client.sign_out(&session.access_token).await {
                warn!(%error, "remote sign out failed");
            }
        }
        if let Err(error) = self.store.delete_session() {
            warn!(%error, "failed to delete stored session");
        }
        self.holder.replace(None)
    }

    async fn refresh(&self, session: &Session) -> Result<Session, InfraError> {
        let refresh_token = session
            .refresh_token
            .as_deref()
            .filter(|token| !token.trim().is_empty())
            .ok_or_else(|| InfraError::Auth("session expired without refresh token".to_string()))?;
        let response = self.auth_client.refresh_session(refresh_token).await?;
        let refreshed = self.session_from_response(response, Some(session));
        self.store.save_session(&refreshed)?;
        Ok(refreshed)
    }

    fn session_from_response(&self, response: AuthTokenResponse, previous: Option<&Session>) -> Session {
        Session {
            user_id: response.user_id,
            email: response
                .email
                .or_else(|| previous.and_then(|session| session.email.clone())),
            access_token: response.access_token,
            refresh_token: response
                .refresh_token
                .or_else(|| previous.and_then(|session| session.refresh_token.clone())),
            expires_at: (self.now_provider)() + Duration::seconds(response.expires_in),
        }
    }
}
