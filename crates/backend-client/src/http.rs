//! HTTP backend
//!
//! Implements [`SessionStore`] and [`ProfileStore`] against the hosted
//! service's auth API (`/auth/v1`) and table API (`/rest/v1`).
//!
//! # Features
//!
//! - Password sign-in, sign-up with profile metadata, sign-out
//! - Session persisted to disk and restored on the next start
//! - Expired access tokens refreshed with the refresh token
//! - Change notifications published after each durable transition
//!
//! # Example
//!
//! ```rust,no_run
//! use backend_client::{BackendConfig, HttpBackend, SessionStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = BackendConfig::new("https://demo.supabase.co", "anon-key")
//!         .session_path("session.json");
//!     let backend = HttpBackend::new(config).await?;
//!
//!     let session = backend.sign_in_with_password("a@x.com", "secret1").await?;
//!     println!("Signed in as {}", session.identity.id);
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::json;
use storage::persistence::{PersistedState, PersistenceConfig};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::BackendConfig;
use crate::profiles::{NewProfile, ProfileRow, ProfileStore};
use crate::rest::RestClient;
use crate::session::{
    AuthChange, AuthEvent, Identity, Session, SessionStore, SignUpMetadata, SignUpOutcome,
};
use crate::{Error, Result};

const EVENT_CAPACITY: usize = 64;
const PGRST_OBJECT: &str = "application/vnd.pgrst.object+json";
const REFRESH_MARGIN_SECS: i64 = 60;

/// On-disk shape of the persisted session
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoredSession {
    /// The last live session, if any
    pub session: Option<Session>,
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    id: String,
    #[serde(default)]
    email: Option<String>,
}

impl From<UserResponse> for Identity {
    fn from(user: UserResponse) -> Self {
        let email = user.email.filter(|e| !e.is_empty());
        Identity::new(user.id, email)
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: UserResponse,
}

impl TokenResponse {
    fn into_session(self) -> Session {
        let expires_at = self
            .expires_at
            .and_then(|ts| DateTime::from_timestamp(ts, 0))
            .or_else(|| self.expires_in.map(|secs| Utc::now() + Duration::seconds(secs)));

        Session {
            identity: self.user.into(),
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
        }
    }
}

/// Sign-up answers with a session when auto-confirm is on, a bare user otherwise
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SignUpResponse {
    Session(TokenResponse),
    User(UserResponse),
}

/// Session store and profile table over HTTP
pub struct HttpBackend {
    rest: RestClient,
    session: RwLock<Option<Session>>,
    persisted: Option<PersistedState<StoredSession>>,
    events: broadcast::Sender<AuthChange>,
}

impl HttpBackend {
    /// Create a backend, loading any persisted session
    ///
    /// An unreadable session file is discarded rather than failing start-up.
    pub async fn new(config: BackendConfig) -> Result<Self> {
        config.validate()?;

        let persisted = match &config.session_path {
            Some(path) => {
                let state: PersistedState<StoredSession> =
                    PersistedState::new(PersistenceConfig::new(path).version(1));
                if let Err(e) = state.init().await {
                    warn!(error = %e, path = %path.display(), "discarding unreadable session file");
                    state.reset().await?;
                }
                Some(state)
            }
            None => None,
        };

        let restored = match &persisted {
            Some(state) => state.get().await?.session,
            None => None,
        };
        if let Some(session) = &restored {
            debug!(user_id = %session.identity.id, "loaded persisted session");
        }

        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Self {
            rest: RestClient::new(config)?,
            session: RwLock::new(restored),
            persisted,
            events,
        })
    }

    fn table_path(&self) -> String {
        format!("/rest/v1/{}", self.rest.config().profiles_table)
    }

    fn access_token(&self) -> Option<String> {
        self.session.read().as_ref().map(|s| s.access_token.clone())
    }

    /// Replace the live session, persist it, then notify subscribers
    async fn store_session(&self, session: Option<Session>, event: AuthEvent) {
        *self.session.write() = session.clone();

        if let Some(state) = &self.persisted {
            if let Err(e) = state.set(StoredSession { session: session.clone() }).await {
                warn!(error = %e, "failed to persist session");
            }
        }

        // No subscribers is fine
        let _ = self.events.send(AuthChange { event, session });
    }

    /// The live session, refreshed first if it expires within `threshold`
    ///
    /// A session that cannot be refreshed is dropped and `SignedOut` is
    /// published.
    async fn ensure_fresh(&self, threshold: Duration) -> Result<Option<Session>> {
        let current = self.session.read().clone();

        let Some(session) = current else {
            return Ok(None);
        };
        if !session.is_expiring_within(threshold) {
            return Ok(Some(session));
        }
        if !session.can_refresh() {
            self.store_session(None, AuthEvent::SignedOut).await;
            return Ok(None);
        }

        match self.refresh(&session.refresh_token).await {
            Ok(refreshed) => {
                debug!(user_id = %refreshed.identity.id, "refreshed expiring session");
                self.store_session(Some(refreshed.clone()), AuthEvent::TokenRefreshed).await;
                Ok(Some(refreshed))
            }
            Err(e) => {
                self.store_session(None, AuthEvent::SignedOut).await;
                Err(e)
            }
        }
    }

    /// Bearer for a table request: the user's access token, kept fresh
    async fn table_bearer(&self) -> Result<Option<String>> {
        let session = self.ensure_fresh(Duration::seconds(REFRESH_MARGIN_SECS)).await?;
        Ok(session.map(|s| s.access_token))
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Session> {
        let request = self
            .rest
            .request(Method::POST, "/auth/v1/token", None)
            .query(&[("grant_type", "refresh_token")])
            .json(&json!({ "refresh_token": refresh_token }));

        let response: TokenResponse = self.rest.send_json(request).await.map_err(auth_error)?;
        Ok(response.into_session())
    }
}

/// Client errors from the auth endpoints are credential/provider rejections
fn auth_error(err: Error) -> Error {
    match err {
        Error::Api { status, message, .. } if (400..500).contains(&status) => Error::Auth(message),
        other => other,
    }
}

#[async_trait]
impl SessionStore for HttpBackend {
    async fn get_session(&self) -> Result<Option<Session>> {
        self.ensure_fresh(Duration::zero()).await
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthChange> {
        self.events.subscribe()
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session> {
        let request = self
            .rest
            .request(Method::POST, "/auth/v1/token", None)
            .query(&[("grant_type", "password")])
            .json(&json!({ "email": email, "password": password }));

        let response: TokenResponse = self.rest.send_json(request).await.map_err(auth_error)?;
        let session = response.into_session();

        info!(user_id = %session.identity.id, "password sign-in accepted");
        self.store_session(Some(session.clone()), AuthEvent::SignedIn).await;
        Ok(session)
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: &SignUpMetadata,
    ) -> Result<SignUpOutcome> {
        let request = self
            .rest
            .request(Method::POST, "/auth/v1/signup", None)
            .json(&json!({ "email": email, "password": password, "data": metadata }));

        let response: SignUpResponse = self.rest.send_json(request).await.map_err(auth_error)?;

        match response {
            SignUpResponse::Session(token) => {
                let session = token.into_session();
                info!(user_id = %session.identity.id, "account created and signed in");
                self.store_session(Some(session.clone()), AuthEvent::SignedIn).await;
                Ok(SignUpOutcome {
                    identity: Some(session.identity.clone()),
                    session: Some(session),
                })
            }
            SignUpResponse::User(user) => {
                let identity: Identity = user.into();
                info!(user_id = %identity.id, "account created, confirmation pending");
                Ok(SignUpOutcome { identity: Some(identity), session: None })
            }
        }
    }

    async fn sign_out(&self) -> Result<()> {
        if let Some(token) = self.access_token() {
            let request = self.rest.request(Method::POST, "/auth/v1/logout", Some(&token));
            match self.rest.send_empty(request).await {
                Ok(()) => {}
                // The provider already forgot this session
                Err(Error::Api { status: 401 | 403 | 404, .. }) => {
                    debug!("session already invalid on the provider");
                }
                Err(e) => return Err(e),
            }
        }

        self.store_session(None, AuthEvent::SignedOut).await;
        info!("signed out");
        Ok(())
    }
}

#[async_trait]
impl ProfileStore for HttpBackend {
    async fn select_one(&self, id: &str) -> Result<ProfileRow> {
        let token = self.table_bearer().await?;
        let request = self
            .rest
            .request(Method::GET, &self.table_path(), token.as_deref())
            .query(&[("id", format!("eq.{id}")), ("select", "role".to_string())])
            .header("Accept", PGRST_OBJECT);

        match self.rest.send_json(request).await {
            Ok(row) => Ok(row),
            Err(Error::Api { status: 406, .. }) => Err(Error::NotFound(id.to_string())),
            Err(Error::Api { code: Some(code), .. }) if code == "PGRST116" => {
                Err(Error::NotFound(id.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    async fn insert_one(&self, record: &NewProfile) -> Result<()> {
        let token = self.table_bearer().await?;
        let request = self
            .rest
            .request(Method::POST, &self.table_path(), token.as_deref())
            .header("Prefer", "return=minimal")
            .json(record);

        self.rest.send_empty(request).await
    }
}
