//! Sessions and the session store contract
//!
//! This module defines:
//! - `Identity` and `Session`, the values the auth core reads
//! - `AuthChange`, the typed change notification every store publishes
//! - `SessionStore`, the contract implemented by the HTTP and in-memory backends
//! - JWT helpers used to recover expiry when the provider omits it
//!
//! # Example
//!
//! ```rust
//! use backend_client::session::{Identity, Session};
//! use chrono::{Duration, Utc};
//!
//! let session = Session {
//!     identity: Identity::new("2b1f", Some("a@x.com".to_string())),
//!     access_token: "access".to_string(),
//!     refresh_token: "refresh".to_string(),
//!     expires_at: Some(Utc::now() + Duration::hours(1)),
//! };
//! assert!(!session.is_expired());
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::dangerous::insecure_decode;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::Result;

/// Authenticated-user handle
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    /// Unique account id assigned by the provider
    pub id: String,

    /// Email the account signed up with
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl Identity {
    /// Create a new identity
    pub fn new(id: impl Into<String>, email: Option<String>) -> Self {
        Self { id: id.into(), email }
    }
}

/// A live authentication credential backing an [`Identity`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// The signed-in account
    pub identity: Identity,

    /// Access token sent as the bearer on authenticated requests
    pub access_token: String,

    /// Token used to obtain a new access token
    pub refresh_token: String,

    /// When the access token stops being accepted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Expiry from the provider, or from the access token's `exp` claim
    pub fn expiry(&self) -> Option<DateTime<Utc>> {
        self.expires_at.or_else(|| get_jwt_expiration(&self.access_token))
    }

    /// Whether the access token is past its expiry
    ///
    /// A session whose expiry cannot be determined counts as expired.
    pub fn is_expired(&self) -> bool {
        self.is_expiring_within(Duration::zero())
    }

    /// Whether the access token expires within `threshold`
    pub fn is_expiring_within(&self, threshold: Duration) -> bool {
        match self.expiry() {
            Some(expiry) => expiry <= Utc::now() + threshold,
            None => true,
        }
    }

    /// Whether a refresh can be attempted
    pub fn can_refresh(&self) -> bool {
        !self.refresh_token.is_empty()
    }
}

/// Kind of session transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthEvent {
    /// A session was created (sign-in, or sign-up with auto-confirm)
    SignedIn,
    /// The session was destroyed
    SignedOut,
    /// The access token was replaced by a refresh
    TokenRefreshed,
}

/// Change notification published after a transition is durable
#[derive(Debug, Clone, PartialEq)]
pub struct AuthChange {
    /// What happened
    pub event: AuthEvent,
    /// The session after the transition
    pub session: Option<Session>,
}

/// Profile fields attached to a new account at sign-up
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignUpMetadata {
    /// Display name
    pub name: String,
    /// Phone number
    pub phone: String,
    /// Requested role ("commuter" or "driver")
    pub role: String,
}

/// Result of creating a credential
#[derive(Debug, Clone, PartialEq)]
pub struct SignUpOutcome {
    /// The new account, when the provider returned one
    pub identity: Option<Identity>,
    /// A session, when the provider signed the account in immediately
    pub session: Option<Session>,
}

/// Contract of the provider's authentication primitive
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Current session, restoring or refreshing it if needed
    async fn get_session(&self) -> Result<Option<Session>>;

    /// Receive every subsequent [`AuthChange`] in emission order
    fn subscribe(&self) -> broadcast::Receiver<AuthChange>;

    /// Verify credentials and open a session
    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session>;

    /// Create a credential
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: &SignUpMetadata,
    ) -> Result<SignUpOutcome>;

    /// Invalidate the current session
    async fn sign_out(&self) -> Result<()>;
}

/// JWT claims we care about
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtClaims {
    /// Subject (account id)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,

    /// Expiration timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,

    /// Email claim
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Parse JWT claims without validating the signature
///
/// Only for reading informational claims such as `exp`; the provider is the
/// authority on whether a token is valid.
pub fn parse_jwt_claims(token: &str) -> std::result::Result<JwtClaims, jsonwebtoken::errors::Error> {
    Ok(insecure_decode::<JwtClaims>(token)?.claims)
}

/// Expiration time of a JWT, if it has one and parses
pub fn get_jwt_expiration(token: &str) -> Option<DateTime<Utc>> {
    let claims = parse_jwt_claims(token).ok()?;
    claims.exp.and_then(|exp| DateTime::from_timestamp(exp, 0))
}
