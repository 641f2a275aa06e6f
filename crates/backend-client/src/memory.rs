//! In-process backend
//!
//! [`InMemoryBackend`] implements the same contracts as [`crate::HttpBackend`]
//! with plain maps behind a mutex. It backs the offline mode and every test
//! of the auth core, so it carries switches for injecting the provider
//! failures the core has to survive.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::profiles::{NewProfile, ProfileRow, ProfileStore};
use crate::session::{
    AuthChange, AuthEvent, Identity, Session, SessionStore, SignUpMetadata, SignUpOutcome,
};
use crate::{Error, Result};

const EVENT_CAPACITY: usize = 64;
const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Clone)]
struct Account {
    identity: Identity,
    password: String,
}

#[derive(Debug, Default, Clone, Copy)]
struct Failures {
    sign_out: bool,
    profile_insert: bool,
    profile_lookup: bool,
    session_restore: bool,
}

#[derive(Debug)]
struct Inner {
    accounts: HashMap<String, Account>,
    profiles: HashMap<String, ProfileRow>,
    session: Option<Session>,
    failures: Failures,
    auto_confirm: bool,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            accounts: HashMap::new(),
            profiles: HashMap::new(),
            session: None,
            failures: Failures::default(),
            auto_confirm: true,
        }
    }
}

/// Session store and profile table held in memory
pub struct InMemoryBackend {
    inner: Mutex<Inner>,
    events: broadcast::Sender<AuthChange>,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBackend {
    /// Create an empty backend with auto-confirm on
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self { inner: Mutex::new(Inner::default()), events }
    }

    /// Create an account directly, without a session or profile row
    pub fn register_account(&self, email: &str, password: &str) -> Identity {
        let identity = Identity::new(Uuid::new_v4().to_string(), Some(email.to_string()));
        self.inner.lock().accounts.insert(
            email.to_string(),
            Account { identity: identity.clone(), password: password.to_string() },
        );
        identity
    }

    /// Write a profile row directly; `role` may be anything, including null
    pub fn insert_profile_row(&self, id: &str, role: Option<&str>) {
        self.inner
            .lock()
            .profiles
            .insert(id.to_string(), ProfileRow { role: role.map(str::to_string) });
    }

    /// The stored profile row for `id`
    pub fn profile(&self, id: &str) -> Option<ProfileRow> {
        self.inner.lock().profiles.get(id).cloned()
    }

    /// Pretend a session for `email` was persisted by a previous run
    ///
    /// No event is emitted; the next `get_session` returns it.
    pub fn restore_session_for(&self, email: &str) -> Option<Session> {
        let mut inner = self.inner.lock();
        let identity = inner.accounts.get(email)?.identity.clone();
        let session = issue_session(identity);
        inner.session = Some(session.clone());
        Some(session)
    }

    /// Whether sign-up returns a session immediately
    pub fn set_auto_confirm(&self, enabled: bool) {
        self.inner.lock().auto_confirm = enabled;
    }

    /// Make `sign_out` fail with a provider error
    pub fn set_fail_sign_out(&self, fail: bool) {
        self.inner.lock().failures.sign_out = fail;
    }

    /// Make profile inserts fail with a provider error
    pub fn set_fail_profile_insert(&self, fail: bool) {
        self.inner.lock().failures.profile_insert = fail;
    }

    /// Make profile lookups fail with a provider error
    pub fn set_fail_profile_lookup(&self, fail: bool) {
        self.inner.lock().failures.profile_lookup = fail;
    }

    /// Make `get_session` fail with a provider error
    pub fn set_fail_session_restore(&self, fail: bool) {
        self.inner.lock().failures.session_restore = fail;
    }

    /// Replace the session, then notify subscribers
    fn store_session(&self, session: Option<Session>, event: AuthEvent) {
        self.inner.lock().session = session.clone();
        let _ = self.events.send(AuthChange { event, session });
    }
}

fn issue_session(identity: Identity) -> Session {
    Session {
        identity,
        access_token: Uuid::new_v4().simple().to_string(),
        refresh_token: Uuid::new_v4().simple().to_string(),
        expires_at: Some(Utc::now() + Duration::hours(1)),
    }
}

fn unavailable(what: &str) -> Error {
    Error::Api { status: 503, code: None, message: format!("{what} unavailable") }
}

#[async_trait]
impl SessionStore for InMemoryBackend {
    async fn get_session(&self) -> Result<Option<Session>> {
        let inner = self.inner.lock();
        if inner.failures.session_restore {
            return Err(unavailable("session storage"));
        }
        Ok(inner.session.clone())
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthChange> {
        self.events.subscribe()
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session> {
        let identity = {
            let inner = self.inner.lock();
            match inner.accounts.get(email) {
                Some(account) if account.password == password => account.identity.clone(),
                _ => return Err(Error::Auth("Invalid login credentials".to_string())),
            }
        };

        let session = issue_session(identity);
        debug!(user_id = %session.identity.id, "in-memory sign-in");
        self.store_session(Some(session.clone()), AuthEvent::SignedIn);
        Ok(session)
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        _metadata: &SignUpMetadata,
    ) -> Result<SignUpOutcome> {
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(Error::Auth(format!(
                "Password should be at least {MIN_PASSWORD_LEN} characters"
            )));
        }

        let auto_confirm = {
            let inner = self.inner.lock();
            if inner.accounts.contains_key(email) {
                return Err(Error::Auth("User already registered".to_string()));
            }
            inner.auto_confirm
        };

        let identity = self.register_account(email, password);
        if !auto_confirm {
            return Ok(SignUpOutcome { identity: Some(identity), session: None });
        }

        let session = issue_session(identity.clone());
        self.store_session(Some(session.clone()), AuthEvent::SignedIn);
        Ok(SignUpOutcome { identity: Some(identity), session: Some(session) })
    }

    async fn sign_out(&self) -> Result<()> {
        if self.inner.lock().failures.sign_out {
            return Err(unavailable("sign-out"));
        }
        self.store_session(None, AuthEvent::SignedOut);
        Ok(())
    }
}

#[async_trait]
impl ProfileStore for InMemoryBackend {
    async fn select_one(&self, id: &str) -> Result<ProfileRow> {
        let inner = self.inner.lock();
        if inner.failures.profile_lookup {
            return Err(unavailable("profile table"));
        }
        inner.profiles.get(id).cloned().ok_or_else(|| Error::NotFound(id.to_string()))
    }

    async fn insert_one(&self, record: &NewProfile) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.failures.profile_insert {
            return Err(unavailable("profile table"));
        }
        if inner.profiles.contains_key(&record.id) {
            return Err(Error::Api {
                status: 409,
                code: Some("23505".to_string()),
                message: "duplicate key value violates unique constraint".to_string(),
            });
        }
        inner.profiles.insert(record.id.clone(), ProfileRow { role: Some(record.role.clone()) });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata() -> SignUpMetadata {
        SignUpMetadata { name: "Ann".into(), phone: "0700".into(), role: "driver".into() }
    }

    #[tokio::test]
    async fn test_sign_in_emits_signed_in() {
        let backend = InMemoryBackend::new();
        let identity = backend.register_account("a@x.com", "secret1");
        let mut events = backend.subscribe();

        let session = backend.sign_in_with_password("a@x.com", "secret1").await.unwrap();
        assert_eq!(session.identity, identity);

        let change = events.recv().await.unwrap();
        assert_eq!(change.event, AuthEvent::SignedIn);
        assert_eq!(change.session.unwrap().identity, identity);
        assert_eq!(backend.get_session().await.unwrap().unwrap().identity, identity);
    }

    #[tokio::test]
    async fn test_wrong_password_rejected() {
        let backend = InMemoryBackend::new();
        backend.register_account("a@x.com", "secret1");

        let err = backend.sign_in_with_password("a@x.com", "nope").await.unwrap_err();
        assert_eq!(err.provider_message(), "Invalid login credentials");
        assert!(backend.get_session().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sign_up_rules() {
        let backend = InMemoryBackend::new();

        let err = backend.sign_up("a@x.com", "123", &metadata()).await.unwrap_err();
        assert!(err.provider_message().contains("at least 6"));

        let outcome = backend.sign_up("a@x.com", "secret1", &metadata()).await.unwrap();
        assert!(outcome.session.is_some());

        let err = backend.sign_up("a@x.com", "secret1", &metadata()).await.unwrap_err();
        assert_eq!(err.provider_message(), "User already registered");
    }

    #[tokio::test]
    async fn test_sign_up_without_auto_confirm() {
        let backend = InMemoryBackend::new();
        backend.set_auto_confirm(false);

        let outcome = backend.sign_up("a@x.com", "secret1", &metadata()).await.unwrap();
        assert!(outcome.identity.is_some());
        assert!(outcome.session.is_none());
        assert!(backend.get_session().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_profile_insert_and_duplicate() {
        let backend = InMemoryBackend::new();
        let row = NewProfile {
            id: "u1".into(),
            name: "Ann".into(),
            email: "a@x.com".into(),
            phone: "0700".into(),
            role: "driver".into(),
        };

        backend.insert_one(&row).await.unwrap();
        assert_eq!(backend.select_one("u1").await.unwrap().role.as_deref(), Some("driver"));
        assert!(backend.insert_one(&row).await.unwrap_err().is_duplicate());
        assert!(matches!(backend.select_one("u2").await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_failure_switches() {
        let backend = InMemoryBackend::new();
        backend.insert_profile_row("u1", Some("admin"));

        backend.set_fail_profile_lookup(true);
        assert!(backend.select_one("u1").await.is_err());
        backend.set_fail_profile_lookup(false);
        assert!(backend.select_one("u1").await.is_ok());

        backend.set_fail_session_restore(true);
        assert!(backend.get_session().await.is_err());

        backend.set_fail_sign_out(true);
        assert!(backend.sign_out().await.is_err());
    }

    #[tokio::test]
    async fn test_restore_session_is_silent() {
        let backend = InMemoryBackend::new();
        let identity = backend.register_account("a@x.com", "secret1");
        let mut events = backend.subscribe();

        let restored = backend.restore_session_for("a@x.com").unwrap();
        assert_eq!(restored.identity, identity);
        assert!(events.try_recv().is_err());
        assert!(backend.restore_session_for("nobody@x.com").is_none());
    }
}
