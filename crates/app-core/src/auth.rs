//! Authentication context for Nikwela
//!
//! [`AuthContext`] is the single source of truth for who is signed in and
//! with what role, and the only entry point that mutates session state. It
//! composes a [`SessionStore`], a [`ProfileResolver`] and a [`Navigator`]:
//!
//! - `initialize` restores any persisted session and starts a listener that
//!   applies every session change the store publishes, in order
//! - `sign_in`, `sign_up` and `sign_out` delegate to the store and fire the
//!   redirects that go with them
//! - role resolution runs off the listener, tagged with the generation of
//!   the identity transition it was requested for
//!
//! The context is cheap to clone; clones share the same state.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use app_state::{AuthState, AuthStateChange, AuthStateStore, Generation, Role};
use backend_client::{Identity, NewProfile, ProfileStore, SessionStore, SignUpMetadata};
use serde::{Deserialize, Serialize};
use storage::kv::LocalCache;
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::navigation::{Navigator, AUTHENTICATED_PATH, SIGN_IN_PATH};
use crate::profiles::ProfileResolver;

/// Kind of an [`AuthError`], for callers that branch on failure type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuthErrorKind {
    /// Credentials rejected or the provider refused the request
    AuthenticationFailed,
    /// The provider could not end the session
    SignOutFailed,
    /// The account exists but its profile row does not yet
    PartialRegistration,
    /// Sign-up details failed validation
    InvalidProfile,
}

/// Authentication error types
///
/// The display form of every variant is suitable for showing verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// Credentials rejected or the provider refused the request
    #[error("{0}")]
    AuthenticationFailed(String),

    /// The provider could not end the session
    #[error("{0}")]
    SignOutFailed(String),

    /// Account created but the profile row could not be saved
    #[error("Your account was created but your profile could not be saved: {message}")]
    PartialRegistration {
        /// Id of the account that was created
        user_id: String,
        /// Provider message for the failed insert
        message: String,
    },

    /// Sign-up details failed validation
    #[error("{0}")]
    InvalidProfile(String),
}

impl AuthError {
    /// The kind of this error
    pub fn kind(&self) -> AuthErrorKind {
        match self {
            AuthError::AuthenticationFailed(_) => AuthErrorKind::AuthenticationFailed,
            AuthError::SignOutFailed(_) => AuthErrorKind::SignOutFailed,
            AuthError::PartialRegistration { .. } => AuthErrorKind::PartialRegistration,
            AuthError::InvalidProfile(_) => AuthErrorKind::InvalidProfile,
        }
    }

    /// Human-readable message
    pub fn message(&self) -> String {
        self.to_string()
    }
}

/// Result type for authentication operations
pub type Result<T> = std::result::Result<T, AuthError>;

/// Validated profile details supplied at sign-up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignUpProfile {
    name: String,
    phone: String,
    role: Role,
}

impl SignUpProfile {
    /// Validate and build sign-up details
    ///
    /// # Errors
    ///
    /// - `AuthError::InvalidProfile` - blank name or phone, or a role other
    ///   than commuter or driver
    pub fn new(name: impl Into<String>, phone: impl Into<String>, role: Role) -> Result<Self> {
        let name = name.into().trim().to_string();
        let phone = phone.into().trim().to_string();

        if name.is_empty() {
            return Err(AuthError::InvalidProfile("Name is required".to_string()));
        }
        if phone.is_empty() {
            return Err(AuthError::InvalidProfile("Phone number is required".to_string()));
        }
        if role == Role::Admin {
            return Err(AuthError::InvalidProfile(
                "Accounts can only register as commuter or driver".to_string(),
            ));
        }

        Ok(Self { name, phone, role })
    }

    /// Display name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Phone number
    pub fn phone(&self) -> &str {
        &self.phone
    }

    /// Requested role
    pub fn role(&self) -> Role {
        self.role
    }

    fn metadata(&self) -> SignUpMetadata {
        SignUpMetadata {
            name: self.name.clone(),
            phone: self.phone.clone(),
            role: self.role.as_str().to_string(),
        }
    }
}

/// Applies identities to the state and resolves their roles
#[derive(Clone)]
struct StateSync {
    state: Arc<AuthStateStore>,
    resolver: ProfileResolver,
    op_lock: Arc<Mutex<()>>,
    /// Accounts left half-registered with a session that could not be closed
    withheld: Arc<parking_lot::Mutex<HashSet<String>>>,
}

impl StateSync {
    fn apply_identity(&self, identity: Option<Identity>) {
        let identity = identity.filter(|i| {
            let withheld = self.withheld.lock().contains(&i.id);
            if withheld {
                debug!(user_id = %i.id, "not applying session of a partial registration");
            }
            !withheld
        });
        let id = identity.as_ref().map(|i| i.id.clone());
        if let (Some(generation), Some(id)) = (self.state.set_identity(identity), id) {
            self.spawn_resolution(generation, id);
        }
    }

    fn spawn_resolution(&self, generation: Generation, id: String) {
        let sync = self.clone();
        tokio::spawn(async move {
            // Let any sign-in/up/out in flight finish first
            drop(sync.op_lock.lock().await);

            if sync.state.generation() != generation {
                debug!(generation = generation.0, "skipping superseded role resolution");
                return;
            }
            let role = sync.resolver.resolve(&id).await;
            sync.state.apply_role(generation, role);
        });
    }

    /// Resolve the role of `identity` inline, superseding any resolution in flight
    async fn resolve_now(&self, identity: Identity) -> Option<Role> {
        let generation = match self.state.set_identity(Some(identity.clone())) {
            Some(generation) => generation,
            None => self.state.begin_refresh()?.0,
        };

        let role = self.resolver.resolve(&identity.id).await;
        self.state.apply_role(generation, role).then_some(role)
    }
}

/// Authentication context
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use app_core::auth::AuthContext;
/// use app_core::navigation::Navigator;
/// use backend_client::InMemoryBackend;
/// use storage::{DeviceStore, KvStore};
///
/// struct Log;
/// impl Navigator for Log {
///     fn replace(&self, path: &str) {
///         println!("-> {path}");
///     }
/// }
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let backend = Arc::new(InMemoryBackend::new());
///     backend.register_account("a@x.com", "secret1");
///     let cache = Arc::new(DeviceStore::new(Arc::new(KvStore::in_memory()?)));
///
///     let auth = AuthContext::new(backend.clone(), backend, cache, Arc::new(Log));
///     auth.initialize().await;
///
///     let identity = auth.sign_in("a@x.com", "secret1").await?;
///     let state = auth.wait_for(|s| !s.loading).await;
///     println!("{} is a {:?}", identity.id, state.role);
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct AuthContext {
    sessions: Arc<dyn SessionStore>,
    navigator: Arc<dyn Navigator>,
    sync: StateSync,
    initialized: Arc<AtomicBool>,
    listener: Arc<parking_lot::Mutex<Option<JoinHandle<()>>>>,
}

impl AuthContext {
    /// Create a context; nothing happens until [`AuthContext::initialize`]
    ///
    /// # Arguments
    ///
    /// * `sessions` - Session store backing sign-in, sign-up and sign-out
    /// * `profiles` - Profile table roles are read from
    /// * `cache` - Device cache receiving the resolved role
    /// * `navigator` - Receiver of redirects
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        profiles: Arc<dyn ProfileStore>,
        cache: Arc<dyn LocalCache>,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        Self {
            sessions,
            navigator,
            sync: StateSync {
                state: Arc::new(AuthStateStore::new()),
                resolver: ProfileResolver::new(profiles, cache),
                op_lock: Arc::new(Mutex::new(())),
                withheld: Arc::new(parking_lot::Mutex::new(HashSet::new())),
            },
            initialized: Arc::new(AtomicBool::new(false)),
            listener: Arc::new(parking_lot::Mutex::new(None)),
        }
    }

    /// Restore any existing session and start following session changes
    ///
    /// A failed restoration is treated as "no session". Calling this more
    /// than once has no effect.
    pub async fn initialize(&self) {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return;
        }

        // Subscribe first so no change between restore and listen is lost
        let mut changes = self.sessions.subscribe();

        let identity = match self.sessions.get_session().await {
            Ok(session) => session.map(|s| s.identity),
            Err(e) => {
                warn!(error = %e, "session restore failed, starting signed out");
                None
            }
        };
        if let Some(identity) = &identity {
            info!(user_id = %identity.id, "restored session");
        }
        self.sync.apply_identity(identity);
        self.sync.state.mark_initialized();

        let sessions = Arc::clone(&self.sessions);
        let sync = self.sync.clone();
        let handle = tokio::spawn(async move {
            loop {
                let received = changes.recv().await;
                // Changes caused by an operation apply once it has finished
                drop(sync.op_lock.lock().await);

                match received {
                    Ok(change) => {
                        debug!(event = ?change.event, "session change");
                        sync.apply_identity(change.session.map(|s| s.identity));
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "session listener lagged, re-reading session");
                        match sessions.get_session().await {
                            Ok(session) => sync.apply_identity(session.map(|s| s.identity)),
                            Err(e) => warn!(error = %e, "failed to re-read session"),
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("session listener stopped");
        });

        *self.listener.lock() = Some(handle);
    }

    /// Sign in with email and password
    ///
    /// On success redirects to the authenticated area. The state follows
    /// through the session listener.
    ///
    /// # Errors
    ///
    /// - `AuthError::AuthenticationFailed` - the provider rejected the credentials
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Identity> {
        let _op = self.sync.op_lock.lock().await;

        let session = self.sessions.sign_in_with_password(email, password).await.map_err(|e| {
            warn!(error = %e, "sign-in rejected");
            AuthError::AuthenticationFailed(e.provider_message())
        })?;

        self.sync.withheld.lock().remove(&session.identity.id);
        info!(user_id = %session.identity.id, "signed in");
        self.navigator.replace(AUTHENTICATED_PATH);
        Ok(session.identity)
    }

    /// Create an account and its profile row
    ///
    /// The profile row is only written once the provider has returned the
    /// new account. If that write fails the row is kept for a retry on the
    /// account's next sign-in and any session opened for the account is
    /// closed again. Should closing it fail, that session is ignored until
    /// the account signs in explicitly.
    ///
    /// # Errors
    ///
    /// - `AuthError::AuthenticationFailed` - the provider refused the sign-up
    /// - `AuthError::PartialRegistration` - the account exists without a profile row
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        profile: SignUpProfile,
    ) -> Result<Identity> {
        let _op = self.sync.op_lock.lock().await;

        let outcome =
            self.sessions.sign_up(email, password, &profile.metadata()).await.map_err(|e| {
                warn!(error = %e, "sign-up rejected");
                AuthError::AuthenticationFailed(e.provider_message())
            })?;

        let Some(identity) = outcome.identity else {
            return Err(AuthError::AuthenticationFailed(
                "Sign-up did not return an account".to_string(),
            ));
        };

        let record = NewProfile {
            id: identity.id.clone(),
            name: profile.name.clone(),
            email: identity.email.clone().unwrap_or_else(|| email.to_string()),
            phone: profile.phone.clone(),
            role: profile.role.as_str().to_string(),
        };

        if let Err(e) = self.sync.resolver.create_profile(&record).await {
            warn!(user_id = %identity.id, error = %e, "profile insert failed after sign-up");

            if let Err(stash) = self.sync.resolver.stash_pending(&record) {
                warn!(user_id = %identity.id, error = %stash, "failed to keep pending profile");
            }
            if outcome.session.is_some() {
                if let Err(e) = self.sessions.sign_out().await {
                    warn!(error = %e, "failed to close session of partial registration");
                    self.sync.withheld.lock().insert(identity.id.clone());
                }
            }

            return Err(AuthError::PartialRegistration {
                user_id: identity.id,
                message: e.provider_message(),
            });
        }

        if outcome.session.is_some() {
            self.sync.resolve_now(identity.clone()).await;
        }

        info!(user_id = %identity.id, role = %profile.role, "account created");
        self.navigator.replace(AUTHENTICATED_PATH);
        Ok(identity)
    }

    /// End the current session
    ///
    /// On success clears the cached role and redirects to sign-in. On
    /// failure nothing local changes.
    ///
    /// # Errors
    ///
    /// - `AuthError::SignOutFailed` - the provider call failed
    pub async fn sign_out(&self) -> Result<()> {
        let _op = self.sync.op_lock.lock().await;

        self.sessions.sign_out().await.map_err(|e| {
            warn!(error = %e, "sign-out failed");
            AuthError::SignOutFailed(e.provider_message())
        })?;

        self.sync.withheld.lock().clear();
        if let Err(e) = self.sync.resolver.clear_cached_role() {
            warn!(error = %e, "failed to clear cached role");
        }

        info!("signed out");
        self.navigator.replace(SIGN_IN_PATH);
        Ok(())
    }

    /// Re-read the role of the signed-in account
    ///
    /// Returns the role applied, or `None` if nobody is signed in or a newer
    /// transition superseded this resolution.
    pub async fn refresh_role(&self) -> Option<Role> {
        let (generation, id) = self.sync.state.begin_refresh()?;
        let role = self.sync.resolver.resolve(&id).await;
        self.sync.state.apply_role(generation, role).then_some(role)
    }

    /// Current state
    pub fn state(&self) -> AuthState {
        self.sync.state.snapshot()
    }

    /// Signed-in account
    pub fn identity(&self) -> Option<Identity> {
        self.state().identity
    }

    /// Role of the signed-in account
    pub fn role(&self) -> Option<Role> {
        self.state().role
    }

    /// Whether the state is still settling
    pub fn loading(&self) -> bool {
        self.state().loading
    }

    /// Role cached on this device by the last resolution
    pub fn cached_role(&self) -> Option<Role> {
        self.sync.resolver.cached_role()
    }

    /// Latest-value channel of the state
    pub fn watch(&self) -> watch::Receiver<AuthState> {
        self.sync.state.watch()
    }

    /// Typed `(previous, current)` change events
    pub fn subscribe(&self) -> broadcast::Receiver<AuthStateChange> {
        self.sync.state.subscribe()
    }

    /// Wait until the state satisfies `predicate`
    pub async fn wait_for<F>(&self, predicate: F) -> AuthState
    where
        F: FnMut(&AuthState) -> bool,
    {
        let mut rx = self.watch();
        let state = match rx.wait_for(predicate).await {
            Ok(state) => state.clone(),
            Err(_) => self.state(),
        };
        state
    }

    /// Stop following session changes
    pub fn shutdown(&self) {
        if let Some(handle) = self.listener.lock().take() {
            handle.abort();
            debug!("auth context shut down");
        }
    }
}
