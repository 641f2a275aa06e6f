//! Observable authentication state
//!
//! [`AuthStateStore`] owns the single [`AuthState`] of an application root.
//! Every transition is published twice: the latest value on a `watch`
//! channel for renderers, and an [`AuthStateChange`] carrying both the
//! previous and the current value on a `broadcast` channel for listeners
//! that care about deltas.
//!
//! Identity transitions bump a [`Generation`]. Role resolutions are tagged
//! with the generation they were requested for and only applied while that
//! generation is still current, so a slow lookup for an old identity cannot
//! overwrite the state of a newer one.

use backend_client::Identity;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tracing::debug;

use crate::role::Role;

const CHANGE_CAPACITY: usize = 32;

/// Who is signed in and with what capabilities
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthState {
    /// Signed-in account, if any
    pub identity: Option<Identity>,
    /// Resolved role of the signed-in account
    pub role: Option<Role>,
    /// True until the first session check completes, and while a role is
    /// being resolved for a present identity
    pub loading: bool,
}

impl Default for AuthState {
    fn default() -> Self {
        Self { identity: None, role: None, loading: true }
    }
}

impl AuthState {
    /// Signed in with a resolved role
    pub fn is_authenticated(&self) -> bool {
        !self.loading && self.identity.is_some() && self.role.is_some()
    }

    /// Settled with nobody signed in
    pub fn is_signed_out(&self) -> bool {
        !self.loading && self.identity.is_none()
    }
}

/// A state transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthStateChange {
    /// State before the transition
    pub previous: AuthState,
    /// State after the transition
    pub current: AuthState,
}

/// Identity-transition counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(pub u64);

#[derive(Debug, Default)]
struct Inner {
    state: AuthState,
    generation: u64,
    initialized: bool,
}

impl Inner {
    fn next(&self, identity: Option<Identity>, role: Option<Role>) -> AuthState {
        let loading = !self.initialized || (identity.is_some() && role.is_none());
        AuthState { identity, role, loading }
    }
}

/// Owner of the application's [`AuthState`]
pub struct AuthStateStore {
    inner: Mutex<Inner>,
    watch_tx: watch::Sender<AuthState>,
    changes_tx: broadcast::Sender<AuthStateChange>,
}

impl Default for AuthStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthStateStore {
    /// Create a store in the initial loading state
    pub fn new() -> Self {
        let (watch_tx, _) = watch::channel(AuthState::default());
        let (changes_tx, _) = broadcast::channel(CHANGE_CAPACITY);
        Self { inner: Mutex::new(Inner::default()), watch_tx, changes_tx }
    }

    /// Current state
    pub fn snapshot(&self) -> AuthState {
        self.inner.lock().state.clone()
    }

    /// Current generation
    pub fn generation(&self) -> Generation {
        Generation(self.inner.lock().generation)
    }

    /// Latest-value channel
    pub fn watch(&self) -> watch::Receiver<AuthState> {
        self.watch_tx.subscribe()
    }

    /// Every subsequent transition, in order
    pub fn subscribe(&self) -> broadcast::Receiver<AuthStateChange> {
        self.changes_tx.subscribe()
    }

    /// Apply the identity reported by the session store
    ///
    /// Returns the generation a role must be resolved for, or `None` when no
    /// resolution is needed (signed out, or the same identity with a role
    /// already resolved, as after a token refresh).
    pub fn set_identity(&self, identity: Option<Identity>) -> Option<Generation> {
        let mut inner = self.inner.lock();

        let same = inner.state.identity == identity;
        if same && (identity.is_none() || inner.state.role.is_some()) {
            return None;
        }

        inner.generation += 1;
        let generation = Generation(inner.generation);
        let needs_role = identity.is_some();
        let next = inner.next(identity, None);
        self.commit(&mut inner, next);

        debug!(generation = generation.0, "identity changed");
        needs_role.then_some(generation)
    }

    /// Record that the first session check has completed
    pub fn mark_initialized(&self) {
        let mut inner = self.inner.lock();
        if inner.initialized {
            return;
        }
        inner.initialized = true;
        let next = inner.next(inner.state.identity.clone(), inner.state.role);
        self.commit(&mut inner, next);
    }

    /// Apply a resolved role if `generation` is still current
    ///
    /// Returns whether the role was applied.
    pub fn apply_role(&self, generation: Generation, role: Role) -> bool {
        let mut inner = self.inner.lock();
        if generation.0 != inner.generation || inner.state.identity.is_none() {
            debug!(
                stale = generation.0,
                current = inner.generation,
                "discarding stale role resolution"
            );
            return false;
        }

        let next = inner.next(inner.state.identity.clone(), Some(role));
        self.commit(&mut inner, next);
        true
    }

    /// Start a fresh resolution for the current identity
    ///
    /// The current role stays visible until the new one lands; any resolution
    /// already in flight is superseded.
    pub fn begin_refresh(&self) -> Option<(Generation, String)> {
        let mut inner = self.inner.lock();
        let id = inner.state.identity.as_ref()?.id.clone();
        inner.generation += 1;
        Some((Generation(inner.generation), id))
    }

    fn commit(&self, inner: &mut Inner, next: AuthState) {
        if inner.state == next {
            return;
        }
        let previous = std::mem::replace(&mut inner.state, next);
        let current = inner.state.clone();

        self.watch_tx.send_replace(current.clone());
        // No subscribers is fine
        let _ = self.changes_tx.send(AuthStateChange { previous, current });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ann() -> Identity {
        Identity::new("u1", Some("a@x.com".to_string()))
    }

    fn bob() -> Identity {
        Identity::new("u2", Some("b@x.com".to_string()))
    }

    #[test]
    fn test_initial_state_is_loading() {
        let store = AuthStateStore::new();
        assert_eq!(store.snapshot(), AuthState::default());
        assert!(store.snapshot().loading);
    }

    #[test]
    fn test_initialized_without_session() {
        let store = AuthStateStore::new();
        assert_eq!(store.set_identity(None), None);
        store.mark_initialized();

        let state = store.snapshot();
        assert!(state.is_signed_out());
        assert!(!state.loading);
    }

    #[test]
    fn test_loading_covers_role_resolution() {
        let store = AuthStateStore::new();
        store.mark_initialized();

        let generation = store.set_identity(Some(ann())).unwrap();
        assert!(store.snapshot().loading);
        assert_eq!(store.snapshot().role, None);

        assert!(store.apply_role(generation, Role::Driver));
        let state = store.snapshot();
        assert!(!state.loading);
        assert_eq!(state.role, Some(Role::Driver));
        assert!(state.is_authenticated());
    }

    #[test]
    fn test_stale_generation_is_discarded() {
        let store = AuthStateStore::new();
        store.mark_initialized();

        let old = store.set_identity(Some(ann())).unwrap();
        let new = store.set_identity(Some(bob())).unwrap();
        assert!(new > old);

        assert!(!store.apply_role(old, Role::Admin));
        assert_eq!(store.snapshot().role, None);

        assert!(store.apply_role(new, Role::Commuter));
        let state = store.snapshot();
        assert_eq!(state.identity, Some(bob()));
        assert_eq!(state.role, Some(Role::Commuter));
    }

    #[test]
    fn test_sign_out_invalidates_in_flight_resolution() {
        let store = AuthStateStore::new();
        store.mark_initialized();

        let generation = store.set_identity(Some(ann())).unwrap();
        assert_eq!(store.set_identity(None), None);
        assert!(!store.apply_role(generation, Role::Driver));
        assert!(store.snapshot().is_signed_out());
    }

    #[test]
    fn test_same_identity_with_role_needs_no_resolution() {
        let store = AuthStateStore::new();
        store.mark_initialized();

        let generation = store.set_identity(Some(ann())).unwrap();
        store.apply_role(generation, Role::Driver);

        assert_eq!(store.set_identity(Some(ann())), None);
        assert_eq!(store.generation(), generation);
        assert_eq!(store.snapshot().role, Some(Role::Driver));
    }

    #[test]
    fn test_begin_refresh_keeps_role_visible() {
        let store = AuthStateStore::new();
        store.mark_initialized();
        assert!(store.begin_refresh().is_none());

        let first = store.set_identity(Some(ann())).unwrap();
        store.apply_role(first, Role::Commuter);

        let (second, id) = store.begin_refresh().unwrap();
        assert_eq!(id, "u1");
        assert!(!store.apply_role(first, Role::Admin));
        assert_eq!(store.snapshot().role, Some(Role::Commuter));
        assert!(!store.snapshot().loading);

        assert!(store.apply_role(second, Role::Driver));
        assert_eq!(store.snapshot().role, Some(Role::Driver));
    }

    #[tokio::test]
    async fn test_changes_carry_previous_and_current() {
        let store = AuthStateStore::new();
        let mut changes = store.subscribe();

        store.mark_initialized();
        let change = changes.recv().await.unwrap();
        assert!(change.previous.loading);
        assert!(!change.current.loading);

        let generation = store.set_identity(Some(ann())).unwrap();
        let change = changes.recv().await.unwrap();
        assert_eq!(change.previous.identity, None);
        assert_eq!(change.current.identity, Some(ann()));
        assert!(change.current.loading);

        store.apply_role(generation, Role::Admin);
        let change = changes.recv().await.unwrap();
        assert_eq!(change.previous.role, None);
        assert_eq!(change.current.role, Some(Role::Admin));
    }

    #[tokio::test]
    async fn test_no_event_without_change() {
        let store = AuthStateStore::new();
        store.mark_initialized();
        let mut changes = store.subscribe();

        store.mark_initialized();
        store.set_identity(None);
        assert!(changes.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_watch_sees_latest() {
        let store = AuthStateStore::new();
        let mut rx = store.watch();
        assert!(rx.borrow().loading);

        store.mark_initialized();
        rx.changed().await.unwrap();
        assert!(rx.borrow().is_signed_out());
    }
}
