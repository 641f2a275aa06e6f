//! Profile resolution
//!
//! Maps an identity to its [`Role`] by reading the profile table. Resolution
//! is total: a missing row, an empty or unknown role column, and any lookup
//! failure all resolve to [`Role::Commuter`]. The resolved role is written to
//! the device cache for fast optimistic rendering on the next start.
//!
//! Profile rows that could not be inserted at sign-up are kept in the cache
//! as pending registrations and retried the next time the same identity is
//! resolved.

use std::sync::Arc;

use app_state::Role;
use backend_client::{NewProfile, ProfileStore};
use storage::kv::{KvError, LocalCache};
use tracing::{debug, info, warn};

/// Cache key holding the last resolved role
pub const ROLE_CACHE_KEY: &str = "userRole";

/// Cache key prefix for profile rows awaiting insertion
pub const PENDING_PROFILE_PREFIX: &str = "pendingProfile:";

fn pending_key(identity_id: &str) -> String {
    format!("{PENDING_PROFILE_PREFIX}{identity_id}")
}

/// Resolves identities to roles
#[derive(Clone)]
pub struct ProfileResolver {
    store: Arc<dyn ProfileStore>,
    cache: Arc<dyn LocalCache>,
}

impl ProfileResolver {
    /// Create a resolver over a profile table and a device cache
    pub fn new(store: Arc<dyn ProfileStore>, cache: Arc<dyn LocalCache>) -> Self {
        Self { store, cache }
    }

    /// Resolve the role of `identity_id`
    ///
    /// Never fails. Any pending registration for the identity is retried
    /// first so the row it carries is the one read back.
    pub async fn resolve(&self, identity_id: &str) -> Role {
        self.retry_pending(identity_id).await;

        let role = match self.store.select_one(identity_id).await {
            Ok(row) => Role::from_column(row.role.as_deref()),
            Err(e) => {
                warn!(user_id = %identity_id, error = %e, "profile lookup failed, using default role");
                Role::default()
            }
        };

        if let Err(e) = self.cache.set(ROLE_CACHE_KEY, role.as_str()) {
            warn!(error = %e, "failed to cache role");
        }

        debug!(user_id = %identity_id, role = %role, "role resolved");
        role
    }

    /// Insert a profile row; an existing row for the same id counts as success
    pub async fn create_profile(&self, record: &NewProfile) -> backend_client::Result<()> {
        match self.store.insert_one(record).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_duplicate() => {
                debug!(user_id = %record.id, "profile row already exists");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Keep a profile row for a later insertion attempt
    pub fn stash_pending(&self, record: &NewProfile) -> Result<(), KvError> {
        let json = serde_json::to_string(record)?;
        self.cache.set(&pending_key(&record.id), &json)
    }

    /// The profile row awaiting insertion for `identity_id`, if any
    pub fn pending(&self, identity_id: &str) -> Option<NewProfile> {
        let raw = match self.cache.get(&pending_key(identity_id)) {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(user_id = %identity_id, error = %e, "failed to read pending profile");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(user_id = %identity_id, error = %e, "dropping unreadable pending profile");
                self.drop_pending(identity_id);
                None
            }
        }
    }

    /// Role cached by the last resolution on this device
    pub fn cached_role(&self) -> Option<Role> {
        self.cache.get(ROLE_CACHE_KEY).ok().flatten().and_then(|r| r.parse().ok())
    }

    /// Forget the cached role
    pub fn clear_cached_role(&self) -> Result<usize, KvError> {
        self.cache.remove(&[ROLE_CACHE_KEY])
    }

    async fn retry_pending(&self, identity_id: &str) {
        let Some(record) = self.pending(identity_id) else {
            return;
        };

        match self.create_profile(&record).await {
            Ok(()) => {
                info!(user_id = %identity_id, "pending profile inserted");
                self.drop_pending(identity_id);
            }
            Err(e) => {
                warn!(user_id = %identity_id, error = %e, "pending profile insert failed again");
            }
        }
    }

    fn drop_pending(&self, identity_id: &str) {
        if let Err(e) = self.cache.remove(&[pending_key(identity_id).as_str()]) {
            warn!(user_id = %identity_id, error = %e, "failed to clear pending profile");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use backend_client::{Error, ProfileRow};
    use mockall::mock;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    mock! {
        Profiles {}

        #[async_trait]
        impl ProfileStore for Profiles {
            async fn select_one(&self, id: &str) -> backend_client::Result<ProfileRow>;
            async fn insert_one(&self, record: &NewProfile) -> backend_client::Result<()>;
        }
    }

    #[derive(Default)]
    struct MapCache {
        entries: Mutex<HashMap<String, String>>,
        broken: bool,
    }

    impl LocalCache for MapCache {
        fn set(&self, key: &str, value: &str) -> storage::kv::Result<()> {
            if self.broken {
                return Err(KvError::InvalidKey(key.to_string()));
            }
            self.entries.lock().insert(key.to_string(), value.to_string());
            Ok(())
        }

        fn get(&self, key: &str) -> storage::kv::Result<Option<String>> {
            Ok(self.entries.lock().get(key).cloned())
        }

        fn remove(&self, keys: &[&str]) -> storage::kv::Result<usize> {
            let mut entries = self.entries.lock();
            Ok(keys.iter().filter(|k| entries.remove(**k).is_some()).count())
        }
    }

    fn record(role: &str) -> NewProfile {
        NewProfile {
            id: "u1".into(),
            name: "Ann".into(),
            email: "a@x.com".into(),
            phone: "0700".into(),
            role: role.into(),
        }
    }

    fn resolver(store: MockProfiles) -> (ProfileResolver, Arc<MapCache>) {
        let cache = Arc::new(MapCache::default());
        (ProfileResolver::new(Arc::new(store), cache.clone()), cache)
    }

    #[tokio::test]
    async fn test_resolves_stored_role() {
        let mut store = MockProfiles::new();
        store
            .expect_select_one()
            .times(1)
            .returning(|_| Ok(ProfileRow { role: Some("driver".into()) }));

        let (resolver, cache) = resolver(store);
        assert_eq!(resolver.resolve("u1").await, Role::Driver);
        assert_eq!(cache.get(ROLE_CACHE_KEY).unwrap().as_deref(), Some("driver"));
        assert_eq!(resolver.cached_role(), Some(Role::Driver));
    }

    #[tokio::test]
    async fn test_lookup_error_defaults_to_commuter() {
        let mut store = MockProfiles::new();
        store.expect_select_one().returning(|_| {
            Err(Error::Api { status: 500, code: None, message: "boom".into() })
        });

        let (resolver, cache) = resolver(store);
        assert_eq!(resolver.resolve("u1").await, Role::Commuter);
        assert_eq!(cache.get(ROLE_CACHE_KEY).unwrap().as_deref(), Some("commuter"));
    }

    #[tokio::test]
    async fn test_empty_role_defaults_to_commuter() {
        let mut store = MockProfiles::new();
        store.expect_select_one().returning(|_| Ok(ProfileRow { role: Some(String::new()) }));

        let (resolver, _) = resolver(store);
        assert_eq!(resolver.resolve("u1").await, Role::Commuter);
    }

    #[tokio::test]
    async fn test_missing_row_defaults_to_commuter() {
        let mut store = MockProfiles::new();
        store.expect_select_one().returning(|id| Err(Error::NotFound(id.to_string())));

        let (resolver, _) = resolver(store);
        assert_eq!(resolver.resolve("nobody").await, Role::Commuter);
    }

    #[tokio::test]
    async fn test_cache_failure_does_not_block() {
        let mut store = MockProfiles::new();
        store.expect_select_one().returning(|_| Ok(ProfileRow { role: Some("admin".into()) }));

        let cache = Arc::new(MapCache { broken: true, ..Default::default() });
        let resolver = ProfileResolver::new(Arc::new(store), cache);
        assert_eq!(resolver.resolve("u1").await, Role::Admin);
    }

    #[tokio::test]
    async fn test_duplicate_insert_is_success() {
        let mut store = MockProfiles::new();
        store.expect_insert_one().returning(|_| {
            Err(Error::Api { status: 409, code: Some("23505".into()), message: "dup".into() })
        });

        let (resolver, _) = resolver(store);
        assert!(resolver.create_profile(&record("driver")).await.is_ok());
    }

    #[tokio::test]
    async fn test_pending_profile_is_retried_then_cleared() {
        let mut store = MockProfiles::new();
        store.expect_insert_one().times(1).returning(|_| Ok(()));
        store
            .expect_select_one()
            .returning(|_| Ok(ProfileRow { role: Some("driver".into()) }));

        let (resolver, _) = resolver(store);
        resolver.stash_pending(&record("driver")).unwrap();
        assert_eq!(resolver.pending("u1"), Some(record("driver")));

        assert_eq!(resolver.resolve("u1").await, Role::Driver);
        assert_eq!(resolver.pending("u1"), None);

        // A second resolution must not insert again
        assert_eq!(resolver.resolve("u1").await, Role::Driver);
    }

    #[tokio::test]
    async fn test_pending_profile_kept_when_insert_fails() {
        let mut store = MockProfiles::new();
        store.expect_insert_one().returning(|_| {
            Err(Error::Api { status: 503, code: None, message: "down".into() })
        });
        store.expect_select_one().returning(|id| Err(Error::NotFound(id.to_string())));

        let (resolver, _) = resolver(store);
        resolver.stash_pending(&record("driver")).unwrap();

        assert_eq!(resolver.resolve("u1").await, Role::Commuter);
        assert!(resolver.pending("u1").is_some());
    }

    #[tokio::test]
    async fn test_clear_cached_role() {
        let (resolver, cache) = resolver(MockProfiles::new());
        cache.set(ROLE_CACHE_KEY, "driver").unwrap();

        assert_eq!(resolver.clear_cached_role().unwrap(), 1);
        assert_eq!(resolver.cached_role(), None);
    }
}
