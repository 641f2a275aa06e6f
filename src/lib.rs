//! Nikwela application root
//!
//! Builds the session core from configuration: the backend (hosted or in
//! memory), the device cache, the auth context and the navigation layer.
//! The [`App`] owns all of them for the lifetime of the process and tears
//! them down on [`App::shutdown`].

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::path::PathBuf;
use std::sync::Arc;

use app_core::AuthContext;
use app_ui::{AppNavigator, GateView, NavigationGate, Route};
use backend_client::{BackendConfig, HttpBackend, InMemoryBackend, ProfileStore, SessionStore};
use storage::{DeviceStore, KvError, KvStore, LocalCache};
use thiserror::Error;
use tracing::{info, warn};

pub use app_core;
pub use app_state;
pub use app_ui;
pub use backend_client;
pub use storage;

/// Environment variable naming the directory for local state
pub const ENV_DATA_DIR: &str = "NIKWELA_DATA_DIR";

/// Application start-up errors
#[derive(Debug, Error)]
pub enum AppError {
    /// Backend could not be configured
    #[error("Backend error: {0}")]
    Backend(#[from] backend_client::Error),

    /// Device cache could not be opened
    #[error("Storage error: {0}")]
    Storage(#[from] KvError),
}

/// Result type for application start-up
pub type Result<T> = std::result::Result<T, AppError>;

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Hosted backend; `None` runs on the in-memory backend
    pub backend: Option<BackendConfig>,
    /// Directory holding the session file and the device cache
    pub data_dir: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self { backend: None, data_dir: PathBuf::from(".nikwela") }
    }
}

impl AppConfig {
    /// Configuration storing local state under `data_dir`
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self { backend: None, data_dir: data_dir.into() }
    }

    /// Use a hosted backend
    pub fn backend(mut self, config: BackendConfig) -> Self {
        self.backend = Some(config);
        self
    }

    /// Read the configuration from `NIKWELA_*` environment variables
    ///
    /// Without `NIKWELA_BACKEND_URL` the in-memory backend is used.
    pub fn from_env() -> Result<Self> {
        let mut config = match std::env::var(ENV_DATA_DIR) {
            Ok(dir) if !dir.trim().is_empty() => Self::new(dir),
            _ => Self::default(),
        };

        if std::env::var_os(backend_client::config::ENV_BACKEND_URL).is_some() {
            config = config.backend(BackendConfig::from_env()?);
        }
        Ok(config)
    }

    fn session_path(&self) -> PathBuf {
        self.data_dir.join("session.json")
    }

    fn cache_path(&self) -> PathBuf {
        self.data_dir.join("cache")
    }
}

/// The running session core
pub struct App {
    auth: AuthContext,
    navigator: Arc<AppNavigator>,
    gate: NavigationGate,
    kv: Arc<KvStore>,
}

impl App {
    /// Build everything from `config` and restore any existing session
    pub async fn start(config: AppConfig) -> Result<Self> {
        let kv = Arc::new(KvStore::open(config.cache_path())?);

        let app = match &config.backend {
            Some(backend) => {
                let backend = backend.clone().session_path(config.session_path());
                info!(url = %backend.url, table = %backend.profiles_table, "using hosted backend");
                let backend = Arc::new(HttpBackend::new(backend).await?);
                Self::assemble(backend.clone(), backend, kv)
            }
            None => {
                info!("no backend configured, using in-memory backend");
                let backend = Arc::new(InMemoryBackend::new());
                Self::assemble(backend.clone(), backend, kv)
            }
        };

        app.auth.initialize().await;
        Ok(app)
    }

    /// Build the core over explicit collaborators and restore any existing session
    pub async fn with_backend(
        sessions: Arc<dyn SessionStore>,
        profiles: Arc<dyn ProfileStore>,
        kv: Arc<KvStore>,
    ) -> Self {
        let app = Self::assemble(sessions, profiles, kv);
        app.auth.initialize().await;
        app
    }

    fn assemble(
        sessions: Arc<dyn SessionStore>,
        profiles: Arc<dyn ProfileStore>,
        kv: Arc<KvStore>,
    ) -> Self {
        let cache: Arc<dyn LocalCache> = Arc::new(DeviceStore::new(kv.clone()));
        let navigator = Arc::new(AppNavigator::new());
        let auth = AuthContext::new(sessions, profiles, cache, navigator.clone());

        Self { auth, navigator, gate: NavigationGate::new(), kv }
    }

    /// The auth context
    pub fn auth(&self) -> &AuthContext {
        &self.auth
    }

    /// The navigation state receiving redirects
    pub fn navigator(&self) -> &AppNavigator {
        &self.navigator
    }

    /// What the navigation layer renders right now
    pub fn view(&self) -> GateView {
        NavigationGate::view(&self.auth.state())
    }

    /// The screen shown for the navigator's current route, or `None` while blank
    pub fn current_screen(&self) -> Option<Route> {
        let requested = self.navigator.current();
        self.gate.resolve(&self.auth.state(), requested.to_path())
    }

    /// Open the screen at `path` on top of the current one
    ///
    /// Returns the screen actually shown, which the gate may redirect.
    pub fn open(&self, path: &str) -> Option<Route> {
        self.navigator.push(path);
        self.current_screen()
    }

    /// Return to the previous screen; false when already at the root
    pub fn back(&self) -> bool {
        self.navigator.back()
    }

    /// Stop following session changes and flush the device cache
    pub fn shutdown(self) {
        self.auth.shutdown();
        if let Err(e) = self.kv.flush() {
            warn!(error = %e, "failed to flush device cache");
        }
        info!("application shut down");
    }
}
