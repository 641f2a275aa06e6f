//! Backend connection configuration

use std::path::PathBuf;
use std::time::Duration;

use crate::{Error, Result};

/// Environment variable holding the backend base URL
pub const ENV_BACKEND_URL: &str = "NIKWELA_BACKEND_URL";
/// Environment variable holding the public (anon) API key
pub const ENV_ANON_KEY: &str = "NIKWELA_ANON_KEY";
/// Environment variable overriding the profile table name
pub const ENV_PROFILES_TABLE: &str = "NIKWELA_PROFILES_TABLE";

/// Configuration for the hosted backend
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Base URL of the project (e.g. "https://xyz.supabase.co")
    pub url: String,
    /// Public API key sent as `apikey` on every request
    pub anon_key: String,
    /// Table holding one profile row per account
    pub profiles_table: String,
    /// Request timeout
    pub timeout: Duration,
    /// User agent string
    pub user_agent: String,
    /// Where to persist the session between runs (None keeps it in memory)
    pub session_path: Option<PathBuf>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:54321".to_string(),
            anon_key: String::new(),
            profiles_table: "users".to_string(),
            timeout: Duration::from_secs(30),
            user_agent: format!("Nikwela/{}", env!("CARGO_PKG_VERSION")),
            session_path: None,
        }
    }
}

impl BackendConfig {
    /// Create a config for a project URL and anon key
    pub fn new(url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        Self {
            url: url.into().trim_end_matches('/').to_string(),
            anon_key: anon_key.into(),
            ..Default::default()
        }
    }

    /// Read the configuration from `NIKWELA_*` environment variables
    pub fn from_env() -> Result<Self> {
        let url = std::env::var(ENV_BACKEND_URL)
            .map_err(|_| Error::Config(format!("{ENV_BACKEND_URL} is not set")))?;
        let anon_key = std::env::var(ENV_ANON_KEY)
            .map_err(|_| Error::Config(format!("{ENV_ANON_KEY} is not set")))?;

        let mut config = Self::new(url, anon_key);
        if let Ok(table) = std::env::var(ENV_PROFILES_TABLE) {
            config = config.profiles_table(table);
        }
        config.validate()?;
        Ok(config)
    }

    /// Set the profile table name
    pub fn profiles_table(mut self, table: impl Into<String>) -> Self {
        self.profiles_table = table.into();
        self
    }

    /// Set the request timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Persist the session to `path`
    pub fn session_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.session_path = Some(path.into());
        self
    }

    /// Reject configurations that cannot possibly reach a backend
    pub fn validate(&self) -> Result<()> {
        if !(self.url.starts_with("http://") || self.url.starts_with("https://")) {
            return Err(Error::Config(format!("backend URL must be http(s): {}", self.url)));
        }
        if self.anon_key.trim().is_empty() {
            return Err(Error::Config("anon key is empty".to_string()));
        }
        if self.profiles_table.trim().is_empty() {
            return Err(Error::Config("profiles table name is empty".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_trims_trailing_slash() {
        let config = BackendConfig::new("https://demo.supabase.co/", "key");
        assert_eq!(config.url, "https://demo.supabase.co");
        assert_eq!(config.profiles_table, "users");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(BackendConfig::new("ftp://x", "key").validate().is_err());
        assert!(BackendConfig::new("https://x", " ").validate().is_err());
        assert!(BackendConfig::new("https://x", "k").profiles_table("").validate().is_err());
    }

    #[test]
    fn test_builder() {
        let config = BackendConfig::new("https://x", "k")
            .profiles_table("profiles")
            .timeout(Duration::from_secs(5))
            .session_path("/tmp/session.json");
        assert_eq!(config.profiles_table, "profiles");
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.session_path, Some(PathBuf::from("/tmp/session.json")));
    }
}
