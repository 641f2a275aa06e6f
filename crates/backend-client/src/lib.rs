//! Backend-as-a-service client for Nikwela
//!
//! This crate defines the contracts the auth core consumes from the hosted
//! backend (the session store and the profile table) and provides two
//! implementations of them: [`HttpBackend`], which speaks the hosted
//! service's auth and REST APIs, and [`InMemoryBackend`], a complete
//! in-process stand-in used by tests and the offline mode.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod http;
pub mod memory;
pub mod profiles;
pub mod rest;
pub mod session;

pub use config::BackendConfig;
pub use http::HttpBackend;
pub use memory::InMemoryBackend;
pub use profiles::{NewProfile, ProfileRow, ProfileStore};
pub use session::{
    AuthChange, AuthEvent, Identity, Session, SessionStore, SignUpMetadata, SignUpOutcome,
};

/// Result type for backend operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for backend operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Network error
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The provider rejected the credentials or the request
    #[error("{0}")]
    Auth(String),

    /// API error with status code and message
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Provider error code (e.g. "PGRST116", "23505")
        code: Option<String>,
        /// Error message from server
        message: String,
    },

    /// Requested record does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Session persistence error
    #[error("Session persistence error: {0}")]
    Persistence(#[from] storage::PersistenceError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// The message the provider gave, without any wrapping
    pub fn provider_message(&self) -> String {
        match self {
            Error::Auth(message) | Error::Api { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    /// Whether this is a unique-key conflict on insert
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Error::Api { status: 409, .. })
            || matches!(self, Error::Api { code: Some(code), .. } if code == "23505")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_message_is_unwrapped() {
        let err = Error::Auth("Invalid login credentials".to_string());
        assert_eq!(err.provider_message(), "Invalid login credentials");

        let err = Error::Api { status: 500, code: None, message: "boom".to_string() };
        assert_eq!(err.provider_message(), "boom");
        assert!(err.to_string().contains("500"));
    }

    #[test]
    fn test_duplicate_detection() {
        let conflict = Error::Api { status: 409, code: None, message: "dup".into() };
        assert!(conflict.is_duplicate());

        let pg = Error::Api { status: 400, code: Some("23505".into()), message: "dup".into() };
        assert!(pg.is_duplicate());

        assert!(!Error::NotFound("x".into()).is_duplicate());
    }
}
