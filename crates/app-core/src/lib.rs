//! Core application logic for Nikwela
//!
//! This crate contains the authentication context, the profile resolver
//! that maps accounts to roles, and the redirect contract the navigation
//! layer implements.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod auth;
pub mod navigation;
pub mod profiles;

pub use auth::{AuthContext, AuthError, AuthErrorKind, SignUpProfile};
pub use navigation::{Navigator, AUTHENTICATED_PATH, SIGN_IN_PATH};
pub use profiles::ProfileResolver;
