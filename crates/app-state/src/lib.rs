//! Application state for Nikwela
//!
//! This crate holds the observable authentication state shared by the auth
//! core and the navigation layer, and the role enumeration it is keyed on.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod auth_state;
pub mod role;

pub use auth_state::{AuthState, AuthStateChange, AuthStateStore, Generation};
pub use role::{Role, UnknownRole};
