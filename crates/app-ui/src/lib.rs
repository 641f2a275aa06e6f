//! User interface for Nikwela
//!
//! This crate provides the navigation layer: the route table, the
//! role-dependent tabs, and the gate deciding which of them are visible
//! for the current authentication state.
//!
//! # Modules
//!
//! - [`navigation`] - Routes, tabs, stack, router and the redirect receiver
//! - [`gate`] - Auth-state to visible-navigation mapping
//!
//! # Example
//!
//! ```rust
//! use app_state::{AuthState, Role};
//! use app_ui::{GateView, NavigationGate, NavigationTab};
//!
//! let state = AuthState { identity: None, role: None, loading: false };
//! assert!(NavigationGate::view(&state).shows_signed_out());
//!
//! assert_eq!(
//!     NavigationTab::for_role(Role::Driver),
//!     vec![NavigationTab::Drive, NavigationTab::Trips, NavigationTab::Profile]
//! );
//! # let _ = GateView::Blank;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod gate;
pub mod navigation;

pub use gate::{GateView, NavigationGate, SIGNED_OUT_ROUTES};
pub use navigation::{AppNavigator, NavigationStack, NavigationTab, Route, Router, StackEntry};
