//! Navigation gate
//!
//! A pure mapping from [`AuthState`] to what the navigation layer may show:
//! nothing while the state settles, the unauthenticated stack when nobody
//! is signed in, and the authenticated tabs for the signed-in role.

use app_state::{AuthState, Role};
use serde::{Deserialize, Serialize};

use crate::navigation::{NavigationTab, Route, Router};

/// Screens of the unauthenticated stack
pub const SIGNED_OUT_ROUTES: [Route; 2] = [Route::Login, Route::Register];

/// What the navigation layer renders
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "view", rename_all = "snake_case")]
pub enum GateView {
    /// Transitional blank state
    Blank,
    /// Sign-in and registration only
    SignedOut {
        /// Reachable screens
        routes: Vec<Route>,
    },
    /// Authenticated tabs
    SignedIn {
        /// Role the tabs were chosen for
        role: Role,
        /// Visible tabs in display order
        tabs: Vec<NavigationTab>,
    },
}

impl GateView {
    /// Whether nothing is rendered
    pub fn is_blank(&self) -> bool {
        matches!(self, GateView::Blank)
    }

    /// Whether the unauthenticated stack is shown
    pub fn shows_signed_out(&self) -> bool {
        matches!(self, GateView::SignedOut { .. })
    }

    /// Whether the authenticated stack is shown
    pub fn shows_signed_in(&self) -> bool {
        matches!(self, GateView::SignedIn { .. })
    }

    /// Visible tabs (empty unless signed in)
    pub fn tabs(&self) -> &[NavigationTab] {
        match self {
            GateView::SignedIn { tabs, .. } => tabs,
            _ => &[],
        }
    }
}

/// Maps auth state and requested paths to visible navigation
#[derive(Default)]
pub struct NavigationGate {
    router: Router,
}

impl NavigationGate {
    /// Create a gate
    pub fn new() -> Self {
        Self::default()
    }

    /// What to render for `state`
    ///
    /// A present identity whose role is not yet known renders blank, like
    /// any other loading state.
    pub fn view(state: &AuthState) -> GateView {
        if state.loading {
            return GateView::Blank;
        }
        match (&state.identity, state.role) {
            (None, _) => GateView::SignedOut { routes: SIGNED_OUT_ROUTES.to_vec() },
            (Some(_), Some(role)) => GateView::SignedIn { role, tabs: NavigationTab::for_role(role) },
            (Some(_), None) => GateView::Blank,
        }
    }

    /// The screen to show for a requested `path`, or `None` while blank
    ///
    /// Signed out, anything but sign-in and registration lands on sign-in.
    /// Signed in, a path that is unknown, hidden for the role, or part of
    /// the unauthenticated stack lands on the first visible tab.
    pub fn resolve(&self, state: &AuthState, path: &str) -> Option<Route> {
        let requested = self.router.match_path(path);

        match Self::view(state) {
            GateView::Blank => None,
            GateView::SignedOut { routes } => {
                Some(if routes.contains(&requested) { requested } else { Route::Login })
            }
            GateView::SignedIn { tabs, .. } => {
                let visible = requested.tab().is_some_and(|tab| tabs.contains(&tab));
                if visible {
                    Some(requested)
                } else {
                    Some(tabs.first().copied().unwrap_or(NavigationTab::Profile).root_route())
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backend_client::Identity;

    fn state(identity: bool, role: Option<Role>, loading: bool) -> AuthState {
        AuthState {
            identity: identity.then(|| Identity::new("u1", Some("a@x.com".into()))),
            role,
            loading,
        }
    }

    const ROLES: [Option<Role>; 4] =
        [None, Some(Role::Commuter), Some(Role::Driver), Some(Role::Admin)];

    #[test]
    fn test_loading_is_blank_for_any_identity_and_role() {
        for identity in [false, true] {
            for role in ROLES {
                assert!(NavigationGate::view(&state(identity, role, true)).is_blank());
            }
        }
    }

    #[test]
    fn test_signed_out_regardless_of_role() {
        for role in ROLES {
            let view = NavigationGate::view(&state(false, role, false));
            assert!(view.shows_signed_out());
            assert!(!view.shows_signed_in());
            assert!(view.tabs().is_empty());
        }
    }

    #[test]
    fn test_driver_tabs() {
        let view = NavigationGate::view(&state(true, Some(Role::Driver), false));
        let tabs = view.tabs();

        assert!(tabs.contains(&NavigationTab::Drive));
        assert!(tabs.contains(&NavigationTab::Trips));
        assert!(tabs.contains(&NavigationTab::Profile));
        assert!(!tabs.contains(&NavigationTab::Home));
        assert!(!tabs.contains(&NavigationTab::Routes));
        assert!(!tabs.contains(&NavigationTab::Favorites));
        assert!(!tabs.contains(&NavigationTab::Admin));
    }

    #[test]
    fn test_commuter_and_admin_tabs() {
        let commuter = NavigationGate::view(&state(true, Some(Role::Commuter), false));
        assert_eq!(
            commuter.tabs(),
            &[
                NavigationTab::Home,
                NavigationTab::Routes,
                NavigationTab::Favorites,
                NavigationTab::Profile
            ]
        );

        let admin = NavigationGate::view(&state(true, Some(Role::Admin), false));
        assert_eq!(admin.tabs(), &NavigationTab::all());
    }

    #[test]
    fn test_identity_without_role_is_blank() {
        assert!(NavigationGate::view(&state(true, None, false)).is_blank());
    }

    #[test]
    fn test_signed_out_catch_all() {
        let gate = NavigationGate::new();
        let signed_out = state(false, None, false);

        assert_eq!(gate.resolve(&signed_out, "/auth/register"), Some(Route::Register));
        assert_eq!(gate.resolve(&signed_out, "/auth/login"), Some(Route::Login));
        assert_eq!(gate.resolve(&signed_out, "/nope"), Some(Route::Login));
        assert_eq!(gate.resolve(&signed_out, "/(tabs)/admin"), Some(Route::Login));
    }

    #[test]
    fn test_signed_in_catch_all() {
        let gate = NavigationGate::new();
        let driver = state(true, Some(Role::Driver), false);

        assert_eq!(gate.resolve(&driver, "/(tabs)/trips"), Some(Route::Trips));
        assert_eq!(gate.resolve(&driver, "/(tabs)"), Some(Route::Driver));
        assert_eq!(gate.resolve(&driver, "/admin"), Some(Route::Driver));
        assert_eq!(gate.resolve(&driver, "/auth/login"), Some(Route::Driver));
        assert_eq!(gate.resolve(&driver, "/nope"), Some(Route::Driver));

        let commuter = state(true, Some(Role::Commuter), false);
        assert_eq!(gate.resolve(&commuter, "/(tabs)"), Some(Route::Home));
        assert_eq!(gate.resolve(&commuter, "/profile"), Some(Route::Profile));
    }

    #[test]
    fn test_blank_resolves_nothing() {
        let gate = NavigationGate::new();
        assert_eq!(gate.resolve(&AuthState::default(), "/auth/login"), None);
    }

    #[test]
    fn test_view_serialization() {
        let view = NavigationGate::view(&state(true, Some(Role::Driver), false));
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["view"], "signed_in");
        assert_eq!(json["role"], "driver");
        assert_eq!(json["tabs"], serde_json::json!(["drive", "trips", "profile"]));
    }
}
