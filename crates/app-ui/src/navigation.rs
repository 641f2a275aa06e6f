//! Navigation system for Nikwela
//!
//! This module provides:
//! - Route definitions and their paths
//! - Role-dependent navigation tabs
//! - A navigation stack
//! - A router mapping paths (plain or in the `(tabs)` group form) to routes
//! - [`AppNavigator`], the receiver of redirects from the auth core

use app_core::navigation::Navigator;
use app_state::Role;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Name of the route group holding the authenticated tabs
const TAB_GROUP: &str = "(tabs)";

// =============================================================================
// Route Definitions
// =============================================================================

/// All screens reachable by path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    // Rider tabs
    /// Map of nearby stops and vehicles
    #[default]
    Home,
    /// Route list
    Routes,
    /// Saved routes
    Favorites,

    // Driver tabs
    /// Active driving screen
    Driver,
    /// Trip history
    Trips,

    // Admin tab
    /// Administration
    Admin,

    /// Account profile
    Profile,

    // Unauthenticated stack
    /// Sign-in screen
    Login,
    /// Registration screen
    Register,

    /// Unknown path
    NotFound,
}

impl Route {
    /// Get the URL path for this route
    pub fn to_path(&self) -> &'static str {
        match self {
            Route::Home => "/",
            Route::Routes => "/routes",
            Route::Favorites => "/favorites",
            Route::Driver => "/driver",
            Route::Trips => "/trips",
            Route::Admin => "/admin",
            Route::Profile => "/profile",
            Route::Login => "/auth/login",
            Route::Register => "/auth/register",
            Route::NotFound => "/+not-found",
        }
    }

    /// Check if route requires a signed-in account
    pub fn requires_auth(&self) -> bool {
        !matches!(self, Route::Login | Route::Register | Route::NotFound)
    }

    /// Get screen title
    pub fn title(&self) -> &'static str {
        match self {
            Route::Home => "Home",
            Route::Routes => "Routes",
            Route::Favorites => "Favorites",
            Route::Driver => "Drive",
            Route::Trips => "Trips",
            Route::Admin => "Admin",
            Route::Profile => "Profile",
            Route::Login => "Sign In",
            Route::Register => "Create Account",
            Route::NotFound => "Not Found",
        }
    }

    /// The tab this route is the root of
    pub fn tab(&self) -> Option<NavigationTab> {
        NavigationTab::all().into_iter().find(|tab| tab.root_route() == *self)
    }
}

// =============================================================================
// Navigation Tabs
// =============================================================================

/// Tabs of the authenticated area
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NavigationTab {
    /// Home tab
    #[default]
    Home,
    /// Route list tab
    Routes,
    /// Favorites tab
    Favorites,
    /// Driving tab
    Drive,
    /// Trip history tab
    Trips,
    /// Administration tab
    Admin,
    /// Profile tab
    Profile,
}

impl NavigationTab {
    /// Get the root route for this tab
    pub fn root_route(&self) -> Route {
        match self {
            NavigationTab::Home => Route::Home,
            NavigationTab::Routes => Route::Routes,
            NavigationTab::Favorites => Route::Favorites,
            NavigationTab::Drive => Route::Driver,
            NavigationTab::Trips => Route::Trips,
            NavigationTab::Admin => Route::Admin,
            NavigationTab::Profile => Route::Profile,
        }
    }

    /// Get icon name for this tab
    pub fn icon(&self) -> &'static str {
        match self {
            NavigationTab::Home => "home",
            NavigationTab::Routes => "directions-bus",
            NavigationTab::Favorites => "favorite",
            NavigationTab::Drive => "local-taxi",
            NavigationTab::Trips => "history",
            NavigationTab::Admin => "admin-panel-settings",
            NavigationTab::Profile => "person",
        }
    }

    /// Get label for this tab
    pub fn label(&self) -> &'static str {
        self.root_route().title()
    }

    /// Whether `role` sees this tab
    pub fn visible_for(&self, role: Role) -> bool {
        match self {
            NavigationTab::Home | NavigationTab::Routes | NavigationTab::Favorites => {
                role.is_rider()
            }
            NavigationTab::Drive | NavigationTab::Trips => role.is_driver(),
            NavigationTab::Admin => role.is_admin(),
            NavigationTab::Profile => true,
        }
    }

    /// Tabs visible to `role`, in display order
    pub fn for_role(role: Role) -> Vec<NavigationTab> {
        Self::all().into_iter().filter(|tab| tab.visible_for(role)).collect()
    }

    /// Get all tabs in order
    pub fn all() -> [NavigationTab; 7] {
        [
            NavigationTab::Home,
            NavigationTab::Routes,
            NavigationTab::Favorites,
            NavigationTab::Drive,
            NavigationTab::Trips,
            NavigationTab::Admin,
            NavigationTab::Profile,
        ]
    }
}

// =============================================================================
// Navigation Stack
// =============================================================================

/// A navigation stack entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackEntry {
    /// The route
    pub route: Route,
    /// Unique key for this entry
    pub key: String,
}

impl StackEntry {
    /// Create a new stack entry
    pub fn new(route: Route) -> Self {
        Self { route, key: uuid::Uuid::new_v4().to_string() }
    }
}

/// Stack of screens, never empty
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigationStack {
    /// Stack entries above the root (bottom to top)
    entries: Vec<StackEntry>,
    /// Bottom entry
    root: StackEntry,
}

impl NavigationStack {
    /// Create a new navigation stack with a root route
    pub fn new(root: Route) -> Self {
        Self { entries: Vec::new(), root: StackEntry::new(root) }
    }

    /// Push a route onto the stack
    pub fn push(&mut self, route: Route) {
        self.entries.push(StackEntry::new(route));
    }

    /// Pop the top route (returns true if popped, false if at root)
    pub fn pop(&mut self) -> bool {
        self.entries.pop().is_some()
    }

    /// Get the current (top) route
    pub fn current(&self) -> Route {
        self.entries.last().unwrap_or(&self.root).route
    }

    /// Reset to a new root
    pub fn reset(&mut self, route: Route) {
        self.root = StackEntry::new(route);
        self.entries.clear();
    }
}

// =============================================================================
// Router
// =============================================================================

/// Route pattern for matching
struct RoutePattern {
    /// Literal segments
    segments: Vec<String>,
    /// Matched route
    route: Route,
}

/// URL Router for parsing paths to routes
pub struct Router {
    /// Route patterns
    patterns: Vec<RoutePattern>,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    /// Create a new router with all routes
    pub fn new() -> Self {
        let mut router = Self { patterns: Vec::new() };

        for route in [
            Route::Home,
            Route::Routes,
            Route::Favorites,
            Route::Driver,
            Route::Trips,
            Route::Admin,
            Route::Profile,
            Route::Login,
            Route::Register,
        ] {
            router.add_route(route.to_path(), route);
        }
        router.add_route("/index", Route::Home);

        router
    }

    fn add_route(&mut self, pattern: &str, route: Route) {
        let segments = pattern.split('/').filter(|s| !s.is_empty()).map(str::to_string).collect();
        self.patterns.push(RoutePattern { segments, route });
    }

    /// Match a path to a route
    ///
    /// Query strings and trailing slashes are ignored. Tab routes also match
    /// under the `(tabs)` group, and the bare group is the home tab.
    pub fn match_path(&self, path: &str) -> Route {
        let pathname = path.split(['?', '#']).next().unwrap_or_default();

        let mut segments: Vec<&str> = pathname.split('/').filter(|s| !s.is_empty()).collect();
        let in_tab_group = segments.first() == Some(&TAB_GROUP);
        if in_tab_group {
            segments.remove(0);
        }

        let matched = self
            .patterns
            .iter()
            .find(|pattern| pattern.segments.iter().map(String::as_str).eq(segments.iter().copied()))
            .map(|pattern| pattern.route);

        match matched {
            Some(route) if in_tab_group && route.tab().is_none() => Route::NotFound,
            Some(route) => route,
            None => Route::NotFound,
        }
    }
}

// =============================================================================
// Navigator
// =============================================================================

/// Navigation state driven by redirects from the auth core
pub struct AppNavigator {
    router: Router,
    stack: Mutex<NavigationStack>,
}

impl Default for AppNavigator {
    fn default() -> Self {
        Self::new()
    }
}

impl AppNavigator {
    /// Create a navigator showing the sign-in screen
    pub fn new() -> Self {
        Self { router: Router::new(), stack: Mutex::new(NavigationStack::new(Route::Login)) }
    }

    /// The screen currently shown
    pub fn current(&self) -> Route {
        self.stack.lock().current()
    }

    /// Push a screen by path
    pub fn push(&self, path: &str) -> Route {
        let route = self.router.match_path(path);
        self.stack.lock().push(route);
        route
    }

    /// Go back one screen; false when already at the root
    pub fn back(&self) -> bool {
        self.stack.lock().pop()
    }
}

impl Navigator for AppNavigator {
    fn replace(&self, path: &str) {
        let route = self.router.match_path(path);
        debug!(path, ?route, "redirect");
        self.stack.lock().reset(route);
    }
}

// =============================================================================
// Tests
// =============================================================================
