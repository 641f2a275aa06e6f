//! Redirect contract between the auth core and the navigation layer

/// Path of the authenticated area
pub const AUTHENTICATED_PATH: &str = "/(tabs)";

/// Path of the sign-in screen
pub const SIGN_IN_PATH: &str = "/auth/login";

/// Receives imperative redirects
pub trait Navigator: Send + Sync {
    /// Replace the current route with `path`
    fn replace(&self, path: &str);
}
