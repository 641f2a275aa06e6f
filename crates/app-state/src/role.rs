//! Access-level roles

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Access level gating navigation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Rider looking up and booking routes
    #[default]
    Commuter,
    /// Vehicle operator
    Driver,
    /// Operator with both rider and driver capabilities plus administration
    Admin,
}

impl Role {
    /// All roles
    pub const ALL: [Role; 3] = [Role::Commuter, Role::Driver, Role::Admin];

    /// Wire name stored in the profile table and the local cache
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Commuter => "commuter",
            Role::Driver => "driver",
            Role::Admin => "admin",
        }
    }

    /// Parse a role column value, falling back to [`Role::Commuter`]
    ///
    /// Empty, null and unrecognized values all map to the default so callers
    /// never end up without a role.
    pub fn from_column(value: Option<&str>) -> Self {
        value.and_then(|v| v.parse().ok()).unwrap_or_default()
    }

    /// Whether the rider-facing tabs are available
    pub fn is_rider(&self) -> bool {
        matches!(self, Role::Commuter | Role::Admin)
    }

    /// Whether the driver-facing tabs are available
    pub fn is_driver(&self) -> bool {
        matches!(self, Role::Driver | Role::Admin)
    }

    /// Whether the administration tab is available
    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string is not a role name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown role: {0:?}")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "commuter" => Ok(Role::Commuter),
            "driver" => Ok(Role::Driver),
            "admin" => Ok(Role::Admin),
            _ => Err(UnknownRole(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!("driver".parse::<Role>().unwrap(), Role::Driver);
        assert_eq!(" Admin ".parse::<Role>().unwrap(), Role::Admin);
        assert!("pilot".parse::<Role>().is_err());
    }

    #[test]
    fn test_from_column_defaults_to_commuter() {
        assert_eq!(Role::from_column(None), Role::Commuter);
        assert_eq!(Role::from_column(Some("")), Role::Commuter);
        assert_eq!(Role::from_column(Some("pilot")), Role::Commuter);
        assert_eq!(Role::from_column(Some("driver")), Role::Driver);
    }

    #[test]
    fn test_capabilities() {
        assert!(Role::Commuter.is_rider() && !Role::Commuter.is_driver());
        assert!(Role::Driver.is_driver() && !Role::Driver.is_rider());
        assert!(Role::Admin.is_rider() && Role::Admin.is_driver() && Role::Admin.is_admin());
    }

    #[test]
    fn test_round_trip_names() {
        for role in Role::ALL {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
            assert_eq!(serde_json::to_string(&role).unwrap(), format!("\"{role}\""));
        }
    }
}
