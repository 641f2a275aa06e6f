//! Profile table contract

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

/// The columns of a profile row the auth core reads
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileRow {
    /// Role column; may be null in the table
    #[serde(default)]
    pub role: Option<String>,
}

/// A profile row as inserted at sign-up
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProfile {
    /// Account id (primary key, equal to the identity id)
    pub id: String,
    /// Display name
    pub name: String,
    /// Email the account signed up with
    pub email: String,
    /// Phone number
    pub phone: String,
    /// Role column value
    pub role: String,
}

/// Contract of the profile table
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Fetch the row keyed by `id`; a missing row is [`crate::Error::NotFound`]
    async fn select_one(&self, id: &str) -> Result<ProfileRow>;

    /// Insert a new row; an existing key is a duplicate error
    async fn insert_one(&self, record: &NewProfile) -> Result<()>;
}
