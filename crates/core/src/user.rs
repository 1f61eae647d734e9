use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};
use crate::time;

/// A principal that can log in.
///
/// `password` is transient: when set on a write, the store hashes it into
/// `password_hash` and clears it. Neither field is ever serialized.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub login: String,
    #[serde(skip)]
    pub password_hash: String,
    #[serde(default)]
    pub admin: bool,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub changed_at: DateTime<Utc>,
    #[serde(default)]
    pub version: i64,
}

impl User {
    /// New user whose password is hashed when it is written to a store.
    pub fn new(login: impl Into<String>, password: impl Into<String>) -> Self {
        let mut user = Self::with_hash(login, String::new());
        user.password = Some(password.into());
        user
    }

    pub fn with_hash(login: impl Into<String>, hash: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            login: login.into(),
            password_hash: hash.into(),
            admin: false,
            password: None,
            created_at: now,
            changed_at: now,
            version: 0,
        }
    }

    /// The plaintext password to hash, if a non-empty one was supplied.
    pub fn pending_password(&self) -> Option<&str> {
        self.password.as_deref().filter(|p| !p.is_empty())
    }

    pub fn validate(&self) -> Result<()> {
        if self.login.trim().is_empty() {
            return Err(Error::Validation("login must not be empty".to_string()));
        }
        if self.password_hash.is_empty() {
            return Err(Error::Validation("user must have a password hash".to_string()));
        }
        if self.created_at.timestamp() == 0 || self.changed_at.timestamp() == 0 {
            return Err(Error::Validation("invalid timestamps".to_string()));
        }
        time::check_storable("created_at", &self.created_at)?;
        time::check_storable("changed_at", &self.changed_at)?;
        Ok(())
    }
}

impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User")
            .field("id", &self.id)
            .field("login", &self.login)
            .field("admin", &self.admin)
            .field("created_at", &self.created_at)
            .field("changed_at", &self.changed_at)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<User {} ({})>", self.login, self.id)
    }
}
