use chrono::{DateTime, Utc};
use rolodex_core::{Error, Person, Result, Session, User};
use std::time::Duration;

use crate::credential::CredentialHasher;

/// Everything the service needs from storage.
///
/// Implementations must be interchangeable: [`crate::SqliteDatabase`] and
/// [`crate::MemoryDatabase`] return the same values and the same error kinds
/// for the same sequence of calls.
///
/// Versioning: inserting a record stores `version + 1` of what the caller
/// passed in. Updates apply only when the submitted version equals the stored
/// one and bump it by exactly one; a stale version or an unknown id yields
/// `Error::Conflict`. Deletes yield `Error::NotFound` when nothing was removed.
pub trait Database: Send + Sync {
    /// Release the backend. Later calls fail with `StorageUnavailable`.
    fn close(&self) -> Result<()>;

    fn hasher(&self) -> &CredentialHasher;

    fn insert_person(&self, person: Person) -> Result<Person>;
    fn find_person(&self, id: i64) -> Result<Person>;
    /// All people, by ascending id.
    fn list_people(&self) -> Result<Vec<Person>>;
    fn update_person(&self, person: Person) -> Result<Person>;
    fn delete_person(&self, id: i64) -> Result<()>;
    /// Case-insensitive substring search on the name, by ascending id.
    fn fuzzy_find_people(&self, query: &str) -> Result<Vec<Person>>;

    /// Hashes `user.password` if set. Duplicate logins are a `Conflict`.
    fn insert_user(&self, user: User) -> Result<User>;
    fn find_user(&self, id: i64) -> Result<User>;
    fn find_user_by_login(&self, login: &str) -> Result<User>;
    /// All users, by ascending id.
    fn list_users(&self) -> Result<Vec<User>>;
    fn update_user(&self, user: User) -> Result<User>;
    fn delete_user(&self, id: i64) -> Result<()>;

    fn issue_session(&self, login: &str, ttl: Duration) -> Result<Session>;
    fn find_session(&self, token: &str) -> Result<Session>;
    fn invalidate(&self, session: &Session) -> Result<()>;
    /// Remove every session with `valid_until < now`; returns how many went away.
    fn expire_sessions(&self, now: DateTime<Utc>) -> Result<usize>;
}

/// Shared pre-write step for users: hash a pending password, then validate.
pub(crate) fn prepare_user(hasher: &CredentialHasher, user: &mut User) -> Result<()> {
    hasher.apply_pending_password(user)?;
    user.validate()
}

/// A delete must remove exactly one record.
pub(crate) fn expect_one_removed(removed: usize, what: &str) -> Result<()> {
    match removed {
        0 => Err(Error::NotFound(format!("{} not found", what))),
        1 => Ok(()),
        n => Err(Error::Conflict(format!("deleting {} removed {} records", what, n))),
    }
}

/// The version a write stores after `version`. Saturated counters are refused
/// rather than wrapped.
pub(crate) fn next_version(what: &str, version: i64) -> Result<i64> {
    version
        .checked_add(1)
        .ok_or_else(|| Error::Validation(format!("{} version {} cannot be incremented", what, version)))
}

pub(crate) fn stale_version(what: &str, version: i64) -> Error {
    Error::Conflict(format!(
        "{} was changed by someone else or no longer exists (submitted version {})",
        what, version
    ))
}
