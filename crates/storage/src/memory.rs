use chrono::{DateTime, Utc};
use rolodex_core::{Error, Person, Result, Session, User};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

use crate::credential::CredentialHasher;
use crate::database::{expect_one_removed, next_version, prepare_user, stale_version, Database};
use crate::session::new_session;

#[derive(Default)]
struct State {
    people: Vec<Person>,
    users: Vec<User>,
    sessions: Vec<Session>,
    last_person_id: i64,
    last_user_id: i64,
    closed: bool,
}

/// In-memory [`Database`] for tests and local experiments.
///
/// Records are kept in insertion (= id) order. Behaves like
/// [`crate::SqliteDatabase`] in every observable way except durability.
pub struct MemoryDatabase {
    state: Mutex<State>,
    hasher: CredentialHasher,
}

impl MemoryDatabase {
    pub fn new(hasher: CredentialHasher) -> Self {
        Self {
            state: Mutex::new(State::default()),
            hasher,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        let state = self
            .state
            .lock()
            .map_err(|e| Error::StorageUnavailable(format!("Lock error: {}", e)))?;
        if state.closed {
            return Err(Error::StorageUnavailable("database is closed".to_string()));
        }
        Ok(state)
    }
}

fn login_taken(users: &[User], login: &str, except_id: i64) -> bool {
    users.iter().any(|u| u.login == login && u.id != except_id)
}

impl Database for MemoryDatabase {
    fn close(&self) -> Result<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|e| Error::StorageUnavailable(format!("Lock error: {}", e)))?;
        state.closed = true;
        Ok(())
    }

    fn hasher(&self) -> &CredentialHasher {
        &self.hasher
    }

    fn insert_person(&self, mut person: Person) -> Result<Person> {
        person.validate()?;
        person.version = next_version("person", person.version)?;
        let mut state = self.lock()?;
        state.last_person_id += 1;
        person.id = state.last_person_id;
        state.people.push(person.clone());
        debug!(id = person.id, "Person inserted");
        Ok(person)
    }

    fn find_person(&self, id: i64) -> Result<Person> {
        let state = self.lock()?;
        state
            .people
            .iter()
            .find(|p| p.id == id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("person {} not found", id)))
    }

    fn list_people(&self) -> Result<Vec<Person>> {
        Ok(self.lock()?.people.clone())
    }

    fn update_person(&self, mut person: Person) -> Result<Person> {
        person.validate()?;
        let what = format!("person {}", person.id);
        let version = next_version(&what, person.version)?;
        let mut state = self.lock()?;
        let slot = state
            .people
            .iter_mut()
            .find(|p| p.id == person.id && p.version == person.version)
            .ok_or_else(|| stale_version(&what, person.version))?;

        person.version = version;
        person.changed_at = Utc::now();
        // Creation time is not writable through an update.
        person.created_at = slot.created_at;
        *slot = person.clone();
        Ok(person)
    }

    fn delete_person(&self, id: i64) -> Result<()> {
        let mut state = self.lock()?;
        let before = state.people.len();
        state.people.retain(|p| p.id != id);
        expect_one_removed(before - state.people.len(), &format!("person {}", id))
    }

    fn fuzzy_find_people(&self, query: &str) -> Result<Vec<Person>> {
        let state = self.lock()?;
        Ok(state
            .people
            .iter()
            .filter(|p| p.matches_name(query))
            .cloned()
            .collect())
    }

    fn insert_user(&self, mut user: User) -> Result<User> {
        prepare_user(&self.hasher, &mut user)?;
        user.version = next_version("user", user.version)?;
        let mut state = self.lock()?;
        if login_taken(&state.users, &user.login, 0) {
            return Err(Error::Conflict(format!("user {}: login already exists", user.login)));
        }
        state.last_user_id += 1;
        user.id = state.last_user_id;
        state.users.push(user.clone());
        debug!(id = user.id, login = %user.login, "User inserted");
        Ok(user)
    }

    fn find_user(&self, id: i64) -> Result<User> {
        let state = self.lock()?;
        state
            .users
            .iter()
            .find(|u| u.id == id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("user {} not found", id)))
    }

    fn find_user_by_login(&self, login: &str) -> Result<User> {
        let state = self.lock()?;
        state
            .users
            .iter()
            .find(|u| u.login == login)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("user {} not found", login)))
    }

    fn list_users(&self) -> Result<Vec<User>> {
        Ok(self.lock()?.users.clone())
    }

    fn update_user(&self, mut user: User) -> Result<User> {
        prepare_user(&self.hasher, &mut user)?;
        let what = format!("user {}", user.id);
        let version = next_version(&what, user.version)?;
        let mut state = self.lock()?;
        if !state.users.iter().any(|u| u.id == user.id && u.version == user.version) {
            return Err(stale_version(&what, user.version));
        }
        if login_taken(&state.users, &user.login, user.id) {
            return Err(Error::Conflict(format!("user {}: login already exists", user.login)));
        }

        user.version = version;
        user.changed_at = Utc::now();
        if let Some(slot) = state.users.iter_mut().find(|u| u.id == user.id) {
            user.created_at = slot.created_at;
            *slot = user.clone();
        }
        Ok(user)
    }

    fn delete_user(&self, id: i64) -> Result<()> {
        let mut state = self.lock()?;
        let before = state.users.len();
        state.users.retain(|u| u.id != id);
        expect_one_removed(before - state.users.len(), &format!("user {}", id))
    }

    fn issue_session(&self, login: &str, ttl: Duration) -> Result<Session> {
        let session = new_session(login, ttl, Utc::now())?;
        let mut state = self.lock()?;
        if state.sessions.iter().any(|s| s.token == session.token) {
            return Err(Error::Conflict("session token already exists".to_string()));
        }
        state.sessions.push(session.clone());
        debug!(user = %session.user, valid_until = %session.valid_until, "Session issued");
        Ok(session)
    }

    fn find_session(&self, token: &str) -> Result<Session> {
        let state = self.lock()?;
        state
            .sessions
            .iter()
            .find(|s| s.token == token)
            .cloned()
            .ok_or_else(|| Error::NotFound("session not found".to_string()))
    }

    fn invalidate(&self, session: &Session) -> Result<()> {
        let mut state = self.lock()?;
        let before = state.sessions.len();
        state.sessions.retain(|s| s.token != session.token);
        expect_one_removed(before - state.sessions.len(), "session")
    }

    fn expire_sessions(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut state = self.lock()?;
        let before = state.sessions.len();
        state.sessions.retain(|s| !s.is_expired(now));
        Ok(before - state.sessions.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_not_reused() {
        let db = MemoryDatabase::new(CredentialHasher::weak());
        let a = db.insert_person(Person::new("A")).unwrap();
        db.delete_person(a.id).unwrap();
        let b = db.insert_person(Person::new("B")).unwrap();
        assert!(b.id > a.id);
    }

    #[test]
    fn test_closed_database_unavailable() {
        let db = MemoryDatabase::new(CredentialHasher::weak());
        db.close().unwrap();
        db.close().unwrap();
        assert!(matches!(db.list_users(), Err(Error::StorageUnavailable(_))));
        assert!(matches!(
            db.issue_session("user", Duration::from_secs(1)),
            Err(Error::StorageUnavailable(_))
        ));
    }
}
