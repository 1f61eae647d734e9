use chrono::{DateTime, Datelike, SecondsFormat, Utc};
use rolodex_core::{time, Error, Person, PhoneNumbers, Result, Session, User};
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

use crate::credential::CredentialHasher;
use crate::database::{expect_one_removed, next_version, prepare_user, stale_version, Database};
use crate::session::new_session;

const PERSON_COLUMNS: &str = "id, name, title, department, email_address, comment, phone_numbers, \
     street, city, state, postal_code, country, created_at, changed_at, version";

const USER_COLUMNS: &str = "id, login, password_hash, admin, created_at, changed_at, version";

/// Fixed-width RFC 3339 (nanoseconds, `Z`), so string order is time order.
pub(crate) fn encode_time(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn time_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn row_to_person(row: &Row<'_>) -> rusqlite::Result<Person> {
    let phones: String = row.get(6)?;
    let phone_numbers: PhoneNumbers = serde_json::from_str(&phones)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(6, Type::Text, Box::new(e)))?;

    Ok(Person {
        id: row.get(0)?,
        name: row.get(1)?,
        title: row.get(2)?,
        department: row.get(3)?,
        email_address: row.get(4)?,
        comment: row.get(5)?,
        phone_numbers,
        street: row.get(7)?,
        city: row.get(8)?,
        state: row.get(9)?,
        postal_code: row.get(10)?,
        country: row.get(11)?,
        created_at: time_column(row, 12)?,
        changed_at: time_column(row, 13)?,
        version: row.get(14)?,
    })
}

fn row_to_user(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        login: row.get(1)?,
        password_hash: row.get(2)?,
        admin: row.get(3)?,
        password: None,
        created_at: time_column(row, 4)?,
        changed_at: time_column(row, 5)?,
        version: row.get(6)?,
    })
}

fn row_to_session(row: &Row<'_>) -> rusqlite::Result<Session> {
    Ok(Session {
        token: row.get(0)?,
        user: row.get(1)?,
        valid_until: time_column(row, 2)?,
    })
}

/// Map a driver error: missing rows are `NotFound`, constraint violations
/// (duplicate login, duplicate token) are `Conflict`, the rest is the engine's fault.
fn sql_error(what: &str, e: rusqlite::Error) -> Error {
    match e {
        rusqlite::Error::QueryReturnedNoRows => Error::NotFound(format!("{} not found", what)),
        rusqlite::Error::SqliteFailure(ref err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Error::Conflict(format!("{}: {}", what, e))
        }
        other => Error::StorageUnavailable(format!("{}: {}", what, other)),
    }
}

/// SQLite-backed [`Database`].
///
/// The connection sits behind a mutex; every mutation is a single statement,
/// and version checks are conditional `UPDATE ... WHERE id = ? AND version = ?`.
#[derive(Clone)]
pub struct SqliteDatabase {
    inner: Arc<Mutex<Option<Connection>>>,
    hasher: CredentialHasher,
}

impl SqliteDatabase {
    /// Open (or create) the database. `":memory:"` opens a private in-memory database.
    pub fn open(data_source: &str, hasher: CredentialHasher) -> Result<Self> {
        let conn = if data_source == ":memory:" {
            Connection::open_in_memory()
        } else {
            let path = Path::new(data_source);
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|e| {
                    Error::StorageUnavailable(format!("Failed to create db directory: {}", e))
                })?;
            }
            Connection::open(path)
        }
        .map_err(|e| {
            Error::StorageUnavailable(format!("Failed to open database {}: {}", data_source, e))
        })?;

        // Enable WAL mode for better concurrent read performance
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(|e| Error::StorageUnavailable(format!("Failed to set busy timeout: {}", e)))?;

        let db = Self {
            inner: Arc::new(Mutex::new(Some(conn))),
            hasher,
        };
        db.init_schema()?;
        info!(data_source = %data_source, "Database opened");
        Ok(db)
    }

    pub fn open_in_memory(hasher: CredentialHasher) -> Result<Self> {
        Self::open(":memory:", hasher)
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let guard = self
            .inner
            .lock()
            .map_err(|e| Error::StorageUnavailable(format!("Lock error: {}", e)))?;
        match guard.as_ref() {
            Some(conn) => f(conn),
            None => Err(Error::StorageUnavailable("database is closed".to_string())),
        }
    }

    fn init_schema(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute_batch(
                "
                CREATE TABLE IF NOT EXISTS people (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    title TEXT NOT NULL DEFAULT '',
                    department TEXT NOT NULL DEFAULT '',
                    email_address TEXT NOT NULL DEFAULT '',
                    comment TEXT NOT NULL DEFAULT '',
                    phone_numbers TEXT NOT NULL DEFAULT '[]',
                    street TEXT NOT NULL DEFAULT '',
                    city TEXT NOT NULL DEFAULT '',
                    state TEXT NOT NULL DEFAULT '',
                    postal_code TEXT NOT NULL DEFAULT '',
                    country TEXT NOT NULL DEFAULT '',
                    created_at TEXT NOT NULL,
                    changed_at TEXT NOT NULL,
                    version INTEGER NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_people_name ON people(name);

                CREATE TABLE IF NOT EXISTS users (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    login TEXT NOT NULL UNIQUE,
                    password_hash TEXT NOT NULL,
                    admin INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL,
                    changed_at TEXT NOT NULL,
                    version INTEGER NOT NULL
                );

                CREATE TABLE IF NOT EXISTS sessions (
                    token TEXT PRIMARY KEY,
                    login TEXT NOT NULL,
                    valid_until TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_sessions_valid_until ON sessions(valid_until);
                ",
            )
            .map_err(|e| Error::StorageUnavailable(format!("Failed to init schema: {}", e)))
        })?;

        debug!("Database schema initialized");
        Ok(())
    }
}

impl Database for SqliteDatabase {
    fn close(&self) -> Result<()> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|e| Error::StorageUnavailable(format!("Lock error: {}", e)))?;
        if let Some(conn) = guard.take() {
            conn.close().map_err(|(_, e)| {
                Error::StorageUnavailable(format!("Failed to close database: {}", e))
            })?;
            info!("Database closed");
        }
        Ok(())
    }

    fn hasher(&self) -> &CredentialHasher {
        &self.hasher
    }

    fn insert_person(&self, mut person: Person) -> Result<Person> {
        person.validate()?;
        let phones = serde_json::to_string(&person.phone_numbers)?;
        person.version = next_version("person", person.version)?;

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO people (name, title, department, email_address, comment, phone_numbers,
                    street, city, state, postal_code, country, created_at, changed_at, version)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    person.name, person.title, person.department, person.email_address,
                    person.comment, phones, person.street, person.city, person.state,
                    person.postal_code, person.country, encode_time(&person.created_at),
                    encode_time(&person.changed_at), person.version
                ],
            )
            .map_err(|e| sql_error("person", e))?;
            person.id = conn.last_insert_rowid();
            Ok(())
        })?;

        debug!(id = person.id, version = person.version, "Person inserted");
        Ok(person)
    }

    fn find_person(&self, id: i64) -> Result<Person> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {} FROM people WHERE id = ?1", PERSON_COLUMNS),
                params![id],
                row_to_person,
            )
            .map_err(|e| sql_error(&format!("person {}", id), e))
        })
    }

    fn list_people(&self) -> Result<Vec<Person>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&format!("SELECT {} FROM people ORDER BY id", PERSON_COLUMNS))
                .map_err(|e| sql_error("people", e))?;
            let rows = stmt
                .query_map([], row_to_person)
                .map_err(|e| sql_error("people", e))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| sql_error("people", e))
        })
    }

    fn update_person(&self, person: Person) -> Result<Person> {
        person.validate()?;
        let phones = serde_json::to_string(&person.phone_numbers)?;
        let now = Utc::now();

        let what = format!("person {}", person.id);
        let version = next_version(&what, person.version)?;
        let stored = self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE people SET name = ?1, title = ?2, department = ?3, email_address = ?4,
                    comment = ?5, phone_numbers = ?6, street = ?7, city = ?8, state = ?9,
                    postal_code = ?10, country = ?11, changed_at = ?12, version = ?13
                 WHERE id = ?14 AND version = ?15",
                params![
                    person.name, person.title, person.department, person.email_address,
                    person.comment, phones, person.street, person.city, person.state,
                    person.postal_code, person.country, encode_time(&now), version,
                    person.id, person.version
                ],
            )
            .map_err(|e| sql_error(&what, e))?;

            if changed != 1 {
                return Err(stale_version(&what, person.version));
            }

            conn.query_row(
                &format!("SELECT {} FROM people WHERE id = ?1", PERSON_COLUMNS),
                params![person.id],
                row_to_person,
            )
            .map_err(|e| sql_error(&what, e))
        })?;

        debug!(id = stored.id, version = stored.version, "Person updated");
        Ok(stored)
    }

    fn delete_person(&self, id: i64) -> Result<()> {
        let removed = self.with_conn(|conn| {
            conn.execute("DELETE FROM people WHERE id = ?1", params![id])
                .map_err(|e| sql_error(&format!("person {}", id), e))
        })?;
        expect_one_removed(removed, &format!("person {}", id))
    }

    fn fuzzy_find_people(&self, query: &str) -> Result<Vec<Person>> {
        // Filtered here rather than in SQL: SQLite's lower() only folds ASCII.
        Ok(self
            .list_people()?
            .into_iter()
            .filter(|p| p.matches_name(query))
            .collect())
    }

    fn insert_user(&self, mut user: User) -> Result<User> {
        prepare_user(&self.hasher, &mut user)?;
        user.version = next_version("user", user.version)?;

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (login, password_hash, admin, created_at, changed_at, version)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    user.login, user.password_hash, user.admin,
                    encode_time(&user.created_at), encode_time(&user.changed_at), user.version
                ],
            )
            .map_err(|e| sql_error(&format!("user {}", user.login), e))?;
            user.id = conn.last_insert_rowid();
            Ok(())
        })?;

        debug!(id = user.id, login = %user.login, "User inserted");
        Ok(user)
    }

    fn find_user(&self, id: i64) -> Result<User> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS),
                params![id],
                row_to_user,
            )
            .map_err(|e| sql_error(&format!("user {}", id), e))
        })
    }

    fn find_user_by_login(&self, login: &str) -> Result<User> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {} FROM users WHERE login = ?1", USER_COLUMNS),
                params![login],
                row_to_user,
            )
            .map_err(|e| sql_error(&format!("user {}", login), e))
        })
    }

    fn list_users(&self) -> Result<Vec<User>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&format!("SELECT {} FROM users ORDER BY id", USER_COLUMNS))
                .map_err(|e| sql_error("users", e))?;
            let rows = stmt
                .query_map([], row_to_user)
                .map_err(|e| sql_error("users", e))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| sql_error("users", e))
        })
    }

    fn update_user(&self, mut user: User) -> Result<User> {
        prepare_user(&self.hasher, &mut user)?;
        let now = Utc::now();

        let what = format!("user {}", user.id);
        let version = next_version(&what, user.version)?;
        let stored = self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET login = ?1, password_hash = ?2, admin = ?3, changed_at = ?4,
                    version = ?5
                 WHERE id = ?6 AND version = ?7",
                params![
                    user.login, user.password_hash, user.admin, encode_time(&now),
                    version, user.id, user.version
                ],
            )
            .map_err(|e| sql_error(&what, e))?;

            if changed != 1 {
                return Err(stale_version(&what, user.version));
            }

            conn.query_row(
                &format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS),
                params![user.id],
                row_to_user,
            )
            .map_err(|e| sql_error(&what, e))
        })?;

        debug!(id = stored.id, version = stored.version, "User updated");
        Ok(stored)
    }

    fn delete_user(&self, id: i64) -> Result<()> {
        let removed = self.with_conn(|conn| {
            conn.execute("DELETE FROM users WHERE id = ?1", params![id])
                .map_err(|e| sql_error(&format!("user {}", id), e))
        })?;
        expect_one_removed(removed, &format!("user {}", id))
    }

    fn issue_session(&self, login: &str, ttl: Duration) -> Result<Session> {
        let session = new_session(login, ttl, Utc::now())?;

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sessions (token, login, valid_until) VALUES (?1, ?2, ?3)",
                params![session.token, session.user, encode_time(&session.valid_until)],
            )
            .map_err(|e| sql_error("session", e))
        })?;

        debug!(user = %session.user, valid_until = %session.valid_until, "Session issued");
        Ok(session)
    }

    fn find_session(&self, token: &str) -> Result<Session> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT token, login, valid_until FROM sessions WHERE token = ?1",
                params![token],
                row_to_session,
            )
            .map_err(|e| sql_error("session", e))
        })
    }

    fn invalidate(&self, session: &Session) -> Result<()> {
        let removed = self.with_conn(|conn| {
            conn.execute("DELETE FROM sessions WHERE token = ?1", params![session.token])
                .map_err(|e| sql_error("session", e))
        })?;
        expect_one_removed(removed, "session")
    }

    fn expire_sessions(&self, now: DateTime<Utc>) -> Result<usize> {
        // Stored expiries always have four-digit years; a cutoff outside that
        // range would not compare correctly as text.
        self.with_conn(|conn| {
            let removed = if now.year() > time::MAX_YEAR {
                conn.execute("DELETE FROM sessions", [])
            } else if now.year() < time::MIN_YEAR {
                Ok(0)
            } else {
                conn.execute(
                    "DELETE FROM sessions WHERE valid_until < ?1",
                    params![encode_time(&now)],
                )
            };
            removed.map_err(|e| sql_error("sessions", e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rolodex_core::PhoneNumber;
    use tempfile::TempDir;

    fn test_db() -> (SqliteDatabase, TempDir) {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("rolodex.db");
        let db = SqliteDatabase::open(db_path.to_str().unwrap(), CredentialHasher::weak()).unwrap();
        (db, dir)
    }

    #[test]
    fn test_encode_time_sorts_chronologically() {
        let a = DateTime::parse_from_rfc3339("2016-04-24T10:30:07Z").unwrap().with_timezone(&Utc);
        let b = a + chrono::Duration::nanoseconds(1);
        let c = a + chrono::Duration::seconds(1);
        assert!(encode_time(&a) < encode_time(&b));
        assert!(encode_time(&b) < encode_time(&c));
        assert_eq!(encode_time(&a), "2016-04-24T10:30:07.000000000Z");
    }

    #[test]
    fn test_data_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("sub").join("rolodex.db");
        let path = db_path.to_str().unwrap();

        let mut person = Person::new("Mario Drees");
        person.phone_numbers.push(PhoneNumber::new("wörk", "1234123 3074101"));
        let stored = {
            let db = SqliteDatabase::open(path, CredentialHasher::weak()).unwrap();
            let stored = db.insert_person(person).unwrap();
            db.close().unwrap();
            stored
        };

        let db = SqliteDatabase::open(path, CredentialHasher::weak()).unwrap();
        assert_eq!(db.find_person(stored.id).unwrap(), stored);
    }

    #[test]
    fn test_closed_database_unavailable() {
        let (db, _dir) = test_db();
        db.close().unwrap();
        db.close().unwrap();
        let err = db.list_people().unwrap_err();
        assert!(matches!(err, Error::StorageUnavailable(_)));
    }

    #[test]
    fn test_corrupt_row_is_storage_error() {
        let (db, _dir) = test_db();
        let p = db.insert_person(Person::new("Broken")).unwrap();
        db.with_conn(|conn| {
            conn.execute("UPDATE people SET phone_numbers = 'not json' WHERE id = ?1", params![p.id])
                .map_err(|e| sql_error("person", e))
        })
        .unwrap();
        assert!(matches!(db.find_person(p.id), Err(Error::StorageUnavailable(_))));
    }

    #[test]
    fn test_session_row_uses_login_column() {
        let (db, _dir) = test_db();
        let s = db.issue_session("user", Duration::from_secs(60)).unwrap();
        let login: String = db
            .with_conn(|conn| {
                conn.query_row("SELECT login FROM sessions WHERE token = ?1", params![s.token], |r| r.get(0))
                    .map_err(|e| sql_error("session", e))
            })
            .unwrap();
        assert_eq!(login, "user");
    }
}
