pub mod credential;
pub mod database;
pub mod memory;
pub mod session;
pub mod sqlite;

pub use credential::{CredentialHasher, HashParams};
pub use database::Database;
pub use memory::MemoryDatabase;
pub use session::{generate_token, TOKEN_LENGTH};
pub use sqlite::SqliteDatabase;
