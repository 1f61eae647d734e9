pub mod config;
pub mod error;
pub mod paths;
pub mod person;
pub mod session;
pub mod time;
pub mod user;

pub use config::Config;
pub use error::{Error, ErrorKind, Result};
pub use paths::Paths;
pub use person::{Person, PhoneNumber, PhoneNumbers};
pub use session::Session;
pub use user::User;
