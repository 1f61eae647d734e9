use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use rolodex_core::{time, Error, Result, Session};
use std::time::Duration;

/// Raw token size in bytes; tokens are hex-encoded to twice this length.
pub const TOKEN_LENGTH: usize = 32;

/// A fresh token from the OS random source.
pub fn generate_token() -> Result<String> {
    let mut buf = [0u8; TOKEN_LENGTH];
    OsRng
        .try_fill_bytes(&mut buf)
        .map_err(|e| Error::Randomness(format!("Failed to generate session token: {}", e)))?;
    Ok(hex::encode(buf))
}

/// Build (but do not persist) a session for `login` that expires `ttl` after `now`.
pub fn new_session(login: &str, ttl: Duration, now: DateTime<Utc>) -> Result<Session> {
    let ttl = chrono::Duration::from_std(ttl)
        .map_err(|e| Error::Validation(format!("Session ttl out of range: {}", e)))?;
    let valid_until = now
        .checked_add_signed(ttl)
        .filter(time::is_storable)
        .ok_or_else(|| Error::Validation("Session ttl out of range".to_string()))?;

    Ok(Session {
        token: generate_token()?,
        user: login.to_string(),
        valid_until,
    })
}
