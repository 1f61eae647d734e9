//! Timestamp range shared by every store.
//!
//! Persisted timestamps are rendered as fixed-width RFC 3339 text, which only
//! has room for four-digit years. Anything outside that range is rejected up
//! front so every backend sees the same set of valid records.

use chrono::{DateTime, Datelike, Utc};

use crate::error::{Error, Result};

pub const MIN_YEAR: i32 = 0;
pub const MAX_YEAR: i32 = 9999;

pub fn is_storable(t: &DateTime<Utc>) -> bool {
    (MIN_YEAR..=MAX_YEAR).contains(&t.year())
}

pub fn check_storable(field: &str, t: &DateTime<Utc>) -> Result<()> {
    if is_storable(t) {
        Ok(())
    } else {
        Err(Error::Validation(format!(
            "{} {} is outside years {:04}-{:04}",
            field, t, MIN_YEAR, MAX_YEAR
        )))
    }
}
