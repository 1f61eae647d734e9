use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};
use crate::time;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhoneNumber {
    #[serde(rename = "type")]
    pub kind: String,
    pub number: String,
}

impl PhoneNumber {
    pub fn new(kind: impl Into<String>, number: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            number: number.into(),
        }
    }
}

/// Ordered list; equality is position-sensitive.
pub type PhoneNumbers = Vec<PhoneNumber>;

/// A directory entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Person {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub department: String,
    #[serde(default)]
    pub email_address: String,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub phone_numbers: PhoneNumbers,

    #[serde(default)]
    pub street: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub postal_code: String,
    #[serde(default)]
    pub country: String,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub changed_at: DateTime<Utc>,
    #[serde(default)]
    pub version: i64,
}

impl Person {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            name: name.into(),
            title: String::new(),
            department: String::new(),
            email_address: String::new(),
            comment: String::new(),
            phone_numbers: Vec::new(),
            street: String::new(),
            city: String::new(),
            state: String::new(),
            postal_code: String::new(),
            country: String::new(),
            created_at: now,
            changed_at: now,
            version: 0,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Validation("name must not be empty".to_string()));
        }
        time::check_storable("created_at", &self.created_at)?;
        time::check_storable("changed_at", &self.changed_at)?;
        Ok(())
    }

    /// Case-insensitive substring match on the name. An empty query matches.
    pub fn matches_name(&self, query: &str) -> bool {
        self.name.to_lowercase().contains(&query.to_lowercase())
    }
}

impl fmt::Display for Person {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<Person {} ({})>", self.name, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate() {
        assert!(Person::new("Tamara Skibicki").validate().is_ok());
        assert!(matches!(Person::new("").validate(), Err(Error::Validation(_))));
        assert!(matches!(Person::new("   ").validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn test_timestamps_must_fit_four_digit_years() {
        use chrono::TimeZone;

        let mut p = Person::new("Mario Drees");
        p.created_at = Utc.with_ymd_and_hms(10000, 1, 2, 0, 0, 0).unwrap();
        assert!(matches!(p.validate(), Err(Error::Validation(_))));

        let mut p = Person::new("Mario Drees");
        p.changed_at = DateTime::<Utc>::MIN_UTC;
        assert!(matches!(p.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn test_matches_name() {
        let p = Person::new("Tamara Skibicki");
        assert!(p.matches_name("skib"));
        assert!(p.matches_name("TAMARA"));
        assert!(p.matches_name(""));
        assert!(!p.matches_name("mario"));

        let umlaut = Person::new("Jürgen Öztürk");
        assert!(umlaut.matches_name("öZT"));
    }

    #[test]
    fn test_json_shape() {
        let mut p = Person::new("Mario Drees");
        p.phone_numbers.push(PhoneNumber::new("work", "(03867) 3074101"));
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json["name"], "Mario Drees");
        assert_eq!(json["phone_numbers"][0]["type"], "work");
        assert_eq!(json["phone_numbers"][0]["number"], "(03867) 3074101");
        assert_eq!(json["version"], 0);
    }

    #[test]
    fn test_empty_json_is_invalid() {
        let p: Person = serde_json::from_str("{}").unwrap();
        assert!(p.validate().is_err());

        let p: Person = serde_json::from_str(r#"{"email_address": "foo@example.com"}"#).unwrap();
        assert!(p.validate().is_err());
    }
}
