use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Proof of a prior successful login, valid until `valid_until`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    pub user: String,
    pub valid_until: DateTime<Utc>,
}

impl Session {
    /// Expired strictly before `now`; a session ending exactly at `now` is still live.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.valid_until < now
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix: String = self.token.chars().take(8).collect();
        write!(f, "<Session {}, user {} (valid until {})>", prefix, self.user, self.valid_until)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_expiry_is_strict() {
        let now = Utc::now();
        let s = Session {
            token: "ab".repeat(32),
            user: "user".to_string(),
            valid_until: now,
        };
        assert!(!s.is_expired(now));
        assert!(s.is_expired(now + Duration::nanoseconds(1)));
        assert!(!s.is_expired(now - Duration::seconds(1)));
    }

    #[test]
    fn test_display_hides_token() {
        let s = Session {
            token: "0123456789abcdef".repeat(4),
            user: "user".to_string(),
            valid_until: Utc::now(),
        };
        let shown = s.to_string();
        assert!(shown.starts_with("<Session 01234567, user user"));
        assert!(!shown.contains("89abcdef0123"));
    }
}
