//! User data model.

use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::tags::TagSet;

/// A subscriber account in the fleet registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub user_id: i64,
    pub enabled: bool,
    /// Set by abuse handling; a blocked user is invalid even while enabled.
    pub blocked: bool,
    pub username: String,
    pub password: String,
    pub email: String,
    pub tags: TagSet,
    /// Registration time, epoch seconds.
    pub registered_at: i64,
    /// Last activity time, epoch seconds.
    pub last_active_at: i64,
    /// Cumulative traffic counters in bytes.
    pub upload: u64,
    pub download: u64,
    /// Remaining traffic balance in bytes.
    pub balance: i64,
    pub uuid: Uuid,
    /// Monotonic change watermark, epoch seconds. Incremental pulls fetch
    /// only rows with `last_change` past the cache watermark.
    pub last_change: i64,
    pub remarks: Option<String>,
}

impl User {
    /// Validity policy: enabled and not blocked.
    pub fn is_valid(&self) -> bool {
        self.enabled && !self.blocked
    }

    pub fn register_day(&self) -> NaiveDate {
        epoch_day(self.registered_at)
    }

    pub fn last_active_day(&self) -> NaiveDate {
        epoch_day(self.last_active_at)
    }
}

fn epoch_day(ts: i64) -> NaiveDate {
    DateTime::<Utc>::from_timestamp(ts, 0)
        .unwrap_or_default()
        .date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn make_user(user_id: i64, email: &str) -> User {
        User {
            user_id,
            enabled: true,
            blocked: false,
            username: format!("u{user_id}"),
            password: "secret".to_string(),
            email: email.to_string(),
            tags: TagSet::new(),
            registered_at: 1_700_000_000,
            last_active_at: 1_700_086_400,
            upload: 0,
            download: 0,
            balance: 0,
            uuid: Uuid::new_v4(),
            last_change: 1_700_000_000,
            remarks: None,
        }
    }

    #[test]
    fn test_validity_policy() {
        let mut user = make_user(1, "a@example.com");
        assert!(user.is_valid());
        user.blocked = true;
        assert!(!user.is_valid());
        user.blocked = false;
        user.enabled = false;
        assert!(!user.is_valid());
    }

    #[test]
    fn test_register_day_from_epoch() {
        let user = make_user(1, "a@example.com");
        // 2023-11-14T22:13:20Z
        assert_eq!(
            user.register_day(),
            NaiveDate::from_ymd_opt(2023, 11, 14).unwrap()
        );
    }
}
