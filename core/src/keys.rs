//! Cache key namespace.
//!
//! Every key starts with a fixed prefix, and no prefix is a prefix of another
//! once the trailing separator is included, so keys from different
//! namespaces can never collide.

use crate::types::{ActivityId, UserId};

/// Prefix of cached activity documents.
pub const ACTIVITY_INFO_PREFIX: &str = "activity:info:";
/// Prefix of stock counters.
pub const ACTIVITY_STOCK_PREFIX: &str = "activity:stock:";
/// Prefix of participation records.
pub const USER_JOIN_PREFIX: &str = "activity:join:user:";
/// Prefix of per-activity locks.
pub const ACTIVITY_LOCK_PREFIX: &str = "lock:activity:lock:";

/// `activity:info:{id}`
#[must_use]
pub fn activity_info(id: ActivityId) -> String {
    format!("{ACTIVITY_INFO_PREFIX}{id}")
}

/// `activity:stock:{id}`
#[must_use]
pub fn activity_stock(id: ActivityId) -> String {
    format!("{ACTIVITY_STOCK_PREFIX}{id}")
}

/// `activity:join:user:{user}:{activity}`
#[must_use]
pub fn user_join(user: UserId, activity: ActivityId) -> String {
    format!("{USER_JOIN_PREFIX}{user}:{activity}")
}

/// `lock:activity:lock:{id}`
#[must_use]
pub fn activity_lock(id: ActivityId) -> String {
    format!("{ACTIVITY_LOCK_PREFIX}{id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_formats() {
        let a = ActivityId::new(12);
        assert_eq!(activity_info(a), "activity:info:12");
        assert_eq!(activity_stock(a), "activity:stock:12");
        assert_eq!(user_join(UserId::new(3), a), "activity:join:user:3:12");
        assert_eq!(activity_lock(a), "lock:activity:lock:12");
    }

    #[test]
    fn namespaces_do_not_overlap() {
        let prefixes = [
            ACTIVITY_INFO_PREFIX,
            ACTIVITY_STOCK_PREFIX,
            USER_JOIN_PREFIX,
            ACTIVITY_LOCK_PREFIX,
        ];
        for (i, a) in prefixes.iter().enumerate() {
            for (j, b) in prefixes.iter().enumerate() {
                if i != j {
                    assert!(!a.starts_with(b), "{a} overlaps {b}");
                }
            }
        }
    }
}
