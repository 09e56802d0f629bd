//! Lock information for state backend locking

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Default lock timeout in seconds (15 minutes)
pub const DEFAULT_LOCK_TIMEOUT_SECS: i64 = 900;

/// Contents of the lock file written next to a state file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    /// Random id; `force-unlock` takes this value
    pub id: String,
    /// The command holding the lock (e.g., "apply", "destroy")
    pub operation: String,
    /// Who acquired the lock (username@hostname)
    pub who: String,
    /// Acquisition time
    pub created: DateTime<Utc>,
    /// After this instant another run may break the lock
    pub expires: DateTime<Utc>,
}

impl LockInfo {
    /// Lock held by `operation` for the default timeout
    pub fn new(operation: impl Into<String>) -> Self {
        Self::with_timeout(operation, DEFAULT_LOCK_TIMEOUT_SECS)
    }

    /// Lock that expires `timeout_secs` from now; a negative value yields
    /// an already expired lock
    pub fn with_timeout(operation: impl Into<String>, timeout_secs: i64) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            operation: operation.into(),
            who: lock_owner(),
            created: now,
            expires: now + Duration::seconds(timeout_secs),
        }
    }

    /// Whether a stale lock may be broken
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires
    }

    /// Negative once expired
    pub fn time_remaining(&self) -> Duration {
        self.expires - Utc::now()
    }
}

/// username@hostname
fn lock_owner() -> String {
    let username = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string());

    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());

    format!("{}@{}", username, hostname)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_info_new() {
        let lock = LockInfo::new("apply");
        assert_eq!(lock.operation, "apply");
        assert!(!lock.id.is_empty());
        assert!(lock.who.contains('@'));
        assert!(lock.expires > lock.created);
        assert!(!lock.is_expired());
    }

    #[test]
    fn test_lock_info_with_timeout() {
        let lock = LockInfo::with_timeout("apply", 60);
        let remaining = lock.time_remaining();
        assert!(remaining.num_seconds() > 55);
        assert!(remaining.num_seconds() <= 60);

        let expired = LockInfo::with_timeout("apply", -1);
        assert!(expired.is_expired());
    }
}
