// SPDX-License-Identifier: MIT OR Apache-2.0
//! Notifications: commands delivered to the OS desktop process, and the
//! seen-record used for exactly-once delivery.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A single notification delivered inside the `desktop_notifier` subsystem
/// payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Notification {
    /// Unique notification identifier.
    pub id: String,
    /// Notification title shown to the user.
    pub title: String,
    /// Notification body shown to the user.
    pub body: String,
    /// Unix timestamp after which the notification is no longer valid.
    pub valid_until: i64,
    /// Optional absolute `http`/`https` URL opened when the user acts on
    /// the notification.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_uri: Option<String>,
    /// UTC time the notification was successfully delivered to the OS.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
}

/// Persisted per-delivered-id record backing the [`Command Deduper`](crate)
/// seen-set; deleted after the retention window elapses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SeenCommandRecord {
    /// Command (notification or action) identifier.
    pub id: String,
    /// The command's original expiry; retained for diagnostics only.
    pub valid_until: i64,
    /// UTC time the command was first observed/delivered.
    pub sent_at: DateTime<Utc>,
}

impl SeenCommandRecord {
    /// Build a fresh record for a command observed right now.
    pub fn new(id: impl Into<String>, valid_until: i64, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            valid_until,
            sent_at: now,
        }
    }

    /// `true` once `sent_at + retention` has elapsed relative to `now`.
    pub fn is_expired(&self, now: DateTime<Utc>, retention: chrono::Duration) -> bool {
        self.sent_at + retention <= now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notification_round_trips_without_optional_fields() {
        let n = Notification {
            id: "n1".into(),
            title: "T".into(),
            body: "B".into(),
            valid_until: 1_900_000_000,
            action_uri: None,
            sent_at: None,
        };
        let json = serde_json::to_string(&n).unwrap();
        assert!(!json.contains("action_uri"));
        assert!(!json.contains("sent_at"));
        let back: Notification = serde_json::from_str(&json).unwrap();
        assert_eq!(back, n);
    }

    #[test]
    fn seen_record_expires_after_retention() {
        let now = Utc::now();
        let rec = SeenCommandRecord::new("c1", 1_900_000_000, now - chrono::Duration::days(200));
        assert!(rec.is_expired(now, chrono::Duration::days(183)));
        let fresh = SeenCommandRecord::new("c2", 1_900_000_000, now);
        assert!(!fresh.is_expired(now, chrono::Duration::days(183)));
    }
}
