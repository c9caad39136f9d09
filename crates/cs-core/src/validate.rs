// SPDX-License-Identifier: MIT OR Apache-2.0
//! Validation helpers shared by the action queue and notification consumer.

use chrono::{DateTime, Utc};

/// `true` when `valid_until` (a unix timestamp) is strictly in the future
/// relative to `now`.
pub fn is_future(valid_until: i64, now: DateTime<Utc>) -> bool {
    valid_until > now.timestamp()
}

/// `true` when `s` is non-empty after no trimming — the wire format does
/// not tolerate whitespace-only fields either.
pub fn is_present(s: &str) -> bool {
    !s.is_empty()
}

/// Validate an optional `action_uri`: `None` is fine; `Some(uri)` must
/// parse as an absolute URL with scheme `http` or `https`.
pub fn is_valid_action_uri(action_uri: Option<&str>) -> bool {
    match action_uri {
        None => true,
        Some(uri) => matches!(uri.split_once("://").map(|(scheme, _)| scheme), Some("http") | Some("https"))
            && url_has_authority(uri),
    }
}

fn url_has_authority(uri: &str) -> bool {
    uri.split_once("://")
        .map(|(_, rest)| !rest.is_empty() && !rest.starts_with('/'))
        .unwrap_or(false)
}
