// SPDX-License-Identifier: MIT OR Apache-2.0
//! Actions: typed, dedup'd commands routed to registered actors by `type`.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A single command delivered inside the `actions` subsystem payload.
///
/// `id` is unique per action; `type_` names the actor that should handle
/// it (serialised as `"type"` on the wire — `type` is a reserved word).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Action {
    /// Unique command identifier.
    pub id: String,
    /// Unix timestamp after which the action is no longer valid.
    pub valid_until: i64,
    /// Names the actor that should handle this action.
    #[serde(rename = "type")]
    pub type_: String,
    /// UTC time the action was successfully applied, if ever.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
}

impl Action {
    /// `id != ""`, `valid_until > 0`, and `valid_until` is in the future
    /// relative to `now`.
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        !self.id.is_empty() && self.valid_until > 0 && self.valid_until > now.timestamp()
    }
}

/// A persisted [`Action`] with `processed_at` set, retained so the server
/// cannot cause a replay of an already-applied action after a restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ActionRecord {
    /// Action identifier.
    pub id: String,
    /// The action's original expiry; retained for diagnostics.
    pub valid_until: i64,
    /// UTC time the action was applied.
    pub processed_at: DateTime<Utc>,
}

impl From<&Action> for ActionRecord {
    fn from(action: &Action) -> Self {
        Self {
            id: action.id.clone(),
            valid_until: action.valid_until,
            processed_at: action.processed_at.unwrap_or_else(Utc::now),
        }
    }
}
