// SPDX-License-Identifier: MIT OR Apache-2.0
//! cs-dedupe
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! The command deduper embedded inside the action queue and the
//! notification consumer: a persistent seen-set of command ids with TTL.
//! For each observed id, a record already on file with an unexpired
//! `valid_until` marks the command a duplicate; otherwise the observation
//! is recorded and the caller is told to proceed.

use chrono::{DateTime, Duration, Utc};
use cs_core::kv::KvStore;
use cs_core::notification::SeenCommandRecord;
use cs_error::ControlError;
use cs_store::RetentionStore;
use std::sync::Arc;
use tracing::debug;

/// Default sweep interval: 12 hours.
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 12 * 60 * 60;

/// Default retention window: ~6 months.
pub const DEFAULT_RETENTION_SECS: i64 = 183 * 24 * 60 * 60;

/// A persistent seen-command-id deduper bound to one KV bucket.
#[derive(Clone)]
pub struct CommandDeduper {
    store: RetentionStore,
    retention: Duration,
}

impl CommandDeduper {
    /// Bind a deduper to `bucket` on `kv`, aging records out after
    /// `retention`.
    pub fn new(kv: Arc<dyn KvStore>, bucket: &'static str, retention: Duration) -> Self {
        Self {
            store: RetentionStore::new(kv, bucket),
            retention,
        }
    }

    /// Observe `id` with expiry `valid_until` at `now`.
    ///
    /// Returns `true` if this is a novel observation the caller should
    /// process, `false` if it is a duplicate of a still-live prior
    /// observation and must be dropped.
    pub async fn observe(
        &self,
        id: &str,
        valid_until: i64,
        now: DateTime<Utc>,
    ) -> Result<bool, ControlError> {
        if let Some(existing) = self.store.get::<SeenCommandRecord>(id).await? {
            if !existing.is_expired(now, self.retention) {
                debug!(target: "control_service.dedupe", id, "duplicate command, dropping");
                return Ok(false);
            }
        }
        self.store
            .put(id, &SeenCommandRecord::new(id, valid_until, now))
            .await?;
        Ok(true)
    }

    /// `true` if `id` has already been observed and is not yet expired.
    pub async fn is_duplicate(&self, id: &str, now: DateTime<Utc>) -> Result<bool, ControlError> {
        Ok(match self.store.get::<SeenCommandRecord>(id).await? {
            Some(existing) => !existing.is_expired(now, self.retention),
            None => false,
        })
    }

    /// Single-pass sweep deleting every record whose retention window has
    /// elapsed relative to `now`. Returns the number of records deleted.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<usize, ControlError> {
        let retention = self.retention;
        self.store
            .sweep::<SeenCommandRecord>(move |record| record.is_expired(now, retention))
            .await
    }
}
