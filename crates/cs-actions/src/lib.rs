// SPDX-License-Identifier: MIT OR Apache-2.0
//! cs-actions
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! The action queue: a [`Consumer`] registered under the `actions`
//! subsystem that decodes a JSON array of [`Action`]s, validates and
//! deduplicates each one against the persisted action store (and
//! optionally a legacy notification store, a migration aid from when
//! actions were delivered as notifications), and dispatches novel actions
//! to a registered [`Actor`] by `type`.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use cs_cancel::CancellationHandle;
use cs_core::{Action, ActionRecord, Actor, Consumer};
use cs_core::kv::KvStore;
use cs_error::{ControlError, ErrorCode};
use cs_store::RetentionStore;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Default retention window for applied action records: ~6 months.
pub const DEFAULT_RETENTION_SECS: i64 = 183 * 24 * 60 * 60;

/// A table of actors keyed by `type`.
#[derive(Default)]
pub struct ActorRegistry {
    actors: RwLock<BTreeMap<String, Arc<dyn Actor>>>,
}

impl ActorRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `actor` to handle actions whose `type` is `name`,
    /// replacing any actor previously registered under that name.
    pub async fn register(&self, name: impl Into<String>, actor: Arc<dyn Actor>) {
        self.actors.write().await.insert(name.into(), actor);
    }

    async fn get(&self, name: &str) -> Option<Arc<dyn Actor>> {
        self.actors.read().await.get(name).cloned()
    }
}

/// The action queue consumer.
pub struct ActionQueue {
    actors: ActorRegistry,
    action_store: RetentionStore,
    legacy_notification_store: Option<RetentionStore>,
    retention: Duration,
}

impl ActionQueue {
    /// Build a queue over `bucket` on `kv`, with `actors` as its actor
    /// table. `legacy_notification_bucket`, if given, is consulted
    /// read-only as an additional novelty check against actions that were
    /// previously delivered as notifications.
    pub fn new(
        kv: Arc<dyn KvStore>,
        bucket: &'static str,
        legacy_notification_bucket: Option<&'static str>,
        retention: Duration,
        actors: ActorRegistry,
    ) -> Self {
        Self {
            actors,
            action_store: RetentionStore::new(kv.clone(), bucket),
            legacy_notification_store: legacy_notification_bucket
                .map(|b| RetentionStore::new(kv, b)),
            retention,
        }
    }

    /// `true` if `id` already has a persisted record in the action store
    /// or, if configured, the legacy notification store.
    async fn already_processed(&self, id: &str) -> Result<bool, ControlError> {
        if self.action_store.contains(id).await? {
            return Ok(true);
        }
        if let Some(legacy) = &self.legacy_notification_store {
            if legacy.contains(id).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn process_one(&self, action: Action, raw_element: serde_json::Value, now: DateTime<Utc>) {
        if !action.is_valid(now) {
            debug!(target: "control_service.actions", id = %action.id, "dropping invalid action");
            return;
        }

        match self.already_processed(&action.id).await {
            Ok(true) => {
                debug!(target: "control_service.actions", id = %action.id, "duplicate action, dropping");
                return;
            }
            Ok(false) => {}
            Err(err) => {
                warn!(target: "control_service.actions", id = %action.id, error = %err, "novelty check failed");
                return;
            }
        }

        if action.type_.is_empty() {
            debug!(target: "control_service.actions", id = %action.id, "action has no type, dropping");
            return;
        }
        let Some(actor) = self.actors.get(&action.type_).await else {
            warn!(target: "control_service.actions", id = %action.id, type_ = %action.type_, "no actor registered for type");
            return;
        };

        let payload = match serde_json::to_vec(&raw_element) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(target: "control_service.actions", id = %action.id, error = %err, "failed to re-encode action for actor");
                return;
            }
        };

        if let Err(err) = actor.invoke(&payload).await {
            warn!(target: "control_service.actions", id = %action.id, type_ = %action.type_, error = %err, "actor invocation failed, will retry");
            return;
        }

        let mut applied = action;
        applied.processed_at = Some(now);
        let record = ActionRecord::from(&applied);
        if let Err(err) = self.action_store.put(&record.id, &record).await {
            warn!(target: "control_service.actions", id = %record.id, error = %err, "failed to persist action record");
        }
    }

    /// Run the periodic retention sweep until `handle` is cancelled.
    pub async fn run_cleanup(&self, handle: CancellationHandle, interval: std::time::Duration) {
        let retention = self.retention;
        cs_cancel::run_periodic(handle, interval, || {
            let store = &self.action_store;
            async move {
                let now = Utc::now();
                match store
                    .sweep::<ActionRecord>(move |rec| is_record_expired(rec, now, retention))
                    .await
                {
                    Ok(count) if count > 0 => {
                        debug!(target: "control_service.actions", count, "swept expired action records");
                    }
                    Ok(_) => {}
                    Err(err) => {
                        warn!(target: "control_service.actions", error = %err, "action record sweep failed");
                    }
                }
            }
        })
        .await;
    }
}

fn is_record_expired(record: &ActionRecord, now: DateTime<Utc>, retention: Duration) -> bool {
    record.processed_at + retention <= now
}

#[async_trait]
impl Consumer for ActionQueue {
    async fn update(&self, payload: &[u8]) -> Result<(), ControlError> {
        let elements: Vec<serde_json::Value> = serde_json::from_slice(payload).map_err(|e| {
            ControlError::new(ErrorCode::DecodePayloadInvalid, "actions payload is not a JSON array")
                .with_source(e)
        })?;

        let now = Utc::now();
        for element in elements {
            match serde_json::from_value::<Action>(element.clone()) {
                Ok(action) => self.process_one(action, element, now).await,
                Err(err) => {
                    warn!(target: "control_service.actions", error = %err, "skipping undecodable action element");
                }
            }
        }
        Ok(())
    }
}
