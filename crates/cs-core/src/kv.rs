// SPDX-License-Identifier: MIT OR Apache-2.0
//! The key-value store contract.
//!
//! Operations are synchronous and atomic per call; `for_each` must observe
//! a consistent snapshot of the bucket, or the implementation must say so.
//! There are no ordering guarantees across buckets. The on-disk (bbolt)
//! implementation is out of scope here — this crate only defines the
//! interface that `cs-kv-memory` (a test double) and a real implementation
//! both satisfy.

use async_trait::async_trait;
use cs_error::ControlError;

/// One named bucket: a flat `{bytes -> bytes}` map.
///
/// Implementations are expected to be cheap to clone/share (e.g. an `Arc`
/// internally) since every consumer and cleanup task holds one.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Fetch the value for `key` in `bucket`, or `None` if absent.
    async fn get(&self, bucket: &str, key: &[u8]) -> Result<Option<Vec<u8>>, ControlError>;

    /// Write `value` under `key` in `bucket`, creating the bucket if
    /// necessary.
    async fn set(&self, bucket: &str, key: &[u8], value: &[u8]) -> Result<(), ControlError>;

    /// Delete zero or more keys from `bucket`. Deleting an absent key is
    /// not an error.
    async fn delete(&self, bucket: &str, keys: &[&[u8]]) -> Result<(), ControlError>;

    /// Visit every `(key, value)` pair in `bucket`. `f` returns `true` to
    /// stop iteration early. A finite, single-pass, non-restartable
    /// traversal: callers that need a list snapshot must collect keys
    /// before mutating the bucket.
    async fn for_each(
        &self,
        bucket: &str,
        f: &mut (dyn FnMut(&[u8], &[u8]) -> bool + Send),
    ) -> Result<(), ControlError>;

    /// Atomically replace the contents of `bucket` with `pairs`: existing
    /// keys not present in `pairs` are deleted. Returns the keys that were
    /// newly added (present in `pairs` but not previously in the bucket).
    async fn bulk_update(
        &self,
        bucket: &str,
        pairs: &[(Vec<u8>, Vec<u8>)],
    ) -> Result<Vec<Vec<u8>>, ControlError>;
}

/// Named buckets over the KV store. Each is a flat `{bytes -> bytes}` map;
/// semantics of contents are component-specific.
pub mod buckets {
    /// Raw config blobs as last received from the server, keyed by
    /// subsystem.
    pub const CONFIG: &str = "config";
    /// Flattened `{string -> json-string}` agent flags.
    pub const AGENT_FLAGS: &str = "agent_flags";
    /// `last_fetched` mirror and other control-service bookkeeping.
    pub const CONTROL_SERVICE_DATA: &str = "control_service_data";
    /// Initial osquery result snapshot.
    pub const INITIAL_RESULTS: &str = "initial_results";
    /// Rolling osquery result log.
    pub const RESULT_LOGS: &str = "result_logs";
    /// History of osquery instance identifiers.
    pub const OSQUERY_INSTANCE_HISTORY: &str = "osquery_instance_history";
    /// Delivered-notification seen-set records.
    pub const SENT_NOTIFICATIONS: &str = "sent_notifications";
    /// Rolling agent status log.
    pub const STATUS_LOGS: &str = "status_logs";
    /// Opaque server-provided blobs not modeled elsewhere.
    pub const SERVER_PROVIDED_DATA: &str = "server_provided_data";
    /// Host identity (serial, hardware UUID, tenant) used by the reset
    /// guard.
    pub const HOST_DATA: &str = "host_data";
    /// Action-queue seen-set and `ActionRecord`s.
    pub const CONTROL_SERVER_ACTIONS: &str = "control_server_actions";
    /// Single-key secrets (e.g. the ingest token).
    pub const TOKEN_STORE: &str = "token_store";

    /// Every named bucket, for iteration by the reset guard's wipe.
    pub const ALL: &[&str] = &[
        CONFIG,
        AGENT_FLAGS,
        CONTROL_SERVICE_DATA,
        INITIAL_RESULTS,
        RESULT_LOGS,
        OSQUERY_INSTANCE_HISTORY,
        SENT_NOTIFICATIONS,
        STATUS_LOGS,
        SERVER_PROVIDED_DATA,
        HOST_DATA,
        CONTROL_SERVER_ACTIONS,
        TOKEN_STORE,
    ];
}
