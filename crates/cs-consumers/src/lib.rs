// SPDX-License-Identifier: MIT OR Apache-2.0
//! cs-consumers
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Three small consumers that project JSON key-value payloads somewhere
//! else: a [`BucketConsumer`] mirrors a payload into a KV bucket verbatim,
//! a [`ConfigConsumer`] re-encodes each value and hands the result to an
//! external flag-updater collaborator, and a [`TokenConsumer`] lifts a
//! single named secret out of its payload into a designated bucket. Each
//! is independent: a failure in one does not prevent the others from
//! being updated (enforced by the dispatch registry, not here).

use async_trait::async_trait;
use cs_core::kv::KvStore;
use cs_core::Consumer;
use cs_error::{ControlError, ErrorCode};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// A consumer that atomically mirrors a `{string -> string}` payload into
/// one KV bucket via [`KvStore::bulk_update`].
pub struct BucketConsumer {
    kv: Arc<dyn KvStore>,
    bucket: &'static str,
}

impl BucketConsumer {
    /// Bind a consumer to `bucket` on `kv`.
    pub fn new(kv: Arc<dyn KvStore>, bucket: &'static str) -> Self {
        Self { kv, bucket }
    }
}

#[async_trait]
impl Consumer for BucketConsumer {
    async fn update(&self, payload: &[u8]) -> Result<(), ControlError> {
        let map: BTreeMap<String, String> = serde_json::from_slice(payload).map_err(|e| {
            ControlError::new(ErrorCode::DecodePayloadInvalid, "bucket payload is not a JSON object of strings")
                .with_context("bucket", self.bucket)
                .with_source(e)
        })?;

        let pairs: Vec<(Vec<u8>, Vec<u8>)> = map
            .into_iter()
            .map(|(k, v)| (k.into_bytes(), v.into_bytes()))
            .collect();
        let added = self.kv.bulk_update(self.bucket, &pairs).await?;
        debug!(target: "control_service.consumers", bucket = self.bucket, added = added.len(), "bucket replaced");
        Ok(())
    }
}

/// External collaborator that applies a flattened `{string -> string}`
/// flag set.
#[async_trait]
pub trait FlagUpdater: Send + Sync {
    /// Apply the given flags, replacing any previous set.
    async fn update_flags(&self, flags: BTreeMap<String, String>) -> Result<(), ControlError>;
}

/// A consumer that decodes `{string -> any}`, re-encodes each value to
/// its JSON string form, and hands the result to a [`FlagUpdater`].
pub struct ConfigConsumer<F: FlagUpdater> {
    flag_updater: F,
}

impl<F: FlagUpdater> ConfigConsumer<F> {
    /// Build a consumer delivering through `flag_updater`.
    pub fn new(flag_updater: F) -> Self {
        Self { flag_updater }
    }
}

#[async_trait]
impl<F: FlagUpdater> Consumer for ConfigConsumer<F> {
    async fn update(&self, payload: &[u8]) -> Result<(), ControlError> {
        let map: BTreeMap<String, Value> = serde_json::from_slice(payload).map_err(|e| {
            ControlError::new(ErrorCode::DecodePayloadInvalid, "config payload is not a JSON object")
                .with_source(e)
        })?;

        let mut flags = BTreeMap::new();
        for (key, value) in map {
            let encoded = serde_json::to_string(&value).map_err(|e| {
                ControlError::new(ErrorCode::DecodePayloadInvalid, "failed to re-encode config value")
                    .with_context("key", &key)
                    .with_source(e)
            })?;
            flags.insert(key, encoded);
        }

        self.flag_updater.update_flags(flags).await
    }
}

/// A consumer that lifts `{ingest_token: string}` into a well-known key in
/// a designated bucket.
pub struct TokenConsumer {
    kv: Arc<dyn KvStore>,
    bucket: &'static str,
    key: &'static str,
}

/// The well-known key the ingest token is stored under.
pub const INGEST_TOKEN_KEY: &str = "ingest_token";

impl TokenConsumer {
    /// Build a consumer storing the decoded token under [`INGEST_TOKEN_KEY`]
    /// in `bucket` on `kv`.
    pub fn new(kv: Arc<dyn KvStore>, bucket: &'static str) -> Self {
        Self {
            kv,
            bucket,
            key: INGEST_TOKEN_KEY,
        }
    }
}

#[async_trait]
impl Consumer for TokenConsumer {
    async fn update(&self, payload: &[u8]) -> Result<(), ControlError> {
        #[derive(serde::Deserialize)]
        struct TokenPayload {
            ingest_token: String,
        }
        let decoded: TokenPayload = serde_json::from_slice(payload).map_err(|e| {
            ControlError::new(ErrorCode::DecodePayloadInvalid, "token payload is not {ingest_token: string}")
                .with_source(e)
        })?;

        self.kv
            .set(self.bucket, self.key.as_bytes(), decoded.ingest_token.as_bytes())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cs_kv_memory::MemoryKvStore;
    use std::sync::Mutex as StdMutex;

    #[tokio::test]
    async fn bucket_consumer_replaces_contents() {
        let kv = Arc::new(MemoryKvStore::new());
        kv.set("b", b"stale", b"old").await.unwrap();
        let consumer = BucketConsumer::new(kv.clone(), "b");

        let payload = serde_json::to_vec(&serde_json::json!({"fresh": "new"})).unwrap();
        consumer.update(&payload).await.unwrap();

        assert_eq!(kv.get("b", b"fresh").await.unwrap(), Some(b"new".to_vec()));
        assert_eq!(kv.get("b", b"stale").await.unwrap(), None);
    }

    #[tokio::test]
    async fn bucket_consumer_rejects_non_string_values() {
        let kv = Arc::new(MemoryKvStore::new());
        let consumer = BucketConsumer::new(kv, "b");
        let payload = serde_json::to_vec(&serde_json::json!({"a": 1})).unwrap();
        assert!(consumer.update(&payload).await.is_err());
    }

    struct RecordingFlagUpdater {
        seen: StdMutex<Option<BTreeMap<String, String>>>,
    }

    #[async_trait]
    impl FlagUpdater for &RecordingFlagUpdater {
        async fn update_flags(&self, flags: BTreeMap<String, String>) -> Result<(), ControlError> {
            *self.seen.lock().unwrap() = Some(flags);
            Ok(())
        }
    }

    #[tokio::test]
    async fn config_consumer_reencodes_values_as_json_strings() {
        let updater = RecordingFlagUpdater {
            seen: StdMutex::new(None),
        };
        let consumer = ConfigConsumer::new(&updater);
        let payload = serde_json::to_vec(&serde_json::json!({"debug": true, "level": 3})).unwrap();
        consumer.update(&payload).await.unwrap();

        let seen = updater.seen.lock().unwrap().clone().unwrap();
        assert_eq!(seen.get("debug"), Some(&"true".to_string()));
        assert_eq!(seen.get("level"), Some(&"3".to_string()));
    }

    #[tokio::test]
    async fn token_consumer_stores_ingest_token_under_well_known_key() {
        let kv = Arc::new(MemoryKvStore::new());
        let consumer = TokenConsumer::new(kv.clone(), "tokens");
        let payload = serde_json::to_vec(&serde_json::json!({"ingest_token": "secret"})).unwrap();
        consumer.update(&payload).await.unwrap();

        assert_eq!(
            kv.get("tokens", INGEST_TOKEN_KEY.as_bytes()).await.unwrap(),
            Some(b"secret".to_vec())
        );
    }

    #[tokio::test]
    async fn token_consumer_rejects_missing_field() {
        let kv = Arc::new(MemoryKvStore::new());
        let consumer = TokenConsumer::new(kv, "tokens");
        let payload = serde_json::to_vec(&serde_json::json!({"wrong": "x"})).unwrap();
        assert!(consumer.update(&payload).await.is_err());
    }
}
