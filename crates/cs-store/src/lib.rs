// SPDX-License-Identifier: MIT OR Apache-2.0
//! cs-store
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! A JSON-record retention store layered over [`KvStore`]: `get`/`put` a
//! single record by id, and `sweep` records whose age has exceeded a
//! retention window in one bucket iteration followed by one multi-delete —
//! the discipline the command deduper, action queue, and notification
//! consumer all share.

use cs_core::KvStore;
use cs_error::{ControlError, ErrorCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// A retention store bound to one bucket name.
#[derive(Clone)]
pub struct RetentionStore {
    kv: Arc<dyn KvStore>,
    bucket: &'static str,
}

impl RetentionStore {
    /// Bind a store to `bucket` on `kv`.
    pub fn new(kv: Arc<dyn KvStore>, bucket: &'static str) -> Self {
        Self { kv, bucket }
    }

    /// Fetch and JSON-decode the record stored under `id`, if any.
    pub async fn get<T: DeserializeOwned>(&self, id: &str) -> Result<Option<T>, ControlError> {
        let Some(bytes) = self.kv.get(self.bucket, id.as_bytes()).await? else {
            return Ok(None);
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| {
                ControlError::new(ErrorCode::KvOperationFailed, "stored record is not valid JSON")
                    .with_context("bucket", self.bucket)
                    .with_context("id", id)
                    .with_source(e)
            })
    }

    /// JSON-encode `record` and write it under `id`, overwriting any prior
    /// value.
    pub async fn put<T: Serialize>(&self, id: &str, record: &T) -> Result<(), ControlError> {
        let bytes = serde_json::to_vec(record).map_err(|e| {
            ControlError::new(ErrorCode::KvOperationFailed, "failed to encode record")
                .with_context("bucket", self.bucket)
                .with_source(e)
        })?;
        self.kv.set(self.bucket, id.as_bytes(), &bytes).await
    }

    /// `true` if a record exists for `id`.
    pub async fn contains(&self, id: &str) -> Result<bool, ControlError> {
        Ok(self.kv.get(self.bucket, id.as_bytes()).await?.is_some())
    }

    /// Single-pass sweep: collect every key whose decoded record
    /// satisfies `is_expired`, then delete them all in one call. Records
    /// that fail to decode are treated as expired (a corrupt record is not
    /// worth retaining).
    pub async fn sweep<T: DeserializeOwned>(
        &self,
        is_expired: impl Fn(&T) -> bool + Send + Sync,
    ) -> Result<usize, ControlError> {
        let mut expired_keys: Vec<Vec<u8>> = Vec::new();
        self.kv
            .for_each(self.bucket, &mut |key, value| {
                let expired = match serde_json::from_slice::<T>(value) {
                    Ok(record) => is_expired(&record),
                    Err(_) => true,
                };
                if expired {
                    expired_keys.push(key.to_vec());
                }
                false
            })
            .await?;

        let count = expired_keys.len();
        if count > 0 {
            let refs: Vec<&[u8]> = expired_keys.iter().map(|k| k.as_slice()).collect();
            self.kv.delete(self.bucket, &refs).await?;
            debug!(target: "control_service.store", bucket = self.bucket, count, "swept expired records");
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cs_kv_memory::MemoryKvStore;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Rec {
        value: i64,
    }

    fn store() -> RetentionStore {
        RetentionStore::new(Arc::new(MemoryKvStore::new()), "test_bucket")
    }

    #[tokio::test]
    async fn get_on_empty_store_is_none() {
        let s = store();
        assert_eq!(s.get::<Rec>("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let s = store();
        s.put("a", &Rec { value: 42 }).await.unwrap();
        assert_eq!(s.get::<Rec>("a").await.unwrap(), Some(Rec { value: 42 }));
        assert!(s.contains("a").await.unwrap());
        assert!(!s.contains("b").await.unwrap());
    }

    #[tokio::test]
    async fn sweep_deletes_only_expired_records() {
        let s = store();
        s.put("keep", &Rec { value: 1 }).await.unwrap();
        s.put("drop", &Rec { value: 99 }).await.unwrap();

        let deleted = s.sweep::<Rec>(|r| r.value > 50).await.unwrap();
        assert_eq!(deleted, 1);
        assert!(s.contains("keep").await.unwrap());
        assert!(!s.contains("drop").await.unwrap());
    }

    #[tokio::test]
    async fn sweep_with_nothing_expired_deletes_nothing() {
        let s = store();
        s.put("a", &Rec { value: 1 }).await.unwrap();
        let deleted = s.sweep::<Rec>(|_| false).await.unwrap();
        assert_eq!(deleted, 0);
        assert!(s.contains("a").await.unwrap());
    }

    #[tokio::test]
    async fn sweep_treats_corrupt_records_as_expired() {
        let kv = Arc::new(MemoryKvStore::new());
        kv.set("test_bucket", b"corrupt", b"not json").await.unwrap();
        let s = RetentionStore::new(kv, "test_bucket");
        let deleted = s.sweep::<Rec>(|_| false).await.unwrap();
        assert_eq!(deleted, 1);
    }
}
