// SPDX-License-Identifier: MIT OR Apache-2.0
//! cs-kv-memory
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! An in-memory [`KvStore`] for tests and local development. The on-disk
//! (bbolt) implementation this stands in for is out of scope for this
//! repository; this type only needs to satisfy the same contract so the
//! rest of the control service can be exercised without a real database.

use async_trait::async_trait;
use cs_core::KvStore;
use cs_error::{ControlError, ErrorCode};
use std::collections::BTreeMap;
use tokio::sync::Mutex;

/// An in-memory, process-local [`KvStore`]. Cheap to clone; clones share
/// the same underlying buckets.
#[derive(Clone, Default)]
pub struct MemoryKvStore {
    buckets: std::sync::Arc<Mutex<BTreeMap<String, BTreeMap<Vec<u8>, Vec<u8>>>>>,
}

impl MemoryKvStore {
    /// A fresh store with no buckets.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, bucket: &str, key: &[u8]) -> Result<Option<Vec<u8>>, ControlError> {
        let buckets = self.buckets.lock().await;
        Ok(buckets.get(bucket).and_then(|b| b.get(key)).cloned())
    }

    async fn set(&self, bucket: &str, key: &[u8], value: &[u8]) -> Result<(), ControlError> {
        let mut buckets = self.buckets.lock().await;
        buckets
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, bucket: &str, keys: &[&[u8]]) -> Result<(), ControlError> {
        let mut buckets = self.buckets.lock().await;
        if let Some(b) = buckets.get_mut(bucket) {
            for key in keys {
                b.remove(*key);
            }
        }
        Ok(())
    }

    async fn for_each(
        &self,
        bucket: &str,
        f: &mut (dyn FnMut(&[u8], &[u8]) -> bool + Send),
    ) -> Result<(), ControlError> {
        let buckets = self.buckets.lock().await;
        let Some(b) = buckets.get(bucket) else {
            return Ok(());
        };
        // Snapshot under the lock so concurrent mutation never torn-reads.
        let snapshot: Vec<(Vec<u8>, Vec<u8>)> =
            b.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        drop(buckets);
        for (k, v) in snapshot {
            if f(&k, &v) {
                break;
            }
        }
        Ok(())
    }

    async fn bulk_update(
        &self,
        bucket: &str,
        pairs: &[(Vec<u8>, Vec<u8>)],
    ) -> Result<Vec<Vec<u8>>, ControlError> {
        let mut buckets = self.buckets.lock().await;
        let existing = buckets.entry(bucket.to_string()).or_default();
        let mut added = Vec::new();
        let mut replacement = BTreeMap::new();
        for (k, v) in pairs {
            if !existing.contains_key(k) {
                added.push(k.clone());
            }
            replacement.insert(k.clone(), v.clone());
        }
        *existing = replacement;
        Ok(added)
    }
}

/// Errors this implementation never actually produces, kept for parity
/// with a real backing store's failure modes.
pub fn simulated_io_error(context: &str) -> ControlError {
    ControlError::new(ErrorCode::KvOperationFailed, "simulated I/O failure")
        .with_context("context", context)
}
