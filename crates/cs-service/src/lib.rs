// SPDX-License-Identifier: MIT OR Apache-2.0
//! cs-service
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! The control service core: owns the fetch loop, ticker acceleration,
//! manifest diffing against the `last_fetched` cache, and dispatch into
//! the [`ConsumerRegistry`]. Wired into a run group through [`Supervised`].

use cs_core::kv::{buckets, KvStore};
use cs_core::manifest::decode_manifest;
use cs_core::supervise::Supervised;
use cs_core::SubsystemName;
use cs_cancel::{CancellationHandle, InterruptGuard};
use cs_error::ControlError;
use cs_registry::ConsumerRegistry;
use cs_transport::ControlTransport;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Steady-state and acceleration tuning for the fetch loop.
#[derive(Debug, Clone, Copy)]
pub struct FetchLoopConfig {
    /// Interval between fetches absent any acceleration. Default 60 s.
    pub request_interval: Duration,
    /// Floor below which an accelerated interval will not be clamped.
    /// Default 5 s.
    pub min_acceleration_interval: Duration,
}

impl Default for FetchLoopConfig {
    fn default() -> Self {
        Self {
            request_interval: Duration::from_secs(60),
            min_acceleration_interval: Duration::from_secs(5),
        }
    }
}

/// The control service core.
pub struct ControlService {
    transport: Arc<ControlTransport>,
    registry: Arc<ConsumerRegistry>,
    kv: Arc<dyn KvStore>,
    config: FetchLoopConfig,
    last_fetched: RwLock<BTreeMap<SubsystemName, String>>,
    fetch_lock: Mutex<()>,
    current_interval: Arc<Mutex<Duration>>,
    acceleration_timer: Mutex<Option<CancellationHandle>>,
    cancel: CancellationHandle,
    interrupt_guard: InterruptGuard,
}

impl ControlService {
    /// Build a service over `transport`/`registry`/`kv`, deriving its
    /// cancellation from `parent`.
    pub fn new(
        transport: Arc<ControlTransport>,
        registry: Arc<ConsumerRegistry>,
        kv: Arc<dyn KvStore>,
        config: FetchLoopConfig,
        parent: &CancellationHandle,
    ) -> Self {
        let request_interval = config.request_interval;
        Self {
            transport,
            registry,
            kv,
            config,
            last_fetched: RwLock::new(BTreeMap::new()),
            fetch_lock: Mutex::new(()),
            current_interval: Arc::new(Mutex::new(request_interval)),
            acceleration_timer: Mutex::new(None),
            cancel: parent.child(),
            interrupt_guard: InterruptGuard::new(),
        }
    }

    async fn persisted_hash(&self, subsystem: &str) -> Option<String> {
        self.kv
            .get(buckets::CONTROL_SERVICE_DATA, subsystem.as_bytes())
            .await
            .ok()
            .flatten()
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
    }

    async fn last(&self, subsystem: &str) -> Option<String> {
        if let Some(hash) = self.last_fetched.read().await.get(subsystem).cloned() {
            return Some(hash);
        }
        let persisted = self.persisted_hash(subsystem).await;
        if let Some(hash) = &persisted {
            self.last_fetched
                .write()
                .await
                .insert(subsystem.to_string(), hash.clone());
        }
        persisted
    }

    async fn record(&self, subsystem: &str, hash: &str) {
        self.last_fetched
            .write()
            .await
            .insert(subsystem.to_string(), hash.to_string());
        if let Err(err) = self
            .kv
            .set(buckets::CONTROL_SERVICE_DATA, subsystem.as_bytes(), hash.as_bytes())
            .await
        {
            warn!(target: "control_service.core", subsystem, error = %err, "failed to mirror last_fetched to kv");
        }
    }

    /// Run one fetch: manifest, then each changed subsystem's blob,
    /// dispatched through the registry. Serialized against concurrent
    /// fetches by `fetch_lock`.
    pub async fn fetch(&self, force: bool) {
        let _guard = self.fetch_lock.lock().await;

        let manifest_bytes = match self.transport.get_config().await {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(target: "control_service.core", error = %err, "manifest fetch failed, will retry next tick");
                return;
            }
        };
        let manifest = match decode_manifest(&manifest_bytes) {
            Ok(m) => m,
            Err(err) => {
                warn!(target: "control_service.core", error = %err, "manifest decode failed, will retry next tick");
                return;
            }
        };

        for (subsystem, hash) in manifest {
            let last = self.last(&subsystem).await;
            if !force && last.as_deref() == Some(hash.as_str()) {
                continue;
            }

            let body = match self.transport.get_subsystem_data(&hash).await {
                Ok(body) => body,
                Err(err) => {
                    warn!(target: "control_service.core", subsystem = %subsystem, error = %err, "subsystem fetch failed, skipping");
                    continue;
                }
            };

            if let Err(err) = self.registry.update(&subsystem, &body).await {
                warn!(target: "control_service.core", subsystem = %subsystem, error = %err, "consumer update failed");
            }
            // Record the hash whether or not the consumer succeeded: a
            // poison payload has a fixed hash and retrying it wastes
            // work, while a corrected payload will carry a new one.
            self.record(&subsystem, &hash).await;
        }

        debug!(target: "control_service.core", "fetch complete");
    }

    /// Accelerate the fetch interval to `interval` for `duration`,
    /// fetching once immediately. After `duration` elapses the interval
    /// reverts to the configured steady-state value.
    pub async fn accelerate(&self, interval: Duration, duration: Duration) {
        self.fetch(true).await;

        let clamped = if interval < self.config.min_acceleration_interval {
            warn!(
                target: "control_service.core",
                requested_ms = interval.as_millis() as u64,
                floor_ms = self.config.min_acceleration_interval.as_millis() as u64,
                "clamping accelerated interval to the floor"
            );
            self.config.min_acceleration_interval
        } else {
            interval
        };

        if let Some(previous) = self.acceleration_timer.lock().await.take() {
            previous.cancel();
        }
        let timer_handle = self.cancel.child();
        *self.acceleration_timer.lock().await = Some(timer_handle.clone());

        *self.current_interval.lock().await = clamped;

        let current_interval = self.current_interval.clone();
        let request_interval = self.config.request_interval;
        tokio::spawn(async move {
            tokio::select! {
                _ = timer_handle.cancelled() => {}
                _ = tokio::time::sleep(duration) => {
                    *current_interval.lock().await = request_interval;
                }
            }
        });
    }

    /// Run the fetch loop: fetch immediately, then on every tick, until
    /// cancelled.
    pub async fn run(&self) {
        self.fetch(false).await;
        loop {
            let interval = *self.current_interval.lock().await;
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!(target: "control_service.core", "fetch loop exiting on cancellation");
                    return;
                }
                _ = tokio::time::sleep(interval) => {
                    self.fetch(false).await;
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl Supervised for ControlService {
    async fn execute(&self) -> Result<(), ControlError> {
        self.run().await;
        Ok(())
    }

    fn interrupt(&self, _err: Option<&ControlError>) {
        let cancel = self.cancel.clone();
        self.interrupt_guard.fire(|| cancel.cancel());
    }
}
