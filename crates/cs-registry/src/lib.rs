// SPDX-License-Identifier: MIT OR Apache-2.0
//! cs-registry
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! The dispatch registry: at most one [`Consumer`] per subsystem name, and
//! any number of [`Subscriber`]s. Built at startup and effectively
//! read-only afterward; `update` is the one call on the hot path.

use async_trait::async_trait;
use cs_core::{Consumer, SubsystemName, Subscriber};
use cs_error::{ControlError, ErrorCode};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// The dispatch registry.
#[derive(Default)]
pub struct ConsumerRegistry {
    consumers: RwLock<BTreeMap<SubsystemName, Arc<dyn Consumer>>>,
    subscribers: RwLock<BTreeMap<SubsystemName, Vec<Arc<dyn Subscriber>>>>,
}

impl ConsumerRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `consumer` as the sole recipient for `subsystem`.
    ///
    /// Returns [`ErrorCode::ConsumerAlreadyRegistered`] if a consumer is
    /// already registered for this subsystem.
    pub async fn register_consumer(
        &self,
        subsystem: impl Into<SubsystemName>,
        consumer: Arc<dyn Consumer>,
    ) -> Result<(), ControlError> {
        let subsystem = subsystem.into();
        let mut consumers = self.consumers.write().await;
        if consumers.contains_key(&subsystem) {
            return Err(
                ControlError::new(ErrorCode::ConsumerAlreadyRegistered, "consumer already registered")
                    .with_subsystem(subsystem),
            );
        }
        consumers.insert(subsystem, consumer);
        Ok(())
    }

    /// Append `subscriber` to the list for `subsystem`. Safe to call
    /// repeatedly — this always appends rather than erroring, so callers
    /// that register the same subscriber twice will see it pinged twice.
    pub async fn register_subscriber(
        &self,
        subsystem: impl Into<SubsystemName>,
        subscriber: Arc<dyn Subscriber>,
    ) {
        let mut subscribers = self.subscribers.write().await;
        subscribers
            .entry(subsystem.into())
            .or_default()
            .push(subscriber);
    }

    /// Dispatch `payload` to `subsystem`'s consumer, if any, then ping its
    /// subscribers in registration order.
    ///
    /// If a consumer is registered and returns `Err`, subscribers are
    /// *not* pinged and the error is returned. If no consumer is
    /// registered, or the consumer succeeds, subscribers are pinged
    /// best-effort — a panicking or slow subscriber does not abort the
    /// update, but is the subscriber's own responsibility to avoid.
    pub async fn update(&self, subsystem: &str, payload: &[u8]) -> Result<(), ControlError> {
        let consumer = self.consumers.read().await.get(subsystem).cloned();

        if let Some(consumer) = consumer {
            if let Err(err) = consumer.update(payload).await {
                warn!(target: "control_service.registry", subsystem, error = %err, "consumer update failed");
                return Err(err);
            }
        } else {
            debug!(target: "control_service.registry", subsystem, "no consumer registered, pinging subscribers only");
        }

        let subscribers = self.subscribers.read().await.get(subsystem).cloned();
        if let Some(subscribers) = subscribers {
            for subscriber in subscribers {
                subscriber.ping().await;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cs_error::ErrorCode;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    struct RecordingConsumer {
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl Consumer for RecordingConsumer {
        async fn update(&self, _payload: &[u8]) -> Result<(), ControlError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(ControlError::new(ErrorCode::ConsumerFailed, "boom"))
            } else {
                Ok(())
            }
        }
    }

    struct OrderRecordingSubscriber {
        order: Arc<StdMutex<Vec<usize>>>,
        id: usize,
    }

    #[async_trait]
    impl Subscriber for OrderRecordingSubscriber {
        async fn ping(&self) {
            self.order.lock().unwrap().push(self.id);
        }
    }

    #[tokio::test]
    async fn registering_a_second_consumer_for_the_same_subsystem_errors() {
        let registry = ConsumerRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        registry
            .register_consumer("desktop", Arc::new(RecordingConsumer { calls: calls.clone(), fail: false }))
            .await
            .unwrap();
        let err = registry
            .register_consumer("desktop", Arc::new(RecordingConsumer { calls, fail: false }))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ConsumerAlreadyRegistered);
    }

    #[tokio::test]
    async fn update_with_no_consumer_still_pings_subscribers() {
        let registry = ConsumerRegistry::new();
        let pinged = Arc::new(AtomicUsize::new(0));
        struct CountingSub(Arc<AtomicUsize>);
        #[async_trait]
        impl Subscriber for CountingSub {
            async fn ping(&self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
        registry
            .register_subscriber("desktop", Arc::new(CountingSub(pinged.clone())))
            .await;
        registry.update("desktop", b"{}").await.unwrap();
        assert_eq!(pinged.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn successful_consumer_update_pings_subscribers_in_registration_order() {
        let registry = ConsumerRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        registry
            .register_consumer("desktop", Arc::new(RecordingConsumer { calls, fail: false }))
            .await
            .unwrap();

        let order = Arc::new(StdMutex::new(Vec::new()));
        for id in 0..3 {
            registry
                .register_subscriber("desktop", Arc::new(OrderRecordingSubscriber { order: order.clone(), id }))
                .await;
        }
        registry.update("desktop", b"{}").await.unwrap();
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn failing_consumer_update_does_not_ping_subscribers() {
        let registry = ConsumerRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        registry
            .register_consumer("desktop", Arc::new(RecordingConsumer { calls, fail: true }))
            .await
            .unwrap();
        let pinged = Arc::new(AtomicUsize::new(0));
        struct CountingSub(Arc<AtomicUsize>);
        #[async_trait]
        impl Subscriber for CountingSub {
            async fn ping(&self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
        registry
            .register_subscriber("desktop", Arc::new(CountingSub(pinged.clone())))
            .await;

        let err = registry.update("desktop", b"{}").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ConsumerFailed);
        assert_eq!(pinged.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn update_for_unknown_subsystem_with_no_subscribers_is_a_no_op() {
        let registry = ConsumerRegistry::new();
        registry.update("ghost", b"{}").await.unwrap();
    }
}
