// SPDX-License-Identifier: MIT OR Apache-2.0
//! Duck-typed dispatch capabilities.
//!
//! The registry in `cs-registry` keys [`Consumer`]s and [`Subscriber`]s by
//! subsystem name; the action queue in `cs-actions` keys [`Actor`]s by
//! action `type`. A type can implement more than one of these traits if it
//! plays more than one role.

use async_trait::async_trait;
use cs_error::ControlError;

/// The single in-process recipient for a subsystem's payload.
///
/// `update` is handed the raw payload bytes for the subsystem's latest
/// content hash. Returning `Err` does not prevent `last_fetched` from being
/// advanced (see the control service core); it only suppresses subscriber
/// pings for this update.
#[async_trait]
pub trait Consumer: Send + Sync {
    /// Apply `payload` to this subsystem's local state.
    async fn update(&self, payload: &[u8]) -> Result<(), ControlError>;
}

/// An observer that wants to know a subsystem *changed*, not what changed.
///
/// Pings are best-effort: a subscriber must not block the registry for
/// longer than a short constant, and a failing ping must not propagate to
/// the fetch loop.
#[async_trait]
pub trait Subscriber: Send + Sync {
    /// Notify the subscriber that its subsystem was updated.
    async fn ping(&self);
}

/// A handler dispatched from the action queue by [`Action::type_`].
///
/// [`Action::type_`]: crate::Action::type_
#[async_trait]
pub trait Actor: Send + Sync {
    /// Apply the raw bytes of a single decoded action element.
    async fn invoke(&self, payload: &[u8]) -> Result<(), ControlError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use cs_error::ErrorCode;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingConsumer(Arc<AtomicUsize>);

    #[async_trait]
    impl Consumer for CountingConsumer {
        async fn update(&self, _payload: &[u8]) -> Result<(), ControlError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingConsumer;

    #[async_trait]
    impl Consumer for FailingConsumer {
        async fn update(&self, _payload: &[u8]) -> Result<(), ControlError> {
            Err(ControlError::new(ErrorCode::ConsumerFailed, "boom"))
        }
    }

    struct CountingSubscriber(Arc<AtomicUsize>);

    #[async_trait]
    impl Subscriber for CountingSubscriber {
        async fn ping(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn consumer_update_runs_and_counts() {
        let counter = Arc::new(AtomicUsize::new(0));
        let consumer = CountingConsumer(counter.clone());
        consumer.update(b"{}").await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failing_consumer_returns_err() {
        let err = FailingConsumer.update(b"{}").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ConsumerFailed);
    }

    #[tokio::test]
    async fn subscriber_ping_runs() {
        let counter = Arc::new(AtomicUsize::new(0));
        let sub = CountingSubscriber(counter.clone());
        sub.ping().await;
        sub.ping().await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }
}
