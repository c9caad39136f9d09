// SPDX-License-Identifier: MIT OR Apache-2.0
//! cs-notify
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! The notification consumer: a [`Consumer`] that decodes a JSON array of
//! [`Notification`]s, validates and deduplicates each against the
//! persistent seen-set, and delivers novel ones to an external
//! [`Notifier`] collaborator. A record is persisted only after a
//! successful delivery, so a failed delivery can be retried on the next
//! fetch.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cs_cancel::CancellationHandle;
use cs_core::validate::is_valid_action_uri;
use cs_core::{Consumer, Notification};
use cs_dedupe::CommandDeduper;
use cs_error::{ControlError, ErrorCode};
use tracing::{debug, warn};

/// External collaborator that delivers a notification to the OS.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Attempt to show `notification` to the user.
    async fn notify(&self, notification: &Notification) -> Result<(), ControlError>;
}

/// The notification consumer.
pub struct NotificationConsumer<N: Notifier> {
    notifier: N,
    deduper: CommandDeduper,
}

impl<N: Notifier> NotificationConsumer<N> {
    /// Build a consumer delivering through `notifier`, backed by
    /// `deduper`'s seen-set.
    pub fn new(notifier: N, deduper: CommandDeduper) -> Self {
        Self { notifier, deduper }
    }

    fn validate(notification: &Notification, now: DateTime<Utc>) -> bool {
        if notification.title.is_empty() || notification.body.is_empty() {
            return false;
        }
        if notification.valid_until <= now.timestamp() {
            return false;
        }
        is_valid_action_uri(notification.action_uri.as_deref())
    }

    async fn process_one(&self, mut notification: Notification, now: DateTime<Utc>) {
        if !Self::validate(&notification, now) {
            debug!(target: "control_service.notify", id = %notification.id, "dropping invalid notification");
            return;
        }

        match self.deduper.is_duplicate(&notification.id, now).await {
            Ok(true) => {
                debug!(target: "control_service.notify", id = %notification.id, "duplicate notification, dropping");
                return;
            }
            Ok(false) => {}
            Err(err) => {
                warn!(target: "control_service.notify", id = %notification.id, error = %err, "seen-set lookup failed");
                return;
            }
        }

        if let Err(err) = self.notifier.notify(&notification).await {
            warn!(target: "control_service.notify", id = %notification.id, error = %err, "delivery failed, will retry");
            return;
        }

        notification.sent_at = Some(now);
        if let Err(err) = self
            .deduper
            .observe(&notification.id, notification.valid_until, now)
            .await
        {
            warn!(target: "control_service.notify", id = %notification.id, error = %err, "failed to persist delivery record");
        }
    }

    /// Run the periodic retention sweep until `handle` is cancelled.
    pub async fn run_cleanup(&self, handle: CancellationHandle, interval: std::time::Duration) {
        cs_cancel::run_periodic(handle, interval, || async {
            match self.deduper.sweep(Utc::now()).await {
                Ok(count) if count > 0 => {
                    debug!(target: "control_service.notify", count, "swept expired notification records");
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(target: "control_service.notify", error = %err, "notification record sweep failed");
                }
            }
        })
        .await;
    }
}

#[async_trait]
impl<N: Notifier> Consumer for NotificationConsumer<N> {
    async fn update(&self, payload: &[u8]) -> Result<(), ControlError> {
        let notifications: Vec<serde_json::Value> = serde_json::from_slice(payload).map_err(|e| {
            ControlError::new(ErrorCode::DecodePayloadInvalid, "notifications payload is not a JSON array")
                .with_source(e)
        })?;

        let now = Utc::now();
        for element in notifications {
            match serde_json::from_value::<Notification>(element) {
                Ok(notification) => self.process_one(notification, now).await,
                Err(err) => {
                    warn!(target: "control_service.notify", error = %err, "skipping undecodable notification element");
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use cs_kv_memory::MemoryKvStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn notification(id: &str, valid_until: i64) -> Notification {
        Notification {
            id: id.to_string(),
            title: "T".into(),
            body: "B".into(),
            valid_until,
            action_uri: None,
            sent_at: None,
        }
    }

    struct RecordingNotifier {
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, _notification: &Notification) -> Result<(), ControlError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(ControlError::new(ErrorCode::ConsumerFailed, "notifier failed"))
            } else {
                Ok(())
            }
        }
    }

    fn consumer(fail: bool) -> (NotificationConsumer<RecordingNotifier>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let deduper = CommandDeduper::new(Arc::new(MemoryKvStore::new()), "notify_bucket", Duration::days(183));
        let consumer = NotificationConsumer::new(RecordingNotifier { calls: calls.clone(), fail }, deduper);
        (consumer, calls)
    }

    #[tokio::test]
    async fn delivers_valid_notification_and_persists() {
        let (consumer, calls) = consumer(false);
        let now = Utc::now();
        let payload = serde_json::to_vec(&vec![notification("n1", now.timestamp() + 60)]).unwrap();
        consumer.update(&payload).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(consumer.deduper.is_duplicate("n1", now).await.unwrap());
    }

    #[tokio::test]
    async fn duplicate_notification_is_not_redelivered() {
        let (consumer, calls) = consumer(false);
        let now = Utc::now();
        let payload = serde_json::to_vec(&vec![notification("n1", now.timestamp() + 60)]).unwrap();
        consumer.update(&payload).await.unwrap();
        consumer.update(&payload).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_delivery_does_not_persist_so_retry_is_possible() {
        let (consumer, calls) = consumer(true);
        let now = Utc::now();
        let payload = serde_json::to_vec(&vec![notification("n1", now.timestamp() + 60)]).unwrap();
        consumer.update(&payload).await.unwrap();
        consumer.update(&payload).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn empty_title_is_rejected() {
        let (consumer, calls) = consumer(false);
        let mut n = notification("n1", Utc::now().timestamp() + 60);
        n.title = String::new();
        let payload = serde_json::to_vec(&vec![n]).unwrap();
        consumer.update(&payload).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn expired_notification_is_rejected() {
        let (consumer, calls) = consumer(false);
        let n = notification("n1", 1);
        let payload = serde_json::to_vec(&vec![n]).unwrap();
        consumer.update(&payload).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn invalid_action_uri_scheme_is_rejected() {
        let (consumer, calls) = consumer(false);
        let mut n = notification("n1", Utc::now().timestamp() + 60);
        n.action_uri = Some("ftp://example.com/x".into());
        let payload = serde_json::to_vec(&vec![n]).unwrap();
        consumer.update(&payload).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn one_bad_element_does_not_abort_the_rest() {
        let (consumer, calls) = consumer(false);
        let now = Utc::now();
        let good = serde_json::to_value(notification("n1", now.timestamp() + 60)).unwrap();
        let bad = serde_json::json!({"nope": true});
        let payload = serde_json::to_vec(&vec![bad, good]).unwrap();
        consumer.update(&payload).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
