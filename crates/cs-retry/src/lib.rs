// SPDX-License-Identifier: MIT OR Apache-2.0
//! cs-retry
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Exponential backoff with jitter, used in exactly two places: the bounded
//! signer retry (total budget ≈ 1 s, since hardware signing can transiently
//! fail) and, at a caller's discretion, other transient transport calls.
//! Retries never live inside the fetch loop's handlers — only at the
//! cadence of an explicit, bounded retry budget like this one.

use cs_error::{ControlError, ErrorCategory};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, warn};

/// Configuration for a bounded exponential-backoff retry loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts after the initial attempt. `0`
    /// means only the initial attempt (no retries).
    pub max_retries: u32,
    /// Base delay for exponential backoff.
    #[serde(with = "duration_millis")]
    pub base_delay: Duration,
    /// Maximum delay cap for exponential backoff.
    #[serde(with = "duration_millis")]
    pub max_delay: Duration,
    /// Overall wall-clock timeout across all attempts.
    #[serde(with = "duration_millis")]
    pub overall_timeout: Duration,
    /// Jitter factor in `[0.0, 1.0]`. 0 = no jitter, 1 = full jitter.
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(400),
            overall_timeout: Duration::from_secs(1),
            jitter_factor: 0.5,
        }
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(val: &Duration, ser: S) -> Result<S::Ok, S::Error> {
        val.as_millis().serialize(ser)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Duration, D::Error> {
        let ms: u64 = u64::deserialize(de)?;
        Ok(Duration::from_millis(ms))
    }
}

/// Compute the backoff delay for a given zero-indexed attempt number.
pub fn compute_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let exp = 2u64.saturating_pow(attempt);
    let delay_ms = (config.base_delay.as_millis() as u64).saturating_mul(exp);
    let capped_ms = delay_ms.min(config.max_delay.as_millis() as u64);

    let jitter_factor = config.jitter_factor.clamp(0.0, 1.0);
    if jitter_factor > 0.0 && capped_ms > 0 {
        let jitter_range = (capped_ms as f64 * jitter_factor) as u64;
        let nanos = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos() as u64;
        let pseudo = nanos.wrapping_mul(attempt as u64 + 1);
        let jitter = if jitter_range > 0 {
            pseudo % jitter_range
        } else {
            0
        };
        Duration::from_millis(capped_ms.saturating_sub(jitter))
    } else {
        Duration::from_millis(capped_ms)
    }
}

/// `true` for categories expected to be transient: transport and signer
/// failures. Decode/validation/consumer/config errors are not retried here
/// — they retry (if at all) at the fetch loop's cadence, not inside a
/// handler.
pub fn is_retryable(err: &ControlError) -> bool {
    matches!(err.category(), ErrorCategory::Transport | ErrorCategory::Signer)
}

/// Run `op` up to `max_retries + 1` times with exponential backoff,
/// returning the first success or the last (or first non-retryable) error.
pub async fn retry_async<T, F, Fut>(
    config: &RetryConfig,
    mut op: F,
    retryable: fn(&ControlError) -> bool,
) -> Result<T, ControlError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ControlError>>,
{
    let start = Instant::now();
    let max_attempts = config.max_retries + 1;

    for attempt in 0..max_attempts {
        if start.elapsed() >= config.overall_timeout {
            warn!(target: "control_service.retry", attempt, "overall timeout exceeded");
            return Err(ControlError::new(
                cs_error::ErrorCode::SignerFailed,
                "retry budget exhausted",
            ));
        }

        debug!(target: "control_service.retry", attempt, max_attempts, "attempting operation");

        match op().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(
                        target: "control_service.retry",
                        attempt,
                        total_duration_ms = start.elapsed().as_millis() as u64,
                        "operation succeeded after retry"
                    );
                }
                return Ok(value);
            }
            Err(err) => {
                let is_last = attempt + 1 >= max_attempts;

                if !retryable(&err) {
                    debug!(target: "control_service.retry", error = %err, "non-retryable error, giving up");
                    return Err(err);
                }
                if is_last {
                    warn!(target: "control_service.retry", error = %err, attempt, "max retries exhausted");
                    return Err(err);
                }

                let delay = compute_delay(config, attempt);
                warn!(
                    target: "control_service.retry",
                    error = %err,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "retryable error, backing off"
                );

                let remaining = config.overall_timeout.saturating_sub(start.elapsed());
                if delay > remaining {
                    return Err(err);
                }
                tokio::time::sleep(delay).await;
            }
        }
    }

    unreachable!("loop always returns within max_attempts iterations")
}

#[cfg(test)]
mod tests {
    use super::*;
    use cs_error::ErrorCode;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn compute_delay_grows_exponentially_before_cap() {
        let config = RetryConfig {
            jitter_factor: 0.0,
            ..RetryConfig::default()
        };
        assert_eq!(compute_delay(&config, 0), Duration::from_millis(50));
        assert_eq!(compute_delay(&config, 1), Duration::from_millis(100));
        assert_eq!(compute_delay(&config, 2), Duration::from_millis(200));
        assert_eq!(compute_delay(&config, 3), Duration::from_millis(400));
        assert_eq!(compute_delay(&config, 10), config.max_delay);
    }

    #[test]
    fn compute_delay_with_jitter_never_exceeds_cap() {
        let config = RetryConfig::default();
        for attempt in 0..8 {
            let delay = compute_delay(&config, attempt);
            assert!(delay <= config.max_delay);
        }
    }

    #[test]
    fn transport_and_signer_errors_are_retryable() {
        assert!(is_retryable(&ControlError::new(
            ErrorCode::TransportNetwork,
            "x"
        )));
        assert!(is_retryable(&ControlError::new(ErrorCode::SignerFailed, "x")));
        assert!(!is_retryable(&ControlError::new(
            ErrorCode::ValidationExpired,
            "x"
        )));
        assert!(!is_retryable(&ControlError::new(ErrorCode::ConsumerFailed, "x")));
    }

    #[tokio::test]
    async fn retry_async_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let config = RetryConfig {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            overall_timeout: Duration::from_secs(1),
            ..RetryConfig::default()
        };
        let result = retry_async(
            &config,
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(ControlError::new(ErrorCode::TransportNetwork, "flaky"))
                    } else {
                        Ok(42)
                    }
                }
            },
            is_retryable,
        )
        .await
        .unwrap();
        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_async_gives_up_immediately_on_non_retryable_error() {
        let calls = AtomicU32::new(0);
        let config = RetryConfig::default();
        let err = retry_async(
            &config,
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(ControlError::new(ErrorCode::ConsumerFailed, "nope")) }
            },
            is_retryable,
        )
        .await
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::ConsumerFailed);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retry_async_exhausts_budget_and_returns_last_error() {
        let calls = AtomicU32::new(0);
        let config = RetryConfig {
            max_retries: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            overall_timeout: Duration::from_secs(1),
            ..RetryConfig::default()
        };
        let err = retry_async(
            &config,
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(ControlError::new(ErrorCode::TransportNetwork, "down")) }
            },
            is_retryable,
        )
        .await
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::TransportNetwork);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
