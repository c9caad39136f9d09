// SPDX-License-Identifier: MIT OR Apache-2.0
//! cs-cancel
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Cooperative cancellation for supervised long-running tasks: the fetch
//! loop, the action-queue cleanup sweeper, and the notification cleanup
//! sweeper each own a [`CancellationHandle`] derived from a parent supplied
//! by the supervisor, plus an [`InterruptGuard`] so their `Interrupt` is
//! safe to call any number of times.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A scoped cancellation handle.
///
/// Cloning shares the same underlying signal; [`CancellationHandle::child`]
/// derives a handle that is cancelled whenever its parent is, but can also
/// be cancelled independently without affecting the parent or siblings.
#[derive(Clone, Debug)]
pub struct CancellationHandle {
    token: CancellationToken,
}

impl CancellationHandle {
    /// A fresh, unlinked handle (typically held by the top-level
    /// supervisor).
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// A handle that is cancelled whenever `self` is cancelled, but may
    /// also be cancelled on its own without affecting `self`.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
        }
    }

    /// Signal cancellation. Idempotent: cancelling twice is a no-op the
    /// second time.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// `true` once `cancel` has been observed on this handle or an
    /// ancestor.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once `cancel` has been observed on this handle or an
    /// ancestor. Intended for `tokio::select!` alongside a ticker or
    /// socket read.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }
}

impl Default for CancellationHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// A one-shot guard making a shutdown signal idempotent.
///
/// A supervised component's `interrupt` must tolerate being called
/// repeatedly, concurrently, and after the component has already stopped.
/// Wrap the actual interrupt side effect (cancelling a handle, closing a
/// channel) in [`InterruptGuard::fire`] so it only runs once.
#[derive(Debug)]
pub struct InterruptGuard {
    fired: Arc<AtomicBool>,
}

impl InterruptGuard {
    /// A fresh, not-yet-fired guard.
    pub fn new() -> Self {
        Self {
            fired: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Run `action` exactly once across any number of calls to `fire`,
    /// including concurrent ones. Returns `true` if this call was the one
    /// that ran `action`.
    pub fn fire(&self, action: impl FnOnce()) -> bool {
        let already_fired = self.fired.swap(true, Ordering::SeqCst);
        if !already_fired {
            action();
        }
        !already_fired
    }

    /// `true` once [`Self::fire`] has run (by any caller).
    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }
}

impl Default for InterruptGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for InterruptGuard {
    fn clone(&self) -> Self {
        Self {
            fired: self.fired.clone(),
        }
    }
}

/// Run `tick` on a fixed `interval` until `handle` is cancelled.
///
/// The first tick fires after `interval` has elapsed, not immediately.
/// Shared by every periodic sweeper (command dedupe, action-queue cleanup,
/// notification cleanup) so each one only has to supply the body.
pub async fn run_periodic<F, Fut>(handle: CancellationHandle, interval: std::time::Duration, mut tick: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = handle.cancelled() => return,
            _ = ticker.tick() => tick().await,
        }
    }
}
