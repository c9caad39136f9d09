// SPDX-License-Identifier: MIT OR Apache-2.0
//! The run-group supervision contract: `Execute`/`Interrupt` so independent
//! long-running components (the fetch loop, the action-queue cleanup
//! sweeper, the notification cleanup sweeper) can be driven by a common
//! supervisor.

use async_trait::async_trait;
use cs_error::ControlError;

/// A long-running component that can be started and cooperatively
/// interrupted.
///
/// `execute` blocks until the component's work is done — either it runs to
/// completion on its own, or it observes an interrupt and unwinds. `interrupt`
/// must be idempotent: callable arbitrarily many times, including after the
/// component has already stopped, without deadlocking or panicking.
/// Implementations typically guard the signal with a one-shot atomic; see
/// `cs_cancel::InterruptGuard`.
#[async_trait]
pub trait Supervised: Send + Sync {
    /// Run until completion or until `interrupt` is observed.
    async fn execute(&self) -> Result<(), ControlError>;

    /// Signal the component to stop. Non-blocking, idempotent.
    fn interrupt(&self, err: Option<&ControlError>);
}
