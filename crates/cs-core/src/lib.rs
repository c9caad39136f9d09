// SPDX-License-Identifier: MIT OR Apache-2.0
//! cs-core
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Stable contract types and dispatch traits for the control service: the
//! [`Manifest`] the server advertises, the [`Action`] and [`Notification`]
//! payloads carried inside it, and the duck-typed [`Consumer`], [`Subscriber`],
//! and [`Actor`] capabilities that the dispatch registry and action queue key
//! on.
//!
//! If you only take one dependency to talk to the rest of the control
//! service, take this one.

/// Action and action-record types for the action-queue subsystem.
pub mod action;
/// The ordered byte-key to byte-value bucket contract (consumed only).
pub mod kv;
/// The subsystem-to-hash manifest returned by the management server.
pub mod manifest;
/// Notification and seen-record types for the notification consumer.
pub mod notification;
/// The digital-signature capability exposed by local/hardware signers.
pub mod signer;
/// The `Execute`/`Interrupt` run-group supervision contract.
pub mod supervise;
/// Dispatch traits: `Consumer`, `Subscriber`, `Actor`.
pub mod traits;
/// Shared validation helpers (expiry, non-empty fields, absolute URLs).
pub mod validate;

pub use action::{Action, ActionRecord};
pub use kv::KvStore;
pub use manifest::{ContentHash, Manifest, SubsystemName};
pub use notification::{Notification, SeenCommandRecord};
pub use signer::Signer;
pub use supervise::Supervised;
pub use traits::{Actor, Consumer, Subscriber};

/// Current wire-contract version embedded in diagnostics and logs.
pub const CONTRACT_VERSION: &str = "control-service/v1";
