// SPDX-License-Identifier: MIT OR Apache-2.0
//! cs-reset-guard
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Runs once before the control loop starts: reads current hardware and
//! tenant identifiers, compares them against the values stored from the
//! previous run, and — only if a previously-present value actually
//! changed — appends a snapshot to a preserved audit record and wipes
//! every other key in every bucket.

use base64::Engine;
use chrono::Utc;
use cs_core::kv::{buckets, KvStore};
use cs_error::{ControlError, ErrorCode};
use std::sync::Arc;
use tracing::{info, warn};

/// Hardware identifiers read via the one-shot osquery probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardwareIdentity {
    /// `hardware_serial` osquery column.
    pub hardware_serial: String,
    /// `hardware_uuid` osquery column.
    pub hardware_uuid: String,
}

/// External collaborator performing the one-shot osquery identity query.
#[async_trait::async_trait]
pub trait IdentityProbe: Send + Sync {
    /// Run the one-shot query and return the current hardware identity.
    async fn probe(&self) -> Result<HardwareIdentity, ControlError>;
}

/// Context fields carried into the audit snapshot that are not otherwise
/// derived by the guard itself.
#[derive(Debug, Clone, Default)]
pub struct SnapshotContext {
    /// Node key assigned by the management server, if known.
    pub node_key: Option<String>,
    /// Base64 DER of the local software signer's public key, if known.
    pub local_ecc_key: Option<String>,
    /// Device identifier assigned by the management server, if known.
    pub device_id: Option<String>,
    /// Last known remote IP as seen by the management server, if known.
    pub remote_ip: Option<String>,
    /// Tombstone identifier from a previous enrollment, if known.
    pub tombstone_id: Option<String>,
}

const HARDWARE_SERIAL_KEY: &str = "hardware_serial";
const HARDWARE_UUID_KEY: &str = "hardware_uuid";
const TENANT_CODE_KEY: &str = "tenant_code";
const AUDIT_KEY: &str = "old_host_data";

/// Extract the `organization` claim from a JWT's payload segment without
/// verifying its signature — the guard has no access to the signing key.
pub fn extract_tenant_code(jwt: &str) -> Result<String, ControlError> {
    let payload_b64 = jwt.split('.').nth(1).ok_or_else(|| {
        ControlError::new(ErrorCode::ResetSecretInvalid, "enrollment secret is not a JWT")
    })?;
    let payload = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|e| {
            ControlError::new(ErrorCode::ResetSecretInvalid, "enrollment secret payload is not base64")
                .with_source(e)
        })?;
    let claims: serde_json::Value = serde_json::from_slice(&payload).map_err(|e| {
        ControlError::new(ErrorCode::ResetSecretInvalid, "enrollment secret payload is not JSON")
            .with_source(e)
    })?;
    claims
        .get("organization")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| ControlError::new(ErrorCode::ResetSecretInvalid, "enrollment secret has no organization claim"))
}

/// The database-reset guard.
pub struct ResetGuard {
    kv: Arc<dyn KvStore>,
}

impl ResetGuard {
    /// Bind a guard to `kv`.
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    async fn previous(&self, key: &str) -> Result<Option<String>, ControlError> {
        Ok(self
            .kv
            .get(buckets::HOST_DATA, key.as_bytes())
            .await?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
    }

    /// Run the drift check. On a detected change, snapshots and wipes the
    /// database before returning. Returns `true` if a reset occurred.
    pub async fn run(
        &self,
        probe: &dyn IdentityProbe,
        probe_timeout: std::time::Duration,
        enrollment_jwt: &str,
        context: SnapshotContext,
    ) -> Result<bool, ControlError> {
        let identity = tokio::time::timeout(probe_timeout, probe.probe())
            .await
            .map_err(|_| ControlError::new(ErrorCode::ResetProbeFailed, "identity probe timed out"))??;
        let tenant = extract_tenant_code(enrollment_jwt)?;

        let prev_serial = self.previous(HARDWARE_SERIAL_KEY).await?;
        let prev_uuid = self.previous(HARDWARE_UUID_KEY).await?;
        let prev_tenant = self.previous(TENANT_CODE_KEY).await?;

        let changed = differs(&prev_serial, &identity.hardware_serial)
            || differs(&prev_uuid, &identity.hardware_uuid)
            || differs(&prev_tenant, &tenant);

        if changed {
            warn!(target: "control_service.reset_guard", "hardware or tenant identity changed, resetting local database");
            self.snapshot_and_wipe(&identity, &tenant, context).await?;
        } else {
            info!(target: "control_service.reset_guard", "identity unchanged, no reset");
        }

        self.kv
            .set(buckets::HOST_DATA, HARDWARE_SERIAL_KEY.as_bytes(), identity.hardware_serial.as_bytes())
            .await?;
        self.kv
            .set(buckets::HOST_DATA, HARDWARE_UUID_KEY.as_bytes(), identity.hardware_uuid.as_bytes())
            .await?;
        self.kv
            .set(buckets::HOST_DATA, TENANT_CODE_KEY.as_bytes(), tenant.as_bytes())
            .await?;

        Ok(changed)
    }

    async fn snapshot_and_wipe(
        &self,
        identity: &HardwareIdentity,
        tenant: &str,
        context: SnapshotContext,
    ) -> Result<(), ControlError> {
        let snapshot = serde_json::json!({
            "node_key": context.node_key,
            "local_ecc_key": context.local_ecc_key,
            "hardware_serial": identity.hardware_serial,
            "hardware_uuid": identity.hardware_uuid,
            "tenant_code": tenant,
            "device_id": context.device_id,
            "remote_ip": context.remote_ip,
            "tombstone_id": context.tombstone_id,
            "reset_at": Utc::now(),
        });

        let mut audit: Vec<serde_json::Value> = match self.kv.get(buckets::HOST_DATA, AUDIT_KEY.as_bytes()).await? {
            Some(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
            None => Vec::new(),
        };
        audit.push(snapshot);
        let audit_bytes = serde_json::to_vec(&audit).map_err(|e| {
            ControlError::new(ErrorCode::KvOperationFailed, "failed to encode audit snapshot").with_source(e)
        })?;
        self.kv
            .set(buckets::HOST_DATA, AUDIT_KEY.as_bytes(), &audit_bytes)
            .await?;

        for bucket in buckets::ALL {
            let mut stale_keys: Vec<Vec<u8>> = Vec::new();
            self.kv
                .for_each(bucket, &mut |key, _value| {
                    if *bucket == buckets::HOST_DATA && key == AUDIT_KEY.as_bytes() {
                        return false;
                    }
                    stale_keys.push(key.to_vec());
                    false
                })
                .await?;
            if !stale_keys.is_empty() {
                let refs: Vec<&[u8]> = stale_keys.iter().map(|k| k.as_slice()).collect();
                self.kv.delete(bucket, &refs).await?;
            }
        }
        Ok(())
    }
}

fn differs(previous: &Option<String>, current: &str) -> bool {
    matches!(previous, Some(p) if p != current)
}
