// SPDX-License-Identifier: MIT OR Apache-2.0
//! The manifest: the server's current mapping from subsystem name to
//! content hash.

use cs_error::{ControlError, ErrorCode};
use std::collections::BTreeMap;

/// A short ASCII identifier naming a logical channel (`"desktop"`,
/// `"flare"`, `"actions"`, `"ingest"`, …). Maps to exactly one [`Consumer`]
/// and any number of subscribers.
///
/// [`Consumer`]: crate::Consumer
pub type SubsystemName = String;

/// Opaque, server-assigned version token for a subsystem's content.
/// Equality is byte-exact; the value carries no ordering.
pub type ContentHash = String;

/// The desired state of every subsystem at one point in time, as returned
/// by `GET /api/agent/config`.
pub type Manifest = BTreeMap<SubsystemName, ContentHash>;

/// Decode a manifest from the raw bytes of a config response body.
///
/// An empty body or malformed JSON is a [`ErrorCode::DecodeManifestInvalid`]
/// error; this mirrors the manifest-phase failure semantics in which a
/// transport error aborts the whole fetch rather than skipping one
/// subsystem.
pub fn decode_manifest(body: &[u8]) -> Result<Manifest, ControlError> {
    if body.is_empty() {
        return Err(
            ControlError::new(ErrorCode::DecodeManifestInvalid, "empty manifest body")
                .with_subsystem("manifest"),
        );
    }
    serde_json::from_slice(body).map_err(|e| {
        ControlError::new(ErrorCode::DecodeManifestInvalid, "manifest is not valid JSON")
            .with_subsystem("manifest")
            .with_source(e)
    })
}
