// SPDX-License-Identifier: MIT OR Apache-2.0
//! cs-signer
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! A software ECDSA (P-256) [`Signer`] for the *local* challenge-response
//! key. The *hardware* signer (TPM/Secure Enclave) is an opaque external
//! capability — its key material lifecycle is out of scope here, and
//! callers that have one implement [`Signer`] directly against that
//! platform API. This crate only supplies the software fallback and the
//! [`NoopSigner`] re-export for devices with no configured key at all.

use async_trait::async_trait;
use cs_core::Signer;
use cs_error::{ControlError, ErrorCode};
use ecdsa::signature::Signer as _;
use p256::ecdsa::{Signature, SigningKey};
use pkcs8::EncodePublicKey;
use tokio::sync::Mutex;

pub use cs_core::signer::NoopSigner;

/// Type tag for [`LocalEcdsaSigner`].
pub const LOCAL_ECDSA_SIGNER_TYPE: &str = "ecdsa-p256";

/// A software ECDSA P-256 signer over an in-memory key.
///
/// Signing is CPU-bound and fast; the bounded retry the control service
/// wraps around signer calls exists for the *hardware* signer, where a
/// single `sign` can take hundreds of milliseconds and transiently fail.
/// This type still goes through that same retry path at the call site so
/// both signers are handled uniformly.
pub struct LocalEcdsaSigner {
    signing_key: Mutex<SigningKey>,
}

impl LocalEcdsaSigner {
    /// Generate a fresh P-256 keypair.
    pub fn generate() -> Self {
        Self {
            signing_key: Mutex::new(SigningKey::random(&mut rand::rngs::OsRng)),
        }
    }

    /// Build a signer from an existing PKCS#8 DER-encoded private key.
    pub fn from_pkcs8_der(der: &[u8]) -> Result<Self, ControlError> {
        let signing_key = SigningKey::from_pkcs8_der(der).map_err(|e| {
            ControlError::new(ErrorCode::SignerFailed, "invalid PKCS#8 private key")
                .with_source(std::io::Error::other(e.to_string()))
        })?;
        Ok(Self {
            signing_key: Mutex::new(signing_key),
        })
    }
}

#[async_trait]
impl Signer for LocalEcdsaSigner {
    fn type_(&self) -> &str {
        LOCAL_ECDSA_SIGNER_TYPE
    }

    fn public_key_der(&self) -> Result<Vec<u8>, ControlError> {
        let signing_key = self
            .signing_key
            .try_lock()
            .map_err(|_| ControlError::new(ErrorCode::SignerFailed, "signing key busy"))?;
        let verifying_key = signing_key.verifying_key();
        verifying_key
            .to_public_key_der()
            .map(|doc| doc.as_bytes().to_vec())
            .map_err(|e| {
                ControlError::new(ErrorCode::SignerFailed, "failed to encode public key")
                    .with_source(std::io::Error::other(e.to_string()))
            })
    }

    async fn sign(&self, challenge: &[u8]) -> Result<Vec<u8>, ControlError> {
        let signing_key = self.signing_key.lock().await;
        let signature: Signature = signing_key.sign(challenge);
        Ok(signature.to_der().as_bytes().to_vec())
    }
}
