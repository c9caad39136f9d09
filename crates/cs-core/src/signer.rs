// SPDX-License-Identifier: MIT OR Apache-2.0
//! The signer contract: produces a digital signature over a challenge and
//! exposes a DER-encoded public key. Secure-enclave/TPM key material
//! lifecycle is out of scope — this crate only defines the capability a
//! local (software) or hardware-backed signer satisfies.

use async_trait::async_trait;
use cs_error::ControlError;

/// Type tag returned by a signer that is not configured. Its headers are
/// omitted entirely rather than sent empty.
pub const NOOP_SIGNER_TYPE: &str = "noop";

/// Produces a digital signature over a challenge; exposes a DER-encoded
/// public key and a type tag.
///
/// Signing may be slow (hundreds of milliseconds for hardware-backed
/// signers); callers are expected to wrap calls in a bounded retry with
/// backoff rather than this trait doing so itself.
#[async_trait]
pub trait Signer: Send + Sync {
    /// A short tag identifying the signer implementation, e.g.
    /// `"ecdsa-p256"` or `"tpm"`. [`NOOP_SIGNER_TYPE`] means disabled.
    fn type_(&self) -> &str;

    /// The public key, DER-encoded as a `SubjectPublicKeyInfo`.
    fn public_key_der(&self) -> Result<Vec<u8>, ControlError>;

    /// Sign `challenge`, returning the raw signature bytes in the
    /// signer-internal scheme.
    async fn sign(&self, challenge: &[u8]) -> Result<Vec<u8>, ControlError>;

    /// `true` iff this signer is absent (`type_() == "noop"`).
    fn is_noop(&self) -> bool {
        self.type_() == NOOP_SIGNER_TYPE
    }
}

/// A signer that is always absent. Used when a device has no hardware key
/// material, or in tests.
pub struct NoopSigner;

#[async_trait]
impl Signer for NoopSigner {
    fn type_(&self) -> &str {
        NOOP_SIGNER_TYPE
    }

    fn public_key_der(&self) -> Result<Vec<u8>, ControlError> {
        Ok(Vec::new())
    }

    async fn sign(&self, _challenge: &[u8]) -> Result<Vec<u8>, ControlError> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_signer_is_noop() {
        let signer = NoopSigner;
        assert!(signer.is_noop());
        assert_eq!(signer.public_key_der().unwrap(), Vec::<u8>::new());
        assert_eq!(signer.sign(b"challenge").await.unwrap(), Vec::<u8>::new());
    }
}
