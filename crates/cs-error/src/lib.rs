//! Unified error taxonomy with stable error codes for the control service.
//!
//! Every error raised by a control-service component carries an
//! [`ErrorCode`] (a machine-readable, stable string tag), a human-readable
//! message, an optional cause chain, and arbitrary key-value context. Use
//! the builder returned by [`ControlError::new`] to construct errors
//! fluently.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// ErrorCategory
// ---------------------------------------------------------------------------

/// Broad family that an [`ErrorCode`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Transport/HTTP errors talking to the management server.
    Transport,
    /// Manifest/payload decode errors.
    Decode,
    /// Field-level validation failures (expired, missing, malformed).
    Validation,
    /// A registered consumer or actor failed to apply a payload.
    Consumer,
    /// Errors from the KV store.
    Kv,
    /// Signer (challenge-response) errors.
    Signer,
    /// Configuration errors.
    Config,
    /// Errors from the hardware/tenant drift reset guard.
    Reset,
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Transport => "transport",
            Self::Decode => "decode",
            Self::Validation => "validation",
            Self::Consumer => "consumer",
            Self::Kv => "kv",
            Self::Signer => "signer",
            Self::Config => "config",
            Self::Reset => "reset",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// ErrorCode
// ---------------------------------------------------------------------------

/// Machine-readable, stable error code.
///
/// Each variant serialises to a `SCREAMING_SNAKE_CASE` string that is
/// guaranteed not to change across patch releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // -- Transport --
    /// The server responded with a non-200 status.
    TransportBadStatus,
    /// A network-level error occurred (connect/timeout/DNS).
    TransportNetwork,
    /// No bearer token was available and none could be obtained.
    TransportNoToken,

    // -- Decode --
    /// The manifest body was empty or not valid JSON.
    DecodeManifestInvalid,
    /// One element of an array-valued payload failed to decode.
    DecodeElementInvalid,
    /// A scalar/object payload failed to decode.
    DecodePayloadInvalid,

    // -- Validation --
    /// A required field was missing or empty.
    ValidationMissingField,
    /// A `valid_until` timestamp has already elapsed.
    ValidationExpired,
    /// A URL field failed to parse as an absolute http(s) URL.
    ValidationBadUrl,

    // -- Consumer --
    /// No consumer or actor was registered for the given name.
    ConsumerNotFound,
    /// A consumer with this subsystem name is already registered.
    ConsumerAlreadyRegistered,
    /// The consumer's `update` call returned an error.
    ConsumerFailed,

    // -- Kv --
    /// A KV store operation failed.
    KvOperationFailed,

    // -- Signer --
    /// Signing failed after exhausting the retry budget.
    SignerFailed,

    // -- Config --
    /// Configuration value is invalid.
    ConfigInvalid,

    // -- Reset --
    /// The one-shot identity probe (osquery) failed or timed out.
    ResetProbeFailed,
    /// The enrollment secret could not be read or parsed.
    ResetSecretInvalid,

    // -- Internal --
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl ErrorCode {
    /// Returns the broad [`ErrorCategory`] this code belongs to.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::TransportBadStatus | Self::TransportNetwork | Self::TransportNoToken => {
                ErrorCategory::Transport
            }

            Self::DecodeManifestInvalid
            | Self::DecodeElementInvalid
            | Self::DecodePayloadInvalid => ErrorCategory::Decode,

            Self::ValidationMissingField | Self::ValidationExpired | Self::ValidationBadUrl => {
                ErrorCategory::Validation
            }

            Self::ConsumerNotFound | Self::ConsumerAlreadyRegistered | Self::ConsumerFailed => {
                ErrorCategory::Consumer
            }

            Self::KvOperationFailed => ErrorCategory::Kv,

            Self::SignerFailed => ErrorCategory::Signer,

            Self::ConfigInvalid => ErrorCategory::Config,

            Self::ResetProbeFailed | Self::ResetSecretInvalid => ErrorCategory::Reset,

            Self::Internal => ErrorCategory::Internal,
        }
    }

    /// Stable `&'static str` representation of the code (e.g.
    /// `"TRANSPORT_BAD_STATUS"`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TransportBadStatus => "TRANSPORT_BAD_STATUS",
            Self::TransportNetwork => "TRANSPORT_NETWORK",
            Self::TransportNoToken => "TRANSPORT_NO_TOKEN",
            Self::DecodeManifestInvalid => "DECODE_MANIFEST_INVALID",
            Self::DecodeElementInvalid => "DECODE_ELEMENT_INVALID",
            Self::DecodePayloadInvalid => "DECODE_PAYLOAD_INVALID",
            Self::ValidationMissingField => "VALIDATION_MISSING_FIELD",
            Self::ValidationExpired => "VALIDATION_EXPIRED",
            Self::ValidationBadUrl => "VALIDATION_BAD_URL",
            Self::ConsumerNotFound => "CONSUMER_NOT_FOUND",
            Self::ConsumerAlreadyRegistered => "CONSUMER_ALREADY_REGISTERED",
            Self::ConsumerFailed => "CONSUMER_FAILED",
            Self::KvOperationFailed => "KV_OPERATION_FAILED",
            Self::SignerFailed => "SIGNER_FAILED",
            Self::ConfigInvalid => "CONFIG_INVALID",
            Self::ResetProbeFailed => "RESET_PROBE_FAILED",
            Self::ResetSecretInvalid => "RESET_SECRET_INVALID",
            Self::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ControlError
// ---------------------------------------------------------------------------

/// Unified control-service error.
///
/// Carries a stable [`ErrorCode`], a human-readable message, an optional
/// source error for cause-chaining, and arbitrary structured context (most
/// commonly the subsystem name: "every logged error carries the subsystem
/// name where applicable").
///
/// ```
/// use cs_error::{ControlError, ErrorCode};
///
/// let err = ControlError::new(ErrorCode::TransportBadStatus, "unexpected status")
///     .with_context("subsystem", "desktop")
///     .with_context("status", 503);
/// ```
pub struct ControlError {
    /// Machine-readable error code.
    pub code: ErrorCode,
    /// Human-readable description.
    pub message: String,
    /// Optional underlying cause.
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    /// Arbitrary structured context for diagnostics.
    pub context: BTreeMap<String, serde_json::Value>,
}

impl ControlError {
    /// Create a new error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
            context: BTreeMap::new(),
        }
    }

    /// Attach a key-value pair to the diagnostic context.
    ///
    /// The value is converted via [`serde_json::to_value`]; if serialisation
    /// fails, the entry is silently skipped.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    /// Attach an underlying cause.
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Shorthand for `self.code.category()`.
    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }

    /// Shorthand for attaching the subsystem name, which nearly every log
    /// site in the fetch/dispatch path needs.
    pub fn with_subsystem(self, subsystem: impl Into<String>) -> Self {
        self.with_context("subsystem", subsystem.into())
    }
}

impl fmt::Debug for ControlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("ControlError");
        d.field("code", &self.code);
        d.field("message", &self.message);
        if let Some(ref src) = self.source {
            d.field("source", &src.to_string());
        }
        if !self.context.is_empty() {
            d.field("context", &self.context);
        }
        d.finish()
    }
}

impl fmt::Display for ControlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.as_str(), self.message)?;
        if !self.context.is_empty() {
            if let Ok(ctx) = serde_json::to_string(&self.context) {
                write!(f, " {ctx}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for ControlError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

// ---------------------------------------------------------------------------
// Serialization support
// ---------------------------------------------------------------------------

/// Serialisable snapshot of a [`ControlError`] (without the opaque source).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ControlErrorDto {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
    /// Structured context.
    pub context: BTreeMap<String, serde_json::Value>,
    /// String representation of the source error, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_message: Option<String>,
}

impl From<&ControlError> for ControlErrorDto {
    fn from(err: &ControlError) -> Self {
        Self {
            code: err.code,
            message: err.message.clone(),
            context: err.context.clone(),
            source_message: err.source.as_ref().map(|s| s.to_string()),
        }
    }
}

impl From<ControlErrorDto> for ControlError {
    fn from(dto: ControlErrorDto) -> Self {
        Self {
            code: dto.code,
            message: dto.message,
            source: None,
            context: dto.context,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::io;

    const ALL_CODES: &[ErrorCode] = &[
        ErrorCode::TransportBadStatus,
        ErrorCode::TransportNetwork,
        ErrorCode::TransportNoToken,
        ErrorCode::DecodeManifestInvalid,
        ErrorCode::DecodeElementInvalid,
        ErrorCode::DecodePayloadInvalid,
        ErrorCode::ValidationMissingField,
        ErrorCode::ValidationExpired,
        ErrorCode::ValidationBadUrl,
        ErrorCode::ConsumerNotFound,
        ErrorCode::ConsumerAlreadyRegistered,
        ErrorCode::ConsumerFailed,
        ErrorCode::KvOperationFailed,
        ErrorCode::SignerFailed,
        ErrorCode::ConfigInvalid,
        ErrorCode::ResetProbeFailed,
        ErrorCode::ResetSecretInvalid,
        ErrorCode::Internal,
    ];

    #[test]
    fn basic_construction() {
        let err = ControlError::new(ErrorCode::Internal, "boom");
        assert_eq!(err.code, ErrorCode::Internal);
        assert_eq!(err.message, "boom");
        assert!(err.source.is_none());
        assert!(err.context.is_empty());
    }

    #[test]
    fn display_without_context() {
        let err = ControlError::new(ErrorCode::ConsumerNotFound, "no such subsystem");
        assert_eq!(err.to_string(), "[CONSUMER_NOT_FOUND] no such subsystem");
    }

    #[test]
    fn display_with_context() {
        let err = ControlError::new(ErrorCode::TransportBadStatus, "bad status")
            .with_context("status", 503);
        let s = err.to_string();
        assert!(s.starts_with("[TRANSPORT_BAD_STATUS] bad status"));
        assert!(s.contains("status"));
        assert!(s.contains("503"));
    }

    #[test]
    fn with_subsystem_sets_context_key() {
        let err =
            ControlError::new(ErrorCode::ConsumerFailed, "update failed").with_subsystem("desktop");
        assert_eq!(
            err.context.get("subsystem").and_then(|v| v.as_str()),
            Some("desktop")
        );
    }

    #[test]
    fn with_source_chains_error() {
        let io_err = io::Error::new(io::ErrorKind::Other, "disk full");
        let err =
            ControlError::new(ErrorCode::KvOperationFailed, "write failed").with_source(io_err);
        assert!(err.source().is_some());
        assert_eq!(err.source().unwrap().to_string(), "disk full");
    }

    #[test]
    fn debug_includes_context_when_present() {
        let err = ControlError::new(ErrorCode::Internal, "x").with_context("a", 1);
        let dbg = format!("{err:?}");
        assert!(dbg.contains("context"));
    }

    #[test]
    fn all_codes_have_unique_str_repr() {
        let mut seen = HashSet::new();
        for code in ALL_CODES {
            assert!(seen.insert(code.as_str()), "duplicate code string: {code}");
        }
    }

    #[test]
    fn category_mapping_is_exhaustive_and_stable() {
        assert_eq!(
            ErrorCode::TransportNetwork.category(),
            ErrorCategory::Transport
        );
        assert_eq!(ErrorCode::DecodeElementInvalid.category(), ErrorCategory::Decode);
        assert_eq!(
            ErrorCode::ValidationExpired.category(),
            ErrorCategory::Validation
        );
        assert_eq!(ErrorCode::ConsumerFailed.category(), ErrorCategory::Consumer);
        assert_eq!(ErrorCode::KvOperationFailed.category(), ErrorCategory::Kv);
        assert_eq!(ErrorCode::SignerFailed.category(), ErrorCategory::Signer);
        assert_eq!(ErrorCode::ConfigInvalid.category(), ErrorCategory::Config);
        assert_eq!(ErrorCode::ResetProbeFailed.category(), ErrorCategory::Reset);
        assert_eq!(ErrorCode::Internal.category(), ErrorCategory::Internal);
    }

    #[test]
    fn dto_roundtrip_preserves_code_message_context() {
        let err = ControlError::new(ErrorCode::ValidationBadUrl, "bad url")
            .with_context("field", "action_uri");
        let dto = ControlErrorDto::from(&err);
        let json = serde_json::to_string(&dto).unwrap();
        let back: ControlErrorDto = serde_json::from_str(&json).unwrap();
        assert_eq!(back, dto);
        let restored: ControlError = back.into();
        assert_eq!(restored.code, err.code);
        assert_eq!(restored.message, err.message);
    }

    #[test]
    fn serde_code_is_screaming_snake_case() {
        let json = serde_json::to_string(&ErrorCode::ResetSecretInvalid).unwrap();
        assert_eq!(json, "\"RESET_SECRET_INVALID\"");
    }
}
