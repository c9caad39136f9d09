// SPDX-License-Identifier: MIT OR Apache-2.0
//! Runtime configuration, defaults, and validation for the control service.
//!
//! This crate provides [`ControlServiceConfig`] — the top-level runtime
//! settings — together with helpers for loading from TOML files and
//! producing advisory [`ConfigWarning`]s. The CLI/flag surface that
//! constructs this config is out of scope for this crate; callers build a
//! `ControlServiceConfig` however they like and hand it to `cs-service`.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during configuration loading or validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The requested configuration file was not found.
    #[error("config file not found: {path}")]
    FileNotFound {
        /// Path that was requested.
        path: String,
    },

    /// The file could not be parsed as valid TOML.
    #[error("failed to parse config: {reason}")]
    ParseError {
        /// Human-readable parse error detail.
        reason: String,
    },

    /// Semantic validation failed (one or more problems).
    #[error("config validation failed: {reasons:?}")]
    ValidationError {
        /// Individual validation failure messages.
        reasons: Vec<String>,
    },
}

// ---------------------------------------------------------------------------
// Warnings
// ---------------------------------------------------------------------------

/// Advisory-level issues that do not prevent operation but deserve attention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// `min_acceleration_interval_secs` exceeds `request_interval_secs`,
    /// which makes acceleration a no-op.
    AccelerationFloorAboveInterval {
        /// The configured floor.
        floor_secs: u64,
        /// The configured steady-state interval.
        interval_secs: u64,
    },
    /// TLS is disabled; the base URL will use `http://`.
    TlsDisabled,
    /// A retention window shorter than the sweep interval will churn.
    RetentionShorterThanSweep {
        /// Name of the affected window.
        window: &'static str,
    },
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AccelerationFloorAboveInterval {
                floor_secs,
                interval_secs,
            } => write!(
                f,
                "min_acceleration_interval_secs ({floor_secs}) exceeds request_interval_secs ({interval_secs})"
            ),
            Self::TlsDisabled => write!(f, "TLS is disabled; base_url will use http://"),
            Self::RetentionShorterThanSweep { window } => {
                write!(f, "{window} retention window is shorter than its sweep interval")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Config types
// ---------------------------------------------------------------------------

/// Where the enrollment secret (a JWT whose `organization` claim names the
/// tenant) is read from.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum EnrollmentSecretSource {
    /// The secret is embedded directly in the config.
    Literal {
        /// The raw JWT string.
        value: String,
    },
    /// The secret is read from a file at startup.
    File {
        /// Path to the file containing the raw JWT string.
        path: String,
    },
}

impl EnrollmentSecretSource {
    /// Resolve the raw JWT string, reading the backing file if necessary.
    pub fn resolve(&self) -> Result<String, ConfigError> {
        match self {
            Self::Literal { value } => Ok(value.clone()),
            Self::File { path } => std::fs::read_to_string(path)
                .map(|s| s.trim().to_string())
                .map_err(|_| ConfigError::FileNotFound { path: path.clone() }),
        }
    }
}

/// Top-level runtime configuration for the control service.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct ControlServiceConfig {
    /// Scheme+host[:port] of the management server, without a trailing
    /// slash, e.g. `"k2.example.com"`.
    pub base_url: String,

    /// When `true`, the transport uses `http://` instead of `https://`.
    /// Exists for local testing only.
    #[serde(default)]
    pub disable_tls: bool,

    /// Steady-state fetch interval in seconds. Default 60.
    #[serde(default = "default_request_interval_secs")]
    pub request_interval_secs: u64,

    /// Floor below which `AccelerateRequestInterval` will not push the
    /// interval. Default 5.
    #[serde(default = "default_min_acceleration_interval_secs")]
    pub min_acceleration_interval_secs: u64,

    /// HTTP client timeout in seconds for all transport calls. Default 30.
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,

    /// Budget in milliseconds for the bounded signer retry. Default 1000.
    #[serde(default = "default_signer_retry_budget_ms")]
    pub signer_retry_budget_ms: u64,

    /// Timeout in seconds for the one-shot osquery identity probe used by
    /// the reset guard. Default 10.
    #[serde(default = "default_identity_probe_timeout_secs")]
    pub identity_probe_timeout_secs: u64,

    /// Where the enrollment secret is read from.
    pub enrollment_secret: EnrollmentSecretSource,

    /// Interval in seconds between command-deduper sweeps. Default 43 200
    /// (12 h).
    #[serde(default = "default_dedupe_sweep_interval_secs")]
    pub dedupe_sweep_interval_secs: u64,

    /// Retention window in seconds for seen-command records and action
    /// records. Default ≈ 6 months (15 778 800 s).
    #[serde(default = "default_command_retention_secs")]
    pub command_retention_secs: u64,

    /// Retention window in seconds for delivered notification records.
    /// Default ≈ 6 months, matching `command_retention_secs` — see
    /// `DESIGN.md` for why this superseded the older 1 h value.
    #[serde(default = "default_notification_retention_secs")]
    pub notification_retention_secs: u64,

    /// Shutdown budget in seconds for `Interrupt`-driven drains. Default 5.
    #[serde(default = "default_shutdown_budget_secs")]
    pub shutdown_budget_secs: u64,
}

fn default_request_interval_secs() -> u64 {
    60
}
fn default_min_acceleration_interval_secs() -> u64 {
    5
}
fn default_http_timeout_secs() -> u64 {
    30
}
fn default_signer_retry_budget_ms() -> u64 {
    1_000
}
fn default_identity_probe_timeout_secs() -> u64 {
    10
}
fn default_dedupe_sweep_interval_secs() -> u64 {
    43_200
}
fn default_command_retention_secs() -> u64 {
    15_778_800
}
fn default_notification_retention_secs() -> u64 {
    15_778_800
}
fn default_shutdown_budget_secs() -> u64 {
    5
}

impl ControlServiceConfig {
    /// A config suitable for tests: a literal enrollment secret and every
    /// other field at its production default.
    pub fn for_testing(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            disable_tls: true,
            request_interval_secs: default_request_interval_secs(),
            min_acceleration_interval_secs: default_min_acceleration_interval_secs(),
            http_timeout_secs: default_http_timeout_secs(),
            signer_retry_budget_ms: default_signer_retry_budget_ms(),
            identity_probe_timeout_secs: default_identity_probe_timeout_secs(),
            enrollment_secret: EnrollmentSecretSource::Literal {
                value: String::new(),
            },
            dedupe_sweep_interval_secs: default_dedupe_sweep_interval_secs(),
            command_retention_secs: default_command_retention_secs(),
            notification_retention_secs: default_notification_retention_secs(),
            shutdown_budget_secs: default_shutdown_budget_secs(),
        }
    }

    /// The scheme to use for the management server, honoring
    /// [`Self::disable_tls`].
    pub fn scheme(&self) -> &'static str {
        if self.disable_tls { "http" } else { "https" }
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Load a [`ControlServiceConfig`] from a TOML file.
pub fn load_config(path: &Path) -> Result<ControlServiceConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.display().to_string(),
    })?;
    parse_toml(&content)
}

/// Parse a TOML string into a [`ControlServiceConfig`].
pub fn parse_toml(content: &str) -> Result<ControlServiceConfig, ConfigError> {
    toml::from_str::<ControlServiceConfig>(content).map_err(|e| ConfigError::ParseError {
        reason: e.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a parsed configuration, returning advisory warnings.
///
/// Hard errors (empty base URL) are returned as a
/// [`ConfigError::ValidationError`]; soft issues come back as warnings.
pub fn validate_config(config: &ControlServiceConfig) -> Result<Vec<ConfigWarning>, ConfigError> {
    let mut errors: Vec<String> = Vec::new();
    let mut warnings: Vec<ConfigWarning> = Vec::new();

    if config.base_url.trim().is_empty() {
        errors.push("base_url must not be empty".into());
    }
    if config.request_interval_secs == 0 {
        errors.push("request_interval_secs must be greater than zero".into());
    }

    if config.min_acceleration_interval_secs > config.request_interval_secs {
        warnings.push(ConfigWarning::AccelerationFloorAboveInterval {
            floor_secs: config.min_acceleration_interval_secs,
            interval_secs: config.request_interval_secs,
        });
    }
    if config.disable_tls {
        warnings.push(ConfigWarning::TlsDisabled);
    }
    if config.command_retention_secs < config.dedupe_sweep_interval_secs {
        warnings.push(ConfigWarning::RetentionShorterThanSweep { window: "command" });
    }

    if errors.is_empty() {
        Ok(warnings)
    } else {
        Err(ConfigError::ValidationError { reasons: errors })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn minimal_toml() -> &'static str {
        r#"
            base_url = "k2.example.com"

            [enrollment_secret]
            source = "literal"
            value = "eyJhbGciOiJub25lIn0.eyJvcmdhbml6YXRpb24iOiJhY21lIn0."
        "#
    }

    #[test]
    fn parses_minimal_toml_with_defaults() {
        let cfg = parse_toml(minimal_toml()).unwrap();
        assert_eq!(cfg.base_url, "k2.example.com");
        assert_eq!(cfg.request_interval_secs, 60);
        assert_eq!(cfg.min_acceleration_interval_secs, 5);
        assert_eq!(cfg.command_retention_secs, 15_778_800);
        assert!(matches!(
            cfg.enrollment_secret,
            EnrollmentSecretSource::Literal { .. }
        ));
    }

    #[test]
    fn parse_invalid_toml_gives_parse_error() {
        let err = parse_toml("this is [not valid toml =").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn validation_catches_empty_base_url() {
        let mut cfg = ControlServiceConfig::for_testing("");
        cfg.base_url = "   ".into();
        let err = validate_config(&cfg).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { .. }));
    }

    #[test]
    fn validation_catches_zero_interval() {
        let mut cfg = ControlServiceConfig::for_testing("k2.example.com");
        cfg.request_interval_secs = 0;
        let err = validate_config(&cfg).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { .. }));
    }

    #[test]
    fn warns_when_acceleration_floor_exceeds_interval() {
        let mut cfg = ControlServiceConfig::for_testing("k2.example.com");
        cfg.disable_tls = false;
        cfg.min_acceleration_interval_secs = 120;
        cfg.request_interval_secs = 60;
        let warnings = validate_config(&cfg).unwrap();
        assert!(
            warnings
                .iter()
                .any(|w| matches!(w, ConfigWarning::AccelerationFloorAboveInterval { .. }))
        );
    }

    #[test]
    fn tls_disabled_produces_warning_and_http_scheme() {
        let cfg = ControlServiceConfig::for_testing("k2.example.com");
        assert_eq!(cfg.scheme(), "http");
        let warnings = validate_config(&cfg).unwrap();
        assert!(warnings.contains(&ConfigWarning::TlsDisabled));
    }

    #[test]
    fn tls_enabled_uses_https_scheme() {
        let mut cfg = ControlServiceConfig::for_testing("k2.example.com");
        cfg.disable_tls = false;
        assert_eq!(cfg.scheme(), "https");
    }

    #[test]
    fn load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("control-service.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "{}", minimal_toml()).unwrap();
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.base_url, "k2.example.com");
    }

    #[test]
    fn enrollment_secret_literal_resolves_to_its_value() {
        let source = EnrollmentSecretSource::Literal { value: "jwt-value".into() };
        assert_eq!(source.resolve().unwrap(), "jwt-value");
    }

    #[test]
    fn enrollment_secret_file_resolves_to_trimmed_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secret.jwt");
        std::fs::write(&path, "jwt-value\n").unwrap();
        let source = EnrollmentSecretSource::File {
            path: path.display().to_string(),
        };
        assert_eq!(source.resolve().unwrap(), "jwt-value");
    }

    #[test]
    fn enrollment_secret_missing_file_gives_file_not_found() {
        let source = EnrollmentSecretSource::File {
            path: "/nonexistent/secret.jwt".into(),
        };
        assert!(matches!(source.resolve().unwrap_err(), ConfigError::FileNotFound { .. }));
    }

    #[test]
    fn load_missing_file_gives_file_not_found() {
        let err = load_config(Path::new("/nonexistent/control-service.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound { .. }));
    }

    #[test]
    fn toml_roundtrip() {
        let cfg = ControlServiceConfig::for_testing("k2.example.com");
        let serialized = toml::to_string(&cfg).unwrap();
        let deserialized: ControlServiceConfig = toml::from_str(&serialized).unwrap();
        assert_eq!(cfg, deserialized);
    }

    #[test]
    fn config_error_display() {
        let e = ConfigError::FileNotFound { path: "/foo".into() };
        assert!(e.to_string().contains("/foo"));
    }

    #[test]
    fn config_warning_display() {
        let w = ConfigWarning::AccelerationFloorAboveInterval {
            floor_secs: 10,
            interval_secs: 5,
        };
        assert!(w.to_string().contains('5'));
    }
}
