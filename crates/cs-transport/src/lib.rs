// SPDX-License-Identifier: MIT OR Apache-2.0
//! cs-transport
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! The HTTP transport performing the two-stage challenge-response fetch:
//! `GetConfig` exchanges a signed challenge for a manifest and a bearer
//! token, `GetSubsystemData` uses that token to fetch a hash-addressed
//! blob. Any HTTP status other than 200 is an error that names the status
//! and URL; network errors surface as-is. The base URL is held behind a
//! read-write lock because a configuration-change observer can rewrite it
//! at any time — reads during a request must not tear.

use base64::Engine;
use cs_core::Signer;
use cs_error::{ControlError, ErrorCode};
use cs_retry::RetryConfig;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Fixed ISO-date API-version string sent on every request, including the
/// challenge probe. See `DESIGN.md` for why this value was chosen.
pub const API_VERSION: &str = "2024-01-01";

const HEADER_API_VERSION: &str = "X-Kolide-Api-Version";
const HEADER_CHALLENGE: &str = "X-Kolide-Challenge";
const HEADER_KEY: &str = "X-Kolide-Key";
const HEADER_SIGNATURE: &str = "X-Kolide-Signature";
const HEADER_KEY2: &str = "X-Kolide-Key2";
const HEADER_SIGNATURE2: &str = "X-Kolide-Signature2";

#[derive(Deserialize)]
struct ConfigResponse<'a> {
    token: String,
    #[serde(borrow)]
    config: &'a serde_json::value::RawValue,
}

/// The base URL (host, with scheme already applied) the transport talks
/// to. Swappable at runtime via [`ControlTransport::set_base_url`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BaseUrl(String);

impl BaseUrl {
    /// Build from a scheme (`"http"`/`"https"`) and a host, e.g.
    /// `BaseUrl::new("https", "k2.example.com")`.
    pub fn new(scheme: &str, host: &str) -> Self {
        Self(format!("{scheme}://{host}"))
    }

    fn join(&self, path: &str) -> String {
        format!("{}{}", self.0, path)
    }
}

/// Performs the challenge-response config fetch and hash-addressed blob
/// fetch against the management server.
pub struct ControlTransport {
    client: reqwest::Client,
    base_url: RwLock<BaseUrl>,
    local_signer: Option<Arc<dyn Signer>>,
    hardware_signer: Option<Arc<dyn Signer>>,
    bearer_token: RwLock<Option<String>>,
}

impl ControlTransport {
    /// Build a transport with an explicit [`reqwest::Client`] (so callers
    /// control timeouts) and zero, one, or two signers. A signer whose
    /// `type_() == "noop"` is treated as absent and its headers are
    /// omitted.
    pub fn new(
        client: reqwest::Client,
        base_url: BaseUrl,
        local_signer: Option<Arc<dyn Signer>>,
        hardware_signer: Option<Arc<dyn Signer>>,
    ) -> Self {
        Self {
            client,
            base_url: RwLock::new(base_url),
            local_signer: local_signer.filter(|s| !s.is_noop()),
            hardware_signer: hardware_signer.filter(|s| !s.is_noop()),
            bearer_token: RwLock::new(None),
        }
    }

    /// Rewrite the base URL. Called by a configuration-change observer;
    /// safe to call while a request is in flight.
    pub async fn set_base_url(&self, base_url: BaseUrl) {
        *self.base_url.write().await = base_url;
    }

    /// `GET /api/agent/config` for a challenge, then `POST /api/agent/config`
    /// with the signed challenge. Caches the returned bearer token and
    /// returns the raw manifest bytes.
    pub async fn get_config(&self) -> Result<Vec<u8>, ControlError> {
        let base = self.base_url.read().await.clone();

        let challenge_url = base.join("/api/agent/config");
        let challenge_resp = self
            .client
            .get(&challenge_url)
            .header(HEADER_API_VERSION, API_VERSION)
            .send()
            .await
            .map_err(network_error("GetConfig challenge"))?;
        let challenge_resp = expect_200(challenge_resp, &challenge_url).await?;
        let challenge = challenge_resp
            .bytes()
            .await
            .map_err(network_error("GetConfig challenge body"))?;

        let mut request = self
            .client
            .post(&challenge_url)
            .header(HEADER_API_VERSION, API_VERSION)
            .header(
                HEADER_CHALLENGE,
                base64::engine::general_purpose::STANDARD.encode(&challenge),
            );

        if let Some(signer) = &self.local_signer {
            request = attach_signer_headers(request, signer.as_ref(), HEADER_KEY, HEADER_SIGNATURE, &challenge).await?;
        }
        if let Some(signer) = &self.hardware_signer {
            request = attach_signer_headers(request, signer.as_ref(), HEADER_KEY2, HEADER_SIGNATURE2, &challenge).await?;
        }

        let response = request
            .send()
            .await
            .map_err(network_error("GetConfig response"))?;
        let response = expect_200(response, &challenge_url).await?;
        let body = response
            .bytes()
            .await
            .map_err(network_error("GetConfig response body"))?;

        let parsed: ConfigResponse = serde_json::from_slice(&body).map_err(|e| {
            ControlError::new(ErrorCode::DecodeManifestInvalid, "malformed config response")
                .with_subsystem("manifest")
                .with_source(e)
        })?;

        *self.bearer_token.write().await = Some(parsed.token.clone());
        debug!(target: "control_service.transport", "config fetched, token refreshed");
        Ok(parsed.config.get().as_bytes().to_vec())
    }

    /// `GET /api/agent/object/<hash>` with the cached bearer token,
    /// fetching one first via [`Self::get_config`] if none is cached yet.
    pub async fn get_subsystem_data(&self, hash: &str) -> Result<Vec<u8>, ControlError> {
        if self.bearer_token.read().await.is_none() {
            self.get_config().await?;
        }
        let token = self
            .bearer_token
            .read()
            .await
            .clone()
            .ok_or_else(|| ControlError::new(ErrorCode::TransportNoToken, "no bearer token available"))?;

        let base = self.base_url.read().await.clone();
        let url = base.join(&format!("/api/agent/object/{hash}"));
        let response = self
            .client
            .get(&url)
            .header(HEADER_API_VERSION, API_VERSION)
            .bearer_auth(token)
            .send()
            .await
            .map_err(network_error("GetSubsystemData"))?;
        let response = expect_200(response, &url).await?;
        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(network_error("GetSubsystemData body"))
    }
}

async fn attach_signer_headers(
    request: reqwest::RequestBuilder,
    signer: &dyn Signer,
    key_header: &'static str,
    sig_header: &'static str,
    challenge: &[u8],
) -> Result<reqwest::RequestBuilder, ControlError> {
    let public_key = signer.public_key_der()?;
    // Hardware-backed signers can transiently fail; retry with a bounded
    // backoff rather than failing the whole challenge-response round trip.
    let retry_config = RetryConfig::default();
    let signature = cs_retry::retry_async(
        &retry_config,
        || signer.sign(challenge),
        cs_retry::is_retryable,
    )
    .await?;
    Ok(request
        .header(key_header, base64::engine::general_purpose::STANDARD.encode(public_key))
        .header(sig_header, base64::engine::general_purpose::STANDARD.encode(signature)))
}

async fn expect_200(response: reqwest::Response, url: &str) -> Result<reqwest::Response, ControlError> {
    if response.status().as_u16() == 200 {
        Ok(response)
    } else {
        Err(ControlError::new(ErrorCode::TransportBadStatus, "unexpected HTTP status")
            .with_context("status", response.status().as_u16())
            .with_context("url", url))
    }
}

fn network_error(context: &'static str) -> impl FnOnce(reqwest::Error) -> ControlError {
    move |e| {
        ControlError::new(ErrorCode::TransportNetwork, "network error")
            .with_context("context", context)
            .with_source(e)
    }
}
