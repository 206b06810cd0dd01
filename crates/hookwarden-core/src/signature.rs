//! Webhook signature verification.
//!
//! Every provider signs the raw request body with HMAC-SHA256 and a shared
//! secret, but each encodes the result differently:
//!
//! | Provider | Header format | Signed bytes |
//! |----------|---------------|--------------|
//! | billing  | `t=<unix>,v1=<hex>[,v0=<hex>]` | `"{t}.{payload}"` |
//! | identity | `v1=<hex>[ v0=<hex>]` (space or comma separated) | payload |
//! | social   | `sha256=<hex>` or bare hex | payload |
//!
//! Verification never raises: every outcome is a [`VerificationResult`].
//! Digest comparison is constant-time.
//!
//! # Examples
//!
//! ```rust
//! use hookwarden_core::signature::{sign, verify, VerifyOptions, WebhookSecret};
//! use hookwarden_core::{Timestamp, WebhookSource};
//!
//! let secret = WebhookSecret::new("whsec_test");
//! let header = sign(WebhookSource::Social, b"{}", &secret, Timestamp::now());
//!
//! let result = verify(
//!     WebhookSource::Social,
//!     b"{}",
//!     Some(&header),
//!     Some(&secret),
//!     &VerifyOptions::default(),
//! );
//! assert!(result.is_valid());
//! ```

use hmac::{Hmac, Mac};
use serde::{Deserialize, Deserializer};
use sha2::Sha256;
use std::time::Duration;
use subtle::{Choice, ConstantTimeEq};
use zeroize::Zeroizing;

use crate::{Timestamp, WebhookSource};

type HmacSha256 = Hmac<Sha256>;

/// Default replay window for timestamped signatures.
pub const DEFAULT_TOLERANCE: Duration = Duration::from_secs(300);

// ============================================================================
// Secrets
// ============================================================================

/// Shared secret used to sign a provider's webhooks.
///
/// The value is wiped from memory on drop and never printed.
#[derive(Clone)]
pub struct WebhookSecret(Zeroizing<String>);

impl WebhookSecret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(Zeroizing::new(value.into()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The raw secret. Avoid copying it into long-lived strings.
    pub fn expose(&self) -> &str {
        &self.0
    }

    fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl std::fmt::Debug for WebhookSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("WebhookSecret(<REDACTED>)")
    }
}

impl<'de> Deserialize<'de> for WebhookSecret {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::new)
    }
}

// ============================================================================
// Results
// ============================================================================

/// Reason a signature was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SignatureFailure {
    #[error("missing credentials")]
    MissingCredentials,

    #[error("invalid signature format")]
    InvalidFormat,

    #[error("signature mismatch")]
    Mismatch,

    #[error("timestamp outside tolerance")]
    TimestampOutsideTolerance,
}

/// Outcome of verifying one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationResult {
    pub valid: bool,
    pub reason: Option<SignatureFailure>,
    /// Timestamp embedded in the signature header, when the scheme carries one
    pub event_timestamp: Option<Timestamp>,
}

impl VerificationResult {
    fn accepted(event_timestamp: Option<Timestamp>) -> Self {
        Self {
            valid: true,
            reason: None,
            event_timestamp,
        }
    }

    fn rejected(reason: SignatureFailure) -> Self {
        Self {
            valid: false,
            reason: Some(reason),
            event_timestamp: None,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

/// Options controlling timestamp checks.
#[derive(Debug, Clone)]
pub struct VerifyOptions {
    /// Maximum allowed distance between the signed timestamp and now
    pub tolerance: Duration,
    /// Override for the current time
    pub now: Option<Timestamp>,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
            now: None,
        }
    }
}

impl VerifyOptions {
    pub fn with_tolerance(tolerance: Duration) -> Self {
        Self {
            tolerance,
            now: None,
        }
    }

    pub fn at(mut self, now: Timestamp) -> Self {
        self.now = Some(now);
        self
    }
}

// ============================================================================
// Header parsing
// ============================================================================

/// Digests and optional timestamp extracted from a signature header.
#[derive(Debug)]
struct ParsedSignature {
    timestamp: Option<i64>,
    digests: Vec<Vec<u8>>,
}

fn decode_digest(value: &str) -> Result<Vec<u8>, SignatureFailure> {
    let value = value.trim();
    if value.is_empty() {
        return Err(SignatureFailure::InvalidFormat);
    }
    hex::decode(value).map_err(|_| SignatureFailure::InvalidFormat)
}

/// Parse `t=<unix>,v1=<hex>,v0=<hex>`. Unknown schemes are ignored.
fn parse_timestamped(header: &str) -> Result<ParsedSignature, SignatureFailure> {
    let mut timestamp = None;
    let mut digests = Vec::new();

    for part in header.split(',') {
        let (key, value) = part
            .trim()
            .split_once('=')
            .ok_or(SignatureFailure::InvalidFormat)?;
        match key {
            "t" => {
                let t = value
                    .trim()
                    .parse::<i64>()
                    .map_err(|_| SignatureFailure::InvalidFormat)?;
                timestamp = Some(t);
            }
            "v1" | "v0" => digests.push(decode_digest(value)?),
            _ => {}
        }
    }

    if timestamp.is_none() || digests.is_empty() {
        return Err(SignatureFailure::InvalidFormat);
    }

    Ok(ParsedSignature { timestamp, digests })
}

/// Parse versioned digests separated by spaces or commas.
fn parse_versioned(header: &str) -> Result<ParsedSignature, SignatureFailure> {
    let mut digests = Vec::new();

    for part in header
        .split(|c: char| c == ' ' || c == ',')
        .filter(|p| !p.is_empty())
    {
        let (version, value) = part
            .split_once('=')
            .ok_or(SignatureFailure::InvalidFormat)?;
        if version == "v1" || version == "v0" {
            digests.push(decode_digest(value)?);
        }
    }

    if digests.is_empty() {
        return Err(SignatureFailure::InvalidFormat);
    }

    Ok(ParsedSignature {
        timestamp: None,
        digests,
    })
}

/// Parse `sha256=<hex>` or a bare hex digest.
fn parse_prefixed(header: &str) -> Result<ParsedSignature, SignatureFailure> {
    let hex_part = header.strip_prefix("sha256=").unwrap_or(header);
    Ok(ParsedSignature {
        timestamp: None,
        digests: vec![decode_digest(hex_part)?],
    })
}

fn parse_header(source: WebhookSource, header: &str) -> Result<ParsedSignature, SignatureFailure> {
    match source {
        WebhookSource::Billing => parse_timestamped(header),
        WebhookSource::Identity => parse_versioned(header),
        WebhookSource::Social => parse_prefixed(header),
    }
}

// ============================================================================
// Verification
// ============================================================================

fn compute_digest(secret: &WebhookSecret, timestamp: Option<i64>, payload: &[u8]) -> Vec<u8> {
    // HMAC accepts keys of any length, new_from_slice cannot fail for Sha256
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return Vec::new(),
    };
    if let Some(t) = timestamp {
        mac.update(t.to_string().as_bytes());
        mac.update(b".");
    }
    mac.update(payload);
    mac.finalize().into_bytes().to_vec()
}

/// Compare `expected` against every candidate without short-circuiting.
fn matches_any(expected: &[u8], candidates: &[Vec<u8>]) -> bool {
    let mut matched = Choice::from(0u8);
    for candidate in candidates {
        matched |= expected.ct_eq(candidate.as_slice());
    }
    matched.into()
}

/// Verify a webhook signature against a single shared secret.
pub fn verify(
    source: WebhookSource,
    payload: &[u8],
    header: Option<&str>,
    secret: Option<&WebhookSecret>,
    opts: &VerifyOptions,
) -> VerificationResult {
    match secret {
        Some(secret) => verify_with_secrets(source, payload, header, &[secret], opts),
        None => VerificationResult::rejected(SignatureFailure::MissingCredentials),
    }
}

/// Verify a webhook signature, accepting a digest made with any of `secrets`.
///
/// Used while a provider secret is being rotated.
pub fn verify_with_secrets(
    source: WebhookSource,
    payload: &[u8],
    header: Option<&str>,
    secrets: &[&WebhookSecret],
    opts: &VerifyOptions,
) -> VerificationResult {
    let header = match header.map(str::trim) {
        Some(h) if !h.is_empty() => h,
        _ => return VerificationResult::rejected(SignatureFailure::MissingCredentials),
    };

    let secrets: Vec<&WebhookSecret> = secrets.iter().copied().filter(|s| !s.is_empty()).collect();
    if secrets.is_empty() {
        return VerificationResult::rejected(SignatureFailure::MissingCredentials);
    }

    let parsed = match parse_header(source, header) {
        Ok(parsed) => parsed,
        Err(reason) => return VerificationResult::rejected(reason),
    };

    let digest_matches = secrets.iter().fold(false, |acc, secret| {
        let expected = compute_digest(secret, parsed.timestamp, payload);
        matches_any(&expected, &parsed.digests) | acc
    });

    if !digest_matches {
        return VerificationResult::rejected(SignatureFailure::Mismatch);
    }

    let event_timestamp = match parsed.timestamp {
        Some(t) => {
            let now = opts.now.unwrap_or_else(Timestamp::now);
            if now.unix_seconds().abs_diff(t) > opts.tolerance.as_secs() {
                return VerificationResult::rejected(SignatureFailure::TimestampOutsideTolerance);
            }
            Timestamp::from_unix_seconds(t)
        }
        None => None,
    };

    VerificationResult::accepted(event_timestamp)
}

/// Produce a valid signature header for `payload` in the provider's format.
///
/// Used by test tooling and by operators replaying captured payloads.
pub fn sign(
    source: WebhookSource,
    payload: &[u8],
    secret: &WebhookSecret,
    timestamp: Timestamp,
) -> String {
    match source {
        WebhookSource::Billing => {
            let t = timestamp.unix_seconds();
            let digest = compute_digest(secret, Some(t), payload);
            format!("t={},v1={}", t, hex::encode(digest))
        }
        WebhookSource::Identity => {
            format!("v1={}", hex::encode(compute_digest(secret, None, payload)))
        }
        WebhookSource::Social => {
            format!(
                "sha256={}",
                hex::encode(compute_digest(secret, None, payload))
            )
        }
    }
}

#[cfg(test)]
#[path = "signature_tests.rs"]
mod tests;
