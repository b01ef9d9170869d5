//! JWT utilities shared across the SSO gateway crates.
//!
//! This module provides the compact-form plumbing that both the token codec
//! and the test assertions rely on:
//! - Size limit checked before any parsing (DoS prevention)
//! - Three-segment split that keeps the exact signing input bytes
//! - base64url segment encode/decode
//! - `aud` claim deserialization (single string or array)
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing
//! - The signing input is returned as a slice of the original token, never
//!   re-serialized, so signature checks run over byte-identical input
//! - Error messages are generic; details go to debug logs
//!
//! # Usage
//!
//! ```rust,ignore
//! use common::jwt::{split_compact, decode_segment};
//!
//! let segments = split_compact(token)?;
//! let claims: MyClaims = decode_segment(segments.claims)?;
//! verify(segments.signing_input.as_bytes(), segments.signature)?;
//! ```

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::de::{self, DeserializeOwned, Deserializer, SeqAccess, Visitor};
use std::fmt;
use thiserror::Error;

// =============================================================================
// Constants
// =============================================================================

/// Maximum allowed JWT size in bytes (8KB).
///
/// SSO tokens carry an issuer, subject, a handful of audiences and an RSA
/// signature (~342 base64 chars for 2048-bit keys), so they stay well under
/// 1KB. Anything past 8KB is rejected before base64 decoding.
pub const MAX_JWT_SIZE_BYTES: usize = 8192; // 8KB

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur while taking a compact token apart.
///
/// Note: Error messages are intentionally generic to prevent information leakage.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JwtValidationError {
    /// Token size exceeds maximum allowed.
    #[error("The token is malformed")]
    TokenTooLarge,

    /// Token format is invalid (segment count, base64 or JSON).
    #[error("The token is malformed")]
    MalformedToken,
}

// =============================================================================
// Compact Form
// =============================================================================

/// The three segments of a compact token, borrowed from the original string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactSegments<'a> {
    /// base64url-encoded header JSON.
    pub header: &'a str,
    /// base64url-encoded claims JSON.
    pub claims: &'a str,
    /// base64url-encoded signature bytes (may be empty).
    pub signature: &'a str,
    /// `header.claims` exactly as it appears in the token.
    pub signing_input: &'a str,
}

/// Split a compact token into its header, claims and signature segments.
///
/// # Errors
///
/// - `TokenTooLarge` - Token exceeds `MAX_JWT_SIZE_BYTES`
/// - `MalformedToken` - Token does not have exactly three `.`-separated
///   segments, or the header/claims segment is empty
pub fn split_compact(token: &str) -> Result<CompactSegments<'_>, JwtValidationError> {
    if token.len() > MAX_JWT_SIZE_BYTES {
        tracing::debug!(
            target: "common.jwt",
            token_size = token.len(),
            max_size = MAX_JWT_SIZE_BYTES,
            "Token rejected: size exceeds maximum allowed"
        );
        return Err(JwtValidationError::TokenTooLarge);
    }

    let (signing_input, signature) = token
        .rsplit_once('.')
        .ok_or(JwtValidationError::MalformedToken)?;
    let (header, claims) = signing_input
        .split_once('.')
        .ok_or(JwtValidationError::MalformedToken)?;

    // A fourth segment would leave a '.' inside the claims part
    if claims.contains('.') || header.is_empty() || claims.is_empty() {
        tracing::debug!(
            target: "common.jwt",
            segments = token.split('.').count(),
            "Token rejected: invalid compact format"
        );
        return Err(JwtValidationError::MalformedToken);
    }

    Ok(CompactSegments {
        header,
        claims,
        signature,
        signing_input,
    })
}

/// Encode bytes as an unpadded base64url segment.
#[must_use]
pub fn encode_segment(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Decode a base64url segment into raw bytes.
///
/// # Errors
///
/// Returns `MalformedToken` if the segment is not valid unpadded base64url.
pub fn decode_segment_bytes(segment: &str) -> Result<Vec<u8>, JwtValidationError> {
    URL_SAFE_NO_PAD.decode(segment).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Failed to decode token segment base64");
        JwtValidationError::MalformedToken
    })
}

/// Decode a base64url JSON segment into `T`.
///
/// # Errors
///
/// Returns `MalformedToken` on bad base64 or JSON that does not fit `T`.
pub fn decode_segment<T: DeserializeOwned>(segment: &str) -> Result<T, JwtValidationError> {
    let bytes = decode_segment_bytes(segment)?;
    serde_json::from_slice(&bytes).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Failed to parse token segment JSON");
        JwtValidationError::MalformedToken
    })
}

// =============================================================================
// Audience Claim
// =============================================================================

/// Deserialize an `aud` claim that may be a single string, an array of
/// strings, `null`, or absent (with `#[serde(default)]`).
///
/// # Errors
///
/// Returns a serde error for any other JSON type.
pub fn deserialize_audience<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    struct AudienceVisitor;

    impl<'de> Visitor<'de> for AudienceVisitor {
        type Value = Vec<String>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a string or an array of strings")
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
            Ok(vec![value.to_string()])
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(Vec::new())
        }

        fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(Vec::new())
        }

        fn visit_some<D: Deserializer<'de>>(self, d: D) -> Result<Self::Value, D::Error> {
            d.deserialize_any(self)
        }

        fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
            let mut audiences = Vec::with_capacity(seq.size_hint().unwrap_or(0));
            while let Some(audience) = seq.next_element::<String>()? {
                audiences.push(audience);
            }
            Ok(audiences)
        }
    }

    deserializer.deserialize_option(AudienceVisitor)
}
