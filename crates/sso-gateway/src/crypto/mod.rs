//! Token codec: compact signed token issue, verify and decode.
//!
//! A token is three base64url segments, `header.claims.signature`. The
//! signature covers the `header.claims` bytes exactly as they appear in the
//! compact form. Verification never re-encodes a parsed token; it reuses the
//! signing input slice taken from the original string.
//!
//! Signing algorithms are resolved through [`TokenAlgorithm`]. Only the RSA
//! PKCS#1 v1.5 family is registered; any other name fails issuance with
//! `UnsupportedAlgorithm` before any claims are serialized.

use crate::errors::GatewayError;
use common::jwt::{self, JwtValidationError};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::instrument;

/// `typ` header value for every issued token.
const TOKEN_TYPE: &str = "JWT";

// ============================================================================
// Algorithm Registry
// ============================================================================

/// Registered signing algorithms.
///
/// Adding an algorithm means adding a variant here plus its name and
/// primitive below; call sites only ever hold a `TokenAlgorithm`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenAlgorithm {
    Rs256,
    Rs384,
    Rs512,
}

impl TokenAlgorithm {
    /// Every algorithm the codec can sign and verify with.
    pub const SUPPORTED: [TokenAlgorithm; 3] = [
        TokenAlgorithm::Rs256,
        TokenAlgorithm::Rs384,
        TokenAlgorithm::Rs512,
    ];

    /// The JOSE `alg` name.
    pub fn name(self) -> &'static str {
        match self {
            TokenAlgorithm::Rs256 => "RS256",
            TokenAlgorithm::Rs384 => "RS384",
            TokenAlgorithm::Rs512 => "RS512",
        }
    }

    fn primitive(self) -> Algorithm {
        match self {
            TokenAlgorithm::Rs256 => Algorithm::RS256,
            TokenAlgorithm::Rs384 => Algorithm::RS384,
            TokenAlgorithm::Rs512 => Algorithm::RS512,
        }
    }
}

impl FromStr for TokenAlgorithm {
    type Err = GatewayError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Self::SUPPORTED
            .into_iter()
            .find(|alg| alg.name() == name)
            .ok_or_else(|| GatewayError::UnsupportedAlgorithm(name.to_string()))
    }
}

impl fmt::Display for TokenAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Header and Claims
// ============================================================================

/// Token header segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenHeader {
    pub alg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typ: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
}

/// Token claims segment.
///
/// `aud` is omitted when empty and `exp` when the token never expires.
/// The `sub` field names the authenticated principal and is redacted
/// in Debug output.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub iss: String,
    pub sub: String,
    #[serde(
        default,
        skip_serializing_if = "Vec::is_empty",
        deserialize_with = "jwt::deserialize_audience"
    )]
    pub aud: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
}

impl fmt::Debug for Claims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Claims")
            .field("iss", &self.iss)
            .field("sub", &"[REDACTED]")
            .field("aud", &self.aud)
            .field("exp", &self.exp)
            .field("iat", &self.iat)
            .finish()
    }
}

// ============================================================================
// Keys
// ============================================================================

/// RSA private key used to sign tokens, tagged with its key id.
#[derive(Clone)]
pub struct SigningKey {
    encoding: EncodingKey,
    kid: String,
}

impl SigningKey {
    /// Load a PKCS#1 or PKCS#8 PEM RSA private key.
    pub fn from_rsa_pem(pem: &[u8], kid: impl Into<String>) -> Result<Self, GatewayError> {
        let encoding = EncodingKey::from_rsa_pem(pem)
            .map_err(|e| GatewayError::Crypto(format!("Invalid private key format: {}", e)))?;
        Ok(Self {
            encoding,
            kid: kid.into(),
        })
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("encoding", &"[REDACTED]")
            .field("kid", &self.kid)
            .finish()
    }
}

/// RSA public key used to verify tokens.
#[derive(Clone)]
pub struct VerificationKey {
    decoding: DecodingKey,
}

impl VerificationKey {
    /// Load a PKCS#1 or SPKI PEM RSA public key.
    pub fn from_rsa_pem(pem: &[u8]) -> Result<Self, GatewayError> {
        let decoding = DecodingKey::from_rsa_pem(pem)
            .map_err(|e| GatewayError::Crypto(format!("Invalid public key format: {}", e)))?;
        Ok(Self { decoding })
    }
}

impl fmt::Debug for VerificationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerificationKey").finish_non_exhaustive()
    }
}

// ============================================================================
// Signed Token
// ============================================================================

/// A signed token in decoded form.
///
/// Immutable once built. `signing_input` is the `header.claims` text the
/// signature was computed over; `compact()` re-joins it with the signature
/// unchanged.
#[derive(Debug, Clone)]
pub struct SignedToken {
    header: TokenHeader,
    claims: Claims,
    signing_input: String,
    signature: String,
}

impl SignedToken {
    /// Parse a compact token without verifying it.
    ///
    /// # Errors
    ///
    /// `MalformedToken` unless the input is three segments with a JSON header,
    /// JSON claims and a base64url signature.
    pub fn parse(compact: &str) -> Result<Self, GatewayError> {
        let segments = jwt::split_compact(compact).map_err(malformed)?;
        let header: TokenHeader = jwt::decode_segment(segments.header).map_err(malformed)?;
        let claims: Claims = jwt::decode_segment(segments.claims).map_err(malformed)?;
        jwt::decode_segment_bytes(segments.signature).map_err(malformed)?;

        Ok(Self {
            header,
            claims,
            signing_input: segments.signing_input.to_string(),
            signature: segments.signature.to_string(),
        })
    }

    pub fn header(&self) -> &TokenHeader {
        &self.header
    }

    pub fn claims(&self) -> &Claims {
        &self.claims
    }

    pub fn into_claims(self) -> Claims {
        self.claims
    }

    /// The `alg` named in the header.
    pub fn algorithm(&self) -> &str {
        &self.header.alg
    }

    pub fn issuer(&self) -> &str {
        &self.claims.iss
    }

    pub fn subject(&self) -> &str {
        &self.claims.sub
    }

    pub fn audiences(&self) -> &[String] {
        &self.claims.aud
    }

    /// Absolute expiry (Unix epoch seconds), if the token expires.
    pub fn expires_at(&self) -> Option<i64> {
        self.claims.exp
    }

    /// The exact `header.claims` bytes covered by the signature.
    pub fn signing_input(&self) -> &str {
        &self.signing_input
    }

    /// base64url-encoded signature segment.
    pub fn signature(&self) -> &str {
        &self.signature
    }

    /// The compact `header.claims.signature` form.
    pub fn compact(&self) -> String {
        format!("{}.{}", self.signing_input, self.signature)
    }
}

impl fmt::Display for SignedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.signing_input, self.signature)
    }
}

impl FromStr for SignedToken {
    type Err = GatewayError;

    fn from_str(compact: &str) -> Result<Self, Self::Err> {
        Self::parse(compact)
    }
}

fn malformed(_: JwtValidationError) -> GatewayError {
    GatewayError::MalformedToken
}

// ============================================================================
// Codec Operations
// ============================================================================

/// Sign `claims` with `key` using the algorithm registered under `algorithm`.
///
/// # Errors
///
/// - `UnsupportedAlgorithm` if `algorithm` is not registered; nothing is signed
/// - `Crypto` if serialization or the signing primitive fails
#[instrument(skip_all, fields(alg = %algorithm))]
pub fn issue_token(
    claims: Claims,
    algorithm: &str,
    key: &SigningKey,
) -> Result<SignedToken, GatewayError> {
    let algorithm: TokenAlgorithm = algorithm.parse()?;

    let header = TokenHeader {
        alg: algorithm.name().to_string(),
        typ: Some(TOKEN_TYPE.to_string()),
        kid: Some(key.kid.clone()),
    };

    let header_json = serde_json::to_vec(&header)
        .map_err(|e| GatewayError::Crypto(format!("Header serialization failed: {}", e)))?;
    let claims_json = serde_json::to_vec(&claims)
        .map_err(|e| GatewayError::Crypto(format!("Claims serialization failed: {}", e)))?;

    let signing_input = format!(
        "{}.{}",
        jwt::encode_segment(&header_json),
        jwt::encode_segment(&claims_json)
    );

    let signature = jsonwebtoken::crypto::sign(
        signing_input.as_bytes(),
        &key.encoding,
        algorithm.primitive(),
    )
    .map_err(|e| GatewayError::Crypto(format!("Token signing operation failed: {}", e)))?;

    Ok(SignedToken {
        header,
        claims,
        signing_input,
        signature,
    })
}

/// Check `token`'s signature against `key`.
///
/// Returns `false` for a bad signature, a signature made with a different
/// key, or a header naming an unregistered algorithm.
#[instrument(skip_all)]
pub fn verify_token(token: &SignedToken, key: &VerificationKey) -> bool {
    let algorithm = match token.algorithm().parse::<TokenAlgorithm>() {
        Ok(algorithm) => algorithm,
        Err(_) => {
            tracing::debug!(
                target: "sso.crypto",
                alg = %token.algorithm(),
                "Token rejected: unregistered algorithm in header"
            );
            return false;
        }
    };

    match jsonwebtoken::crypto::verify(
        &token.signature,
        token.signing_input.as_bytes(),
        &key.decoding,
        algorithm.primitive(),
    ) {
        Ok(valid) => {
            if !valid {
                tracing::debug!(target: "sso.crypto", "Token rejected: signature mismatch");
            }
            valid
        }
        Err(e) => {
            tracing::debug!(target: "sso.crypto", error = %e, "Token rejected: verification error");
            false
        }
    }
}

/// Parse and verify a compact token.
///
/// # Errors
///
/// `MalformedToken` if `compact` cannot be parsed. A parsable token with a
/// bad signature is `Ok(false)`.
pub fn verify_compact(compact: &str, key: &VerificationKey) -> Result<bool, GatewayError> {
    let token = SignedToken::parse(compact)?;
    Ok(verify_token(&token, key))
}

/// Read the claims of a compact token without verifying it.
///
/// # Errors
///
/// `MalformedToken` if `compact` cannot be parsed.
pub fn decode_claims(compact: &str) -> Result<Claims, GatewayError> {
    SignedToken::parse(compact).map(SignedToken::into_claims)
}
