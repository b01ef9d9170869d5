//! Custom test assertions for expressive tests
//!
//! Provides trait-based assertions for SSO token validation.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use common::jwt::deserialize_audience;
use jsonwebtoken::{DecodingKey, Validation};
use serde::Deserialize;
use std::collections::HashSet;

const RSA_ALGORITHMS: [&str; 3] = ["RS256", "RS384", "RS512"];

/// JWT header structure
#[derive(Debug, Deserialize)]
struct JwtHeader {
    pub alg: String,
    pub typ: String,
    #[serde(default)]
    pub kid: Option<String>,
}

/// SSO token claims structure
#[derive(Debug, Deserialize)]
struct JwtClaims {
    pub iss: String,
    pub sub: String,
    #[serde(default, deserialize_with = "deserialize_audience")]
    pub aud: Vec<String>,
    #[serde(default)]
    pub exp: Option<i64>,
}

fn segment(token: &str, index: usize) -> Vec<u8> {
    let part = token
        .split('.')
        .nth(index)
        .unwrap_or_else(|| panic!("JWT has no segment {}", index));
    URL_SAFE_NO_PAD
        .decode(part)
        .unwrap_or_else(|e| panic!("Failed to base64 decode JWT segment {}: {}", index, e))
}

fn header(token: &str) -> JwtHeader {
    serde_json::from_slice(&segment(token, 0)).expect("Failed to parse JWT header")
}

fn claims(token: &str) -> JwtClaims {
    serde_json::from_slice(&segment(token, 1)).expect("Failed to parse JWT claims")
}

/// Custom assertions for issued SSO tokens
///
/// # Example
/// ```rust,ignore
/// token
///     .assert_valid_jwt()
///     .assert_for_subject("alice")
///     .assert_has_audience("webhdfs")
///     .assert_verifies_with(server.public_key_pem());
/// ```
pub trait TokenAssertions {
    /// Assert that the token is a three-segment RSA-signed JWT
    fn assert_valid_jwt(&self) -> &Self;

    /// Assert that the token is for the specified subject
    fn assert_for_subject(&self, subject: &str) -> &Self;

    /// Assert the `iss` claim
    fn assert_issued_by(&self, issuer: &str) -> &Self;

    /// Assert that the token lists the specified audience
    fn assert_has_audience(&self, audience: &str) -> &Self;

    /// Assert that the token header names the specified key id
    fn assert_signed_by(&self, key_id: &str) -> &Self;

    /// Assert that the token expires within the specified seconds
    fn assert_expires_in(&self, seconds: u64) -> &Self;

    /// Assert that the token carries no `exp` claim
    fn assert_no_expiry(&self) -> &Self;

    /// Assert that the signature verifies against an SPKI public key PEM
    fn assert_verifies_with(&self, public_pem: &str) -> &Self;
}

impl TokenAssertions for str {
    fn assert_valid_jwt(&self) -> &Self {
        let parts = self.split('.').count();
        assert_eq!(
            parts, 3,
            "JWT must have 3 parts (header.payload.signature), got {}",
            parts
        );

        let header = header(self);
        assert!(
            RSA_ALGORITHMS.contains(&header.alg.as_str()),
            "Expected an RSA algorithm, got {}",
            header.alg
        );
        assert_eq!(header.typ, "JWT", "Expected JWT type");

        claims(self);
        self
    }

    fn assert_for_subject(&self, subject: &str) -> &Self {
        let claims = claims(self);
        assert_eq!(
            claims.sub, subject,
            "Expected subject '{}', got '{}'",
            subject, claims.sub
        );
        self
    }

    fn assert_issued_by(&self, issuer: &str) -> &Self {
        let claims = claims(self);
        assert_eq!(
            claims.iss, issuer,
            "Expected issuer '{}', got '{}'",
            issuer, claims.iss
        );
        self
    }

    fn assert_has_audience(&self, audience: &str) -> &Self {
        let claims = claims(self);
        assert!(
            claims.aud.iter().any(|aud| aud == audience),
            "Token does not contain audience '{}'. Available audiences: {:?}",
            audience,
            claims.aud
        );
        self
    }

    fn assert_signed_by(&self, key_id: &str) -> &Self {
        let header = header(self);
        assert_eq!(
            header.kid.as_deref(),
            Some(key_id),
            "Expected key_id '{}', got {:?}",
            key_id,
            header.kid
        );
        self
    }

    fn assert_expires_in(&self, seconds: u64) -> &Self {
        let exp = claims(self).exp.expect("Token has no exp claim");
        let expires_in = exp - chrono::Utc::now().timestamp();

        // Allow 5-second tolerance for clock skew
        assert!(
            (expires_in - seconds as i64).abs() <= 5,
            "Expected token to expire in {} seconds, but expires in {} seconds",
            seconds,
            expires_in
        );
        self
    }

    fn assert_no_expiry(&self) -> &Self {
        let claims = claims(self);
        assert!(
            claims.exp.is_none(),
            "Expected no exp claim, got {:?}",
            claims.exp
        );
        self
    }

    fn assert_verifies_with(&self, public_pem: &str) -> &Self {
        let alg = jsonwebtoken::decode_header(self)
            .expect("Failed to decode JWT header")
            .alg;
        let key = DecodingKey::from_rsa_pem(public_pem.as_bytes()).expect("Invalid public key PEM");

        // Signature only; SSO tokens may omit exp and aud
        let mut validation = Validation::new(alg);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims = HashSet::new();

        let result = jsonwebtoken::decode::<serde_json::Value>(self, &key, &validation);
        assert!(
            result.is_ok(),
            "Token signature did not verify: {:?}",
            result.err()
        );
        self
    }
}
