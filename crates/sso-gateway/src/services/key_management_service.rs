//! Signing key loading and publication.
//!
//! The gateway holds exactly one RSA key pair for its lifetime. It is loaded
//! from a PEM file at startup, or generated in memory when no file is
//! configured. A probe token is signed and verified before the key is put
//! into service.

use crate::crypto::{self, Claims, SigningKey, TokenAlgorithm, VerificationKey};
use crate::errors::GatewayError;
use crate::models::{JsonWebKey, Jwks};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use common::secret::{ExposeSecret, SecretString};
use rand::rngs::OsRng;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::RsaPrivateKey;
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;
use tracing::instrument;

/// Minimum accepted RSA modulus size.
pub const MIN_RSA_KEY_BITS: usize = 2048;

/// Bytes of the public key digest used as the key id.
const KID_DIGEST_BYTES: usize = 8;

/// Issuer used for the startup probe token.
const SELF_CHECK_ISSUER: &str = "sso-gateway-self-check";

/// The gateway's signing key and its public counterpart.
#[derive(Clone)]
pub struct SigningKeyPair {
    signing: SigningKey,
    verification: VerificationKey,
    kid: String,
    modulus: Vec<u8>,
    exponent: Vec<u8>,
}

impl SigningKeyPair {
    /// Load a PKCS#8 (`BEGIN PRIVATE KEY`) or PKCS#1 (`BEGIN RSA PRIVATE KEY`) PEM.
    pub fn from_private_key_pem(pem: &str) -> Result<Self, GatewayError> {
        let private_key = RsaPrivateKey::from_pkcs8_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
            .map_err(|e| GatewayError::Crypto(format!("Invalid private key format: {}", e)))?;
        Self::from_private_key(&private_key)
    }

    /// Generate an in-memory key. Tokens signed with it do not survive a restart.
    pub fn generate_ephemeral() -> Result<Self, GatewayError> {
        let private_key = RsaPrivateKey::new(&mut OsRng, MIN_RSA_KEY_BITS)
            .map_err(|e| GatewayError::Crypto(format!("Key generation failed: {}", e)))?;
        Self::from_private_key(&private_key)
    }

    fn from_private_key(private_key: &RsaPrivateKey) -> Result<Self, GatewayError> {
        let bits = private_key.size() * 8;
        if bits < MIN_RSA_KEY_BITS {
            return Err(GatewayError::Crypto(format!(
                "RSA key too small: {} bits (minimum {})",
                bits, MIN_RSA_KEY_BITS
            )));
        }

        let public_key = private_key.to_public_key();
        let public_der = public_key
            .to_public_key_der()
            .map_err(|e| GatewayError::Crypto(format!("Public key encoding failed: {}", e)))?;
        let digest = Sha256::digest(public_der.as_bytes());
        let kid = hex::encode(
            digest
                .iter()
                .take(KID_DIGEST_BYTES)
                .copied()
                .collect::<Vec<u8>>(),
        );

        let private_pem = private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| GatewayError::Crypto(format!("Private key encoding failed: {}", e)))?;
        let public_pem = public_key
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| GatewayError::Crypto(format!("Public key encoding failed: {}", e)))?;

        Ok(Self {
            signing: SigningKey::from_rsa_pem(private_pem.as_bytes(), kid.clone())?,
            verification: VerificationKey::from_rsa_pem(public_pem.as_bytes())?,
            kid,
            modulus: public_key.n().to_bytes_be(),
            exponent: public_key.e().to_bytes_be(),
        })
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.signing
    }

    pub fn verification_key(&self) -> &VerificationKey {
        &self.verification
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Public key as an RSA JWK advertising `algorithm`.
    pub fn to_jwk(&self, algorithm: TokenAlgorithm) -> JsonWebKey {
        JsonWebKey {
            kid: self.kid.clone(),
            kty: "RSA".to_string(),
            use_: "sig".to_string(),
            alg: algorithm.name().to_string(),
            n: URL_SAFE_NO_PAD.encode(&self.modulus),
            e: URL_SAFE_NO_PAD.encode(&self.exponent),
        }
    }
}

impl fmt::Debug for SigningKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKeyPair")
            .field("kid", &self.kid)
            .field("signing", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

/// Load the configured key, or generate an ephemeral one.
#[instrument(skip_all)]
pub async fn load_signing_key_pair(path: Option<&Path>) -> Result<SigningKeyPair, GatewayError> {
    let Some(path) = path else {
        tracing::warn!(
            target: "sso.keys",
            "No signing key configured; generating an ephemeral key. Issued tokens will not verify after restart"
        );
        return tokio::task::spawn_blocking(SigningKeyPair::generate_ephemeral)
            .await
            .map_err(|e| {
                tracing::error!(target: "sso.keys", error = %e, "Key generation task failed");
                GatewayError::Internal
            })?;
    };

    let pem = tokio::fs::read_to_string(path)
        .await
        .map(SecretString::from)
        .map_err(|e| {
            tracing::error!(target: "sso.keys", error = %e, "Failed to read signing key file");
            GatewayError::Crypto(format!("Failed to read signing key file: {}", e))
        })?;

    let pair = SigningKeyPair::from_private_key_pem(pem.expose_secret())?;
    tracing::info!(target: "sso.keys", kid = %pair.kid(), "Signing key loaded");
    Ok(pair)
}

/// Sign and verify a probe token with `pair`.
///
/// An unregistered configured algorithm is only warned about here; issuance
/// requests will report it. The probe then uses RS256.
#[instrument(skip_all)]
pub fn self_check(pair: &SigningKeyPair, configured_algorithm: &str) -> Result<(), GatewayError> {
    let algorithm = configured_algorithm
        .parse::<TokenAlgorithm>()
        .unwrap_or_else(|_| {
            tracing::warn!(
                target: "sso.keys",
                algorithm = %configured_algorithm,
                "Configured token algorithm is not supported; token issuance will fail"
            );
            TokenAlgorithm::Rs256
        });

    let probe = Claims {
        iss: SELF_CHECK_ISSUER.to_string(),
        sub: SELF_CHECK_ISSUER.to_string(),
        aud: Vec::new(),
        exp: None,
        iat: Some(chrono::Utc::now().timestamp()),
    };
    let token = crypto::issue_token(probe, algorithm.name(), pair.signing_key())?;

    if !crypto::verify_token(&token, pair.verification_key()) {
        tracing::error!(target: "sso.keys", kid = %pair.kid(), "Signing key self-check failed");
        return Err(GatewayError::Crypto(
            "Signing key self-check failed".to_string(),
        ));
    }

    tracing::debug!(target: "sso.keys", kid = %pair.kid(), %algorithm, "Signing key self-check passed");
    Ok(())
}

/// The published key set: one key, advertised for `configured_algorithm`.
///
/// Falls back to RS256 when the configured name is not registered.
pub fn get_jwks(pair: &SigningKeyPair, configured_algorithm: &str) -> Jwks {
    let algorithm = configured_algorithm
        .parse::<TokenAlgorithm>()
        .unwrap_or(TokenAlgorithm::Rs256);
    Jwks {
        keys: vec![pair.to_jwk(algorithm)],
    }
}
