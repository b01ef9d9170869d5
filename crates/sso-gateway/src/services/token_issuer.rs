//! Token issuance for authenticated principals.
//!
//! Builds the claim set (issuer, subject, audiences, issued-at, optional
//! expiry) and hands it to the codec. Codec errors pass through unchanged.

use crate::crypto::{self, Claims, SignedToken};
use crate::errors::GatewayError;
use crate::observability::metrics::record_token_issuance;
use crate::services::key_management_service::SigningKeyPair;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use tracing::instrument;

/// Split a comma-separated audience list.
///
/// Elements are trimmed and empty ones dropped. Order and duplicates are kept.
pub fn parse_audiences(raw: Option<&str>) -> Vec<String> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|audience| !audience.is_empty())
        .map(str::to_string)
        .collect()
}

/// Issues tokens signed with the gateway key.
#[derive(Debug, Clone)]
pub struct TokenIssuer {
    issuer: String,
    key_pair: Arc<SigningKeyPair>,
}

impl TokenIssuer {
    pub fn new(issuer: impl Into<String>, key_pair: Arc<SigningKeyPair>) -> Self {
        Self {
            issuer: issuer.into(),
            key_pair,
        }
    }

    pub fn key_pair(&self) -> &SigningKeyPair {
        &self.key_pair
    }

    /// Issue a token for `principal_name`.
    ///
    /// A `ttl` that is absent or negative yields a token without `exp`.
    pub fn issue(
        &self,
        principal_name: &str,
        audiences: &[String],
        algorithm: &str,
        ttl: Option<chrono::Duration>,
    ) -> Result<SignedToken, GatewayError> {
        self.issue_at(principal_name, audiences, algorithm, ttl, Utc::now())
    }

    /// [`issue`](Self::issue) with an explicit issuance time.
    #[instrument(skip_all, fields(alg = %algorithm, audiences = audiences.len()))]
    pub fn issue_at(
        &self,
        principal_name: &str,
        audiences: &[String],
        algorithm: &str,
        ttl: Option<chrono::Duration>,
        now: DateTime<Utc>,
    ) -> Result<SignedToken, GatewayError> {
        let start = Instant::now();

        let result = self.build_claims(principal_name, audiences, ttl, now).and_then(|claims| {
            crypto::issue_token(claims, algorithm, self.key_pair.signing_key())
        });

        let status = if result.is_ok() { "success" } else { "error" };
        record_token_issuance(algorithm, status, start.elapsed());

        if let Err(e) = &result {
            tracing::warn!(target: "sso.issuer", error = %e, "Token issuance failed");
        }

        result
    }

    fn build_claims(
        &self,
        principal_name: &str,
        audiences: &[String],
        ttl: Option<chrono::Duration>,
        now: DateTime<Utc>,
    ) -> Result<Claims, GatewayError> {
        let exp = match ttl.filter(|ttl| *ttl >= chrono::Duration::zero()) {
            Some(ttl) => Some(
                now.checked_add_signed(ttl)
                    .ok_or_else(|| {
                        tracing::error!(target: "sso.issuer", "Token expiry overflows the timestamp range");
                        GatewayError::Internal
                    })?
                    .timestamp(),
            ),
            None => None,
        };

        Ok(Claims {
            iss: self.issuer.clone(),
            sub: principal_name.to_string(),
            aud: audiences.to_vec(),
            exp,
            iat: Some(now.timestamp()),
        })
    }
}
