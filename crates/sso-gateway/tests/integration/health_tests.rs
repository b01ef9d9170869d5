//! Integration tests for operational endpoints: liveness, metrics and the
//! published verification key.

use gateway_test_utils::{test_config, TestGatewayServer, TEST_PRINCIPAL_HEADER};
use jsonwebtoken::{DecodingKey, Validation};
use reqwest::StatusCode;
use sso_gateway::models::{Jwks, TokenResponse};
use std::collections::HashSet;

#[tokio::test]
async fn test_health_endpoint_returns_ok() -> Result<(), anyhow::Error> {
    // Arrange
    let server = TestGatewayServer::spawn(test_config(&[])?).await?;

    // Act
    let response = reqwest::get(format!("{}/health", server.url())).await?;

    // Assert
    assert_eq!(response.status(), StatusCode::OK, "Health check should return 200 OK");
    assert_eq!(response.text().await?, "OK", "Health check body should be 'OK'");

    Ok(())
}

#[tokio::test]
async fn test_metrics_endpoint_renders_text() -> Result<(), anyhow::Error> {
    let server = TestGatewayServer::spawn(test_config(&[])?).await?;

    let response = reqwest::get(format!("{}/metrics", server.url())).await?;

    assert_eq!(response.status(), StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn test_jwks_publishes_signing_key() -> Result<(), anyhow::Error> {
    let server = TestGatewayServer::spawn(test_config(&[])?).await?;

    let response = reqwest::get(format!("{}/.well-known/jwks.json", server.url())).await?;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get("cache-control")
            .and_then(|v| v.to_str().ok()),
        Some("max-age=3600")
    );

    let jwks: Jwks = response.json().await?;
    assert_eq!(jwks.keys.len(), 1, "Exactly one key should be published");
    let key = jwks.keys.first().ok_or_else(|| anyhow::anyhow!("no key"))?;
    assert_eq!(key.kty, "RSA");
    assert_eq!(key.use_, "sig");
    assert_eq!(key.alg, "RS256");
    assert_eq!(key.kid, server.key_pair().kid());

    Ok(())
}

#[tokio::test]
async fn test_issued_token_verifies_against_published_key() -> Result<(), anyhow::Error> {
    let server = TestGatewayServer::spawn(test_config(&[])?).await?;
    let client = reqwest::Client::new();

    let jwks: Jwks = client
        .get(format!("{}/.well-known/jwks.json", server.url()))
        .send()
        .await?
        .json()
        .await?;
    let key = jwks.keys.first().ok_or_else(|| anyhow::anyhow!("no key"))?;

    let token: TokenResponse = client
        .get(format!("{}/api/v1/websso", server.url()))
        .header(TEST_PRINCIPAL_HEADER, "alice")
        .send()
        .await?
        .json()
        .await?;

    // A backend verifying with nothing but the JWKS entry
    let header = jsonwebtoken::decode_header(&token.access_token)?;
    assert_eq!(header.kid.as_deref(), Some(key.kid.as_str()));

    let decoding_key = DecodingKey::from_rsa_components(&key.n, &key.e)?;
    let mut validation = Validation::new(header.alg);
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims = HashSet::new();
    let decoded =
        jsonwebtoken::decode::<serde_json::Value>(&token.access_token, &decoding_key, &validation)?;

    assert_eq!(decoded.claims["sub"], "alice");
    Ok(())
}
