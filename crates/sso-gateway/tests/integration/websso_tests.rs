//! End-to-end tests for `/api/v1/websso`.
//!
//! The gateway runs in-process on a random port; the principal is supplied
//! through the trusted header the harness configures.

use gateway_test_utils::{test_config, TestGatewayServer, TokenAssertions, TEST_PRINCIPAL_HEADER};
use reqwest::{redirect::Policy, Response, StatusCode};
use sso_gateway::models::TokenResponse;

const WHITELIST: &str = r"https://app\.example\.com/.*;https://portal\.example\.com/";

fn client() -> Result<reqwest::Client, anyhow::Error> {
    Ok(reqwest::Client::builder().redirect(Policy::none()).build()?)
}

async fn websso(
    server: &TestGatewayServer,
    principal: Option<&str>,
    original_url: Option<&str>,
) -> Result<Response, anyhow::Error> {
    let mut request = client()?.get(format!("{}/api/v1/websso", server.url()));
    if let Some(url) = original_url {
        request = request.query(&[("originalUrl", url)]);
    }
    if let Some(principal) = principal {
        request = request.header(TEST_PRINCIPAL_HEADER, principal);
    }
    Ok(request.send().await?)
}

fn set_cookie(response: &Response) -> Option<String> {
    response
        .headers()
        .get("set-cookie")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

/// Token value out of `hadoop-jwt=<token>; Path=/; ...`
fn cookie_token(cookie: &str) -> Option<&str> {
    cookie
        .split(';')
        .next()
        .and_then(|pair| pair.strip_prefix("hadoop-jwt="))
}

// ============================================================================
// Redirect flow
// ============================================================================

#[tokio::test]
async fn test_whitelisted_redirect_sets_cookie_and_redirects() -> Result<(), anyhow::Error> {
    // Arrange
    let server = TestGatewayServer::spawn(test_config(&[
        ("SSO_REDIRECT_WHITELIST", WHITELIST),
        ("SSO_TOKEN_AUDIENCES", "webhdfs, hive"),
        ("SSO_TOKEN_TTL_MS", "300000"),
    ])?)
    .await?;

    // Act
    let response = websso(&server, Some("alice"), Some("https://app.example.com/dashboard")).await?;

    // Assert
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(
        response
            .headers()
            .get("location")
            .and_then(|v| v.to_str().ok()),
        Some("https://app.example.com/dashboard")
    );

    let cookie = set_cookie(&response).ok_or_else(|| anyhow::anyhow!("no Set-Cookie"))?;
    assert!(cookie.contains("; Domain=example.com"), "cookie: {}", cookie);
    assert!(cookie.contains("; Secure"));
    assert!(cookie.contains("; HttpOnly"));

    let token = cookie_token(&cookie).ok_or_else(|| anyhow::anyhow!("no token in cookie"))?;
    token
        .assert_valid_jwt()
        .assert_for_subject("alice")
        .assert_issued_by("GATEWAY-SSO")
        .assert_has_audience("webhdfs")
        .assert_has_audience("hive")
        .assert_signed_by(server.key_pair().kid())
        .assert_expires_in(300)
        .assert_verifies_with(server.public_key_pem());

    Ok(())
}

#[tokio::test]
async fn test_exact_whitelist_entry_is_fully_anchored() -> Result<(), anyhow::Error> {
    let server =
        TestGatewayServer::spawn(test_config(&[("SSO_REDIRECT_WHITELIST", WHITELIST)])?).await?;

    let exact = websso(&server, Some("alice"), Some("https://portal.example.com/")).await?;
    let longer = websso(&server, Some("alice"), Some("https://portal.example.com/admin")).await?;

    assert_eq!(exact.status(), StatusCode::FOUND);
    assert_eq!(longer.status(), StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn test_lookalike_host_is_rejected_without_cookie() -> Result<(), anyhow::Error> {
    let server =
        TestGatewayServer::spawn(test_config(&[("SSO_REDIRECT_WHITELIST", WHITELIST)])?).await?;

    let response = websso(
        &server,
        Some("alice"),
        Some("https://app.example.com.evil.org/steal"),
    )
    .await?;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(set_cookie(&response).is_none(), "Rejected redirect must not set a cookie");
    let body: serde_json::Value = response.json().await?;
    assert_eq!(body["error"]["code"], "REDIRECT_NOT_ALLOWED");
    Ok(())
}

#[tokio::test]
async fn test_missing_whitelist_rejects_every_redirect() -> Result<(), anyhow::Error> {
    let server = TestGatewayServer::spawn(test_config(&[])?).await?;

    let response = websso(&server, Some("alice"), Some("https://app.example.com/")).await?;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(set_cookie(&response).is_none());
    Ok(())
}

#[tokio::test]
async fn test_empty_original_url_is_rejected() -> Result<(), anyhow::Error> {
    let server =
        TestGatewayServer::spawn(test_config(&[("SSO_REDIRECT_WHITELIST", ".*")])?).await?;

    let response = websso(&server, Some("alice"), Some("")).await?;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(set_cookie(&response).is_none());
    Ok(())
}

// ============================================================================
// Token flow (no return URL)
// ============================================================================

#[tokio::test]
async fn test_without_original_url_returns_token_json() -> Result<(), anyhow::Error> {
    let server = TestGatewayServer::spawn(test_config(&[
        ("SSO_TOKEN_TTL_MS", "60000"),
        ("SSO_ENABLE_SESSION", "true"),
    ])?)
    .await?;

    let response = websso(&server, Some("bob"), None).await?;

    assert_eq!(response.status(), StatusCode::OK);
    let cookie = set_cookie(&response).ok_or_else(|| anyhow::anyhow!("no Set-Cookie"))?;
    // No return URL to derive a domain from: host-only cookie
    assert!(!cookie.contains("Domain="));

    let body: TokenResponse = response.json().await?;
    assert_eq!(body.token_type, "Bearer");
    assert!(body.session);
    assert!(body.expires_at.is_some());
    assert_eq!(cookie_token(&cookie), Some(body.access_token.as_str()));

    body.access_token
        .assert_valid_jwt()
        .assert_for_subject("bob")
        .assert_expires_in(60);
    Ok(())
}

#[tokio::test]
async fn test_without_ttl_token_never_expires() -> Result<(), anyhow::Error> {
    let server = TestGatewayServer::spawn(test_config(&[])?).await?;

    let response = websso(&server, Some("carol"), None).await?;

    assert_eq!(response.status(), StatusCode::OK);
    let body: TokenResponse = response.json().await?;
    assert!(body.expires_at.is_none());
    body.access_token.assert_no_expiry();
    Ok(())
}

#[tokio::test]
async fn test_configured_algorithm_is_used() -> Result<(), anyhow::Error> {
    let server =
        TestGatewayServer::spawn(test_config(&[("SSO_TOKEN_ALGORITHM", "RS512")])?).await?;

    let response = websso(&server, Some("alice"), None).await?;

    let body: TokenResponse = response.json().await?;
    let header = jsonwebtoken::decode_header(&body.access_token)?;
    assert_eq!(header.alg, jsonwebtoken::Algorithm::RS512);
    body.access_token.assert_verifies_with(server.public_key_pem());
    Ok(())
}

#[tokio::test]
async fn test_unsupported_algorithm_fails_without_cookie() -> Result<(), anyhow::Error> {
    let server =
        TestGatewayServer::spawn(test_config(&[("SSO_TOKEN_ALGORITHM", "HS256")])?).await?;

    let response = websso(&server, Some("alice"), None).await?;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(set_cookie(&response).is_none());
    let body: serde_json::Value = response.json().await?;
    assert_eq!(body["error"]["code"], "TOKEN_ISSUANCE_FAILED");
    Ok(())
}

// ============================================================================
// Authentication
// ============================================================================

#[tokio::test]
async fn test_missing_principal_is_unauthorized() -> Result<(), anyhow::Error> {
    let server =
        TestGatewayServer::spawn(test_config(&[("SSO_REDIRECT_WHITELIST", WHITELIST)])?).await?;

    let response = websso(&server, None, Some("https://app.example.com/")).await?;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(set_cookie(&response).is_none());
    let body: serde_json::Value = response.json().await?;
    assert_eq!(body["error"]["code"], "UNAUTHENTICATED");
    Ok(())
}
