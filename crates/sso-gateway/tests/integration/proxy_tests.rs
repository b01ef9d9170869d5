//! End-to-end forwarding tests for `/gateway/:service/*path` against a
//! wiremock backend.

use gateway_test_utils::{test_config, TestGatewayServer, TEST_PRINCIPAL_HEADER};
use reqwest::StatusCode;
use sso_gateway::errors::FORWARDING_FAILURE_MESSAGE;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use wiremock::matchers::{body_bytes, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn gateway_for(
    backend: &MockServer,
    overrides: &[(&str, &str)],
) -> Result<TestGatewayServer, anyhow::Error> {
    let backends = format!("webhdfs={}/webhdfs", backend.uri());
    let mut vars = vec![("GATEWAY_BACKENDS", backends.as_str())];
    vars.extend_from_slice(overrides);
    TestGatewayServer::spawn(test_config(&vars)?).await
}

#[tokio::test]
async fn test_request_forwarded_with_path_query_headers_and_body() -> Result<(), anyhow::Error> {
    // Arrange
    let backend = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/webhdfs/v1/tmp/data.txt"))
        .and(query_param("op", "CREATE"))
        .and(header("x-request-tag", "integration"))
        .and(body_bytes(b"file contents".to_vec()))
        .respond_with(
            ResponseTemplate::new(201)
                .insert_header("x-backend", "webhdfs")
                .set_body_string("created"),
        )
        .expect(1)
        .mount(&backend)
        .await;
    let server = gateway_for(&backend, &[]).await?;

    // Act
    let response = reqwest::Client::new()
        .put(format!(
            "{}/gateway/webhdfs/v1/tmp/data.txt?op=CREATE",
            server.url()
        ))
        .header("x-request-tag", "integration")
        .body("file contents")
        .send()
        .await?;

    // Assert
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(
        response
            .headers()
            .get("x-backend")
            .and_then(|v| v.to_str().ok()),
        Some("webhdfs")
    );
    assert_eq!(response.text().await?, "created");
    Ok(())
}

#[tokio::test]
async fn test_unknown_service_returns_not_found() -> Result<(), anyhow::Error> {
    let backend = MockServer::start().await;
    let server = gateway_for(&backend, &[]).await?;

    let response = reqwest::get(format!("{}/gateway/hive/v1/query", server.url())).await?;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body: serde_json::Value = response.json().await?;
    assert_eq!(body["error"]["code"], "UNKNOWN_SERVICE");
    Ok(())
}

#[tokio::test]
async fn test_unreachable_backend_error_is_sanitized() -> Result<(), anyhow::Error> {
    // Bind then drop to get a port nothing listens on.
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    let port = listener.local_addr()?.port();
    drop(listener);

    let backends = format!("webhdfs=http://127.0.0.1:{}/webhdfs", port);
    let server =
        TestGatewayServer::spawn(test_config(&[("GATEWAY_BACKENDS", backends.as_str())])?).await?;

    let response = reqwest::Client::new()
        .post(format!("{}/gateway/webhdfs/v1/tmp", server.url()))
        .body("payload")
        .send()
        .await?;

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let text = response.text().await?;
    assert!(text.contains(FORWARDING_FAILURE_MESSAGE));
    assert!(!text.contains("127.0.0.1"), "Backend address leaked: {}", text);
    assert!(!text.contains(&port.to_string()), "Backend port leaked: {}", text);
    Ok(())
}

// ============================================================================
// Secured cluster handshake retry
// ============================================================================

/// First attempt is rejected with 401, later attempts succeed.
async fn mount_handshake_backend(backend: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/webhdfs/v1/tmp"))
        .respond_with(ResponseTemplate::new(401).insert_header("www-authenticate", "Negotiate"))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(backend)
        .await;
    Mock::given(method("POST"))
        .and(path("/webhdfs/v1/tmp"))
        .respond_with(ResponseTemplate::new(200).set_body_string("accepted"))
        .with_priority(2)
        .mount(backend)
        .await;
}

async fn post_tmp(
    server: &TestGatewayServer,
    query: &str,
    body: &str,
) -> Result<reqwest::Response, anyhow::Error> {
    Ok(reqwest::Client::new()
        .post(format!("{}/gateway/webhdfs/v1/tmp{}", server.url(), query))
        .body(body.to_string())
        .send()
        .await?)
}

#[tokio::test]
async fn test_secured_cluster_replays_body_after_handshake_rejection() -> Result<(), anyhow::Error> {
    let backend = MockServer::start().await;
    mount_handshake_backend(&backend).await;
    let server = gateway_for(&backend, &[("GATEWAY_CLUSTER_SECURED", "true")]).await?;

    let response = post_tmp(&server, "", "small body").await?;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await?, "accepted");

    let received = backend.received_requests().await.unwrap_or_default();
    let bodies: Vec<&[u8]> = received.iter().map(|r| r.body.as_slice()).collect();
    assert_eq!(bodies, [b"small body".as_slice(), b"small body".as_slice()]);
    Ok(())
}

#[tokio::test]
async fn test_delegation_credential_streams_without_retry() -> Result<(), anyhow::Error> {
    let backend = MockServer::start().await;
    mount_handshake_backend(&backend).await;
    let server = gateway_for(&backend, &[("GATEWAY_CLUSTER_SECURED", "true")]).await?;

    let response = post_tmp(&server, "?delegation=token-123", "small body").await?;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(backend.received_requests().await.unwrap_or_default().len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_unsecured_cluster_does_not_retry() -> Result<(), anyhow::Error> {
    let backend = MockServer::start().await;
    mount_handshake_backend(&backend).await;
    let server = gateway_for(&backend, &[]).await?;

    let response = post_tmp(&server, "", "small body").await?;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(backend.received_requests().await.unwrap_or_default().len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_body_over_replay_limit_is_not_retried() -> Result<(), anyhow::Error> {
    let backend = MockServer::start().await;
    mount_handshake_backend(&backend).await;
    let server = gateway_for(
        &backend,
        &[
            ("GATEWAY_CLUSTER_SECURED", "true"),
            ("GATEWAY_REQUEST_BUFFER_BYTES", "16"),
        ],
    )
    .await?;

    let response = post_tmp(&server, "", &"x".repeat(1024)).await?;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: serde_json::Value = response.json().await?;
    assert_eq!(body["error"]["code"], "NOT_REPLAYABLE");
    assert_eq!(backend.received_requests().await.unwrap_or_default().len(), 1);
    Ok(())
}

// ============================================================================
// Path handling
// ============================================================================

/// Send a GET with `target` written verbatim on the request line. HTTP
/// clients normalize dot segments before sending, which would hide them.
async fn raw_get(addr: SocketAddr, target: &str) -> Result<String, anyhow::Error> {
    let mut stream = TcpStream::connect(addr).await?;
    let request = format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
        target, addr
    );
    stream.write_all(request.as_bytes()).await?;
    let mut response = String::new();
    stream.read_to_string(&mut response).await?;
    Ok(response)
}

#[tokio::test]
async fn test_encoded_dot_segments_cannot_escape_service_path() -> Result<(), anyhow::Error> {
    let backend = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("secret"))
        .mount(&backend)
        .await;
    let server = gateway_for(&backend, &[]).await?;

    for target in [
        "/gateway/webhdfs/%2e%2e/admin/secret",
        "/gateway/webhdfs/v1/%2E%2E/%2e%2e/admin/secret",
        "/gateway/webhdfs/../admin/secret",
        "/gateway/webhdfs/v1/..%2fadmin",
    ] {
        let response = raw_get(server.addr(), target).await?;
        assert!(
            response.starts_with("HTTP/1.1 400"),
            "'{}' was not rejected: {}",
            target,
            response.lines().next().unwrap_or_default()
        );
    }

    assert!(backend.received_requests().await.unwrap_or_default().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_percent_encoding_forwarded_without_double_decoding() -> Result<(), anyhow::Error> {
    let backend = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/webhdfs/v1/a%2541"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&backend)
        .await;
    let server = gateway_for(&backend, &[]).await?;

    let response = raw_get(server.addr(), "/gateway/webhdfs/v1/a%2541").await?;

    assert!(response.starts_with("HTTP/1.1 200"), "{}", response);
    let received = backend.received_requests().await.unwrap_or_default();
    let paths: Vec<&str> = received.iter().map(|r| r.url.path()).collect();
    assert_eq!(paths, ["/webhdfs/v1/a%2541"]);
    Ok(())
}

// ============================================================================
// Header handling
// ============================================================================

#[tokio::test]
async fn test_principal_header_never_forwarded() -> Result<(), anyhow::Error> {
    let backend = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/webhdfs/v1/status"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&backend)
        .await;
    let server = gateway_for(&backend, &[]).await?;

    let response = reqwest::Client::new()
        .get(format!("{}/gateway/webhdfs/v1/status", server.url()))
        .header(TEST_PRINCIPAL_HEADER, "admin")
        .header("x-request-tag", "kept")
        .send()
        .await?;

    assert_eq!(response.status(), StatusCode::OK);
    let received = backend.received_requests().await.unwrap_or_default();
    let forwarded = received.first().map(|r| &r.headers);
    assert!(forwarded.is_some_and(|h| !h.contains_key(TEST_PRINCIPAL_HEADER)));
    assert!(forwarded.is_some_and(|h| h.contains_key("x-request-tag")));
    Ok(())
}

// ============================================================================
// Timeouts
// ============================================================================

#[tokio::test]
async fn test_slow_backend_within_forward_timeout_succeeds() -> Result<(), anyhow::Error> {
    let backend = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/webhdfs/v1/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("done")
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&backend)
        .await;
    let server = gateway_for(&backend, &[("GATEWAY_FORWARD_TIMEOUT_SECONDS", "10")]).await?;

    let response = reqwest::get(format!("{}/gateway/webhdfs/v1/slow", server.url())).await?;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await?, "done");
    Ok(())
}

#[tokio::test]
async fn test_backend_past_forward_timeout_is_sanitized_bad_gateway() -> Result<(), anyhow::Error> {
    let backend = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/webhdfs/v1/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .mount(&backend)
        .await;
    let server = gateway_for(&backend, &[("GATEWAY_FORWARD_TIMEOUT_SECONDS", "1")]).await?;

    let response = reqwest::get(format!("{}/gateway/webhdfs/v1/slow", server.url())).await?;

    // The outbound timeout fires, not the router timeout (408)
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body: serde_json::Value = response.json().await?;
    assert_eq!(body["error"]["code"], "SERVICE_CONNECTIVITY_ERROR");
    Ok(())
}
