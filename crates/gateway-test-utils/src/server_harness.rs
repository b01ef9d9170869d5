//! Test server harness for E2E testing
//!
//! Provides TestGatewayServer for spawning real gateway instances in tests.

use crate::crypto_fixtures::test_rsa_key_pair;
use sso_gateway::config::Config;
use sso_gateway::dispatch::{Dispatcher, ReqwestTransport};
use sso_gateway::routes::{self, AppState};
use sso_gateway::services::key_management_service::SigningKeyPair;
use sso_gateway::services::sso_service::{SsoIssuanceService, SsoSettings};
use sso_gateway::services::token_issuer::TokenIssuer;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Header the harness configures as the trusted principal header.
pub const TEST_PRINCIPAL_HEADER: &str = "x-authenticated-user";

/// Build a gateway config for tests from `overrides`.
///
/// Binds to `127.0.0.1:0` and trusts [`TEST_PRINCIPAL_HEADER`] unless the
/// overrides say otherwise.
pub fn test_config(overrides: &[(&str, &str)]) -> Result<Config, anyhow::Error> {
    let mut vars: HashMap<String, String> = HashMap::from([
        ("BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string()),
        (
            "GATEWAY_PRINCIPAL_HEADER".to_string(),
            TEST_PRINCIPAL_HEADER.to_string(),
        ),
    ]);
    for (name, value) in overrides {
        vars.insert((*name).to_string(), (*value).to_string());
    }
    Config::from_vars(&vars).map_err(|e| anyhow::anyhow!("Invalid test config: {}", e))
}

/// Test harness for spawning the SSO gateway in E2E tests
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_websso_e2e() -> Result<()> {
///     let server = TestGatewayServer::spawn(test_config(&[])?).await?;
///     let client = reqwest::Client::new();
///
///     let response = client
///         .get(format!("{}/api/v1/websso", server.url()))
///         .header(TEST_PRINCIPAL_HEADER, "alice")
///         .send()
///         .await?;
///
///     assert_eq!(response.status(), 200);
///     Ok(())
/// }
/// ```
pub struct TestGatewayServer {
    addr: SocketAddr,
    config: Config,
    key_pair: Arc<SigningKeyPair>,
    public_key_pem: &'static str,
    _handle: JoinHandle<()>,
}

impl TestGatewayServer {
    /// Spawn a new test server instance
    ///
    /// The server will:
    /// - Bind to a random available port (127.0.0.1:0)
    /// - Sign tokens with fixture key slot 1
    /// - Start the HTTP server in the background
    pub async fn spawn(config: Config) -> Result<Self, anyhow::Error> {
        let fixture = test_rsa_key_pair(1)?;
        let key_pair = Arc::new(
            SigningKeyPair::from_private_key_pem(fixture.private_pem)
                .map_err(|e| anyhow::anyhow!("Failed to load fixture key: {}", e))?,
        );

        let whitelist = config.redirect_validator.clone();
        let sso = SsoIssuanceService::new(
            TokenIssuer::new(config.sso.token_issuer.clone(), key_pair.clone()),
            whitelist,
            SsoSettings::from(&config.sso),
        );

        let transport = ReqwestTransport::new(config.dispatch.forward_timeout)?;
        let dispatcher = Dispatcher::new(Arc::new(transport), &config.dispatch);

        let state = Arc::new(AppState {
            config: config.clone(),
            sso,
            dispatcher,
            key_pair: key_pair.clone(),
        });

        // Initialize metrics recorder for test server
        // Note: This may fail if already installed in the test process.
        // In that case, we create a new recorder without installing it globally.
        let metrics_handle = match routes::init_metrics_recorder() {
            Ok(handle) => handle,
            Err(_) => {
                use metrics_exporter_prometheus::PrometheusBuilder;
                let recorder = PrometheusBuilder::new().build_recorder();
                recorder.handle()
            }
        };

        let app = routes::build_routes(state, metrics_handle);

        let listener = tokio::net::TcpListener::bind(&config.bind_address)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let handle = tokio::spawn(async move {
            let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
            if let Err(e) = axum::serve(listener, make_service).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            config,
            key_pair,
            public_key_pem: fixture.public_pem,
            _handle: handle,
        })
    }

    /// Get the base URL of the test server
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Get the socket address
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get reference to the server configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The key the server signs with
    pub fn key_pair(&self) -> &SigningKeyPair {
        &self.key_pair
    }

    /// SPKI PEM of the signing key, for verifying issued tokens
    pub fn public_key_pem(&self) -> &'static str {
        self.public_key_pem
    }
}

impl Drop for TestGatewayServer {
    fn drop(&mut self) {
        self._handle.abort();
    }
}
