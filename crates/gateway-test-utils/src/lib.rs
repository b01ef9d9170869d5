//! # Gateway Test Utilities
//!
//! Shared test utilities for the SSO gateway.
//!
//! This crate provides:
//! - Deterministic crypto fixtures (fixed RSA keys for reproducible tests)
//! - A recording cookie sink for issuance tests
//! - Server test harness (TestGatewayServer for E2E tests)
//! - Custom assertions (TokenAssertions trait)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use gateway_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() -> anyhow::Result<()> {
//!     let server = TestGatewayServer::spawn(test_config(&[])?).await?;
//!
//!     token
//!         .assert_valid_jwt()
//!         .assert_for_subject("alice")
//!         .assert_verifies_with(server.public_key_pem());
//!     Ok(())
//! }
//! ```

pub mod assertions;
pub mod cookie_sink;
pub mod crypto_fixtures;
pub mod server_harness;

// Re-export commonly used items
pub use assertions::*;
pub use cookie_sink::*;
pub use crypto_fixtures::*;
pub use server_harness::*;
