//! SSO Gateway Library
//!
//! Token issuance and request forwarding for a cluster access gateway. An
//! already-authenticated caller is issued a signed SSO token (as a cookie and
//! optionally a redirect to a whitelisted return URL), and client requests are
//! forwarded to backend services with bounded body replay for secured
//! clusters.
//!
//! # Modules
//!
//! - `config` - Service configuration
//! - `crypto` - Token encoding, signing and verification
//! - `dispatch` - Backend forwarding and request body replay
//! - `errors` - Error types
//! - `handlers` - HTTP request handlers
//! - `middleware` - Principal resolution and HTTP metrics
//! - `models` - Data models
//! - `observability` - Metrics and log correlation helpers
//! - `routes` - Router and shared application state
//! - `services` - Whitelist validation, token issuance, key management

pub mod config;
pub mod crypto;
pub mod dispatch;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod observability;
pub mod routes;
pub mod services;
