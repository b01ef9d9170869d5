//! Middleware for the SSO gateway.
//!
//! # Components
//!
//! - `principal` - Lifts the authenticated caller into request extensions
//! - `http_metrics` - HTTP request metrics middleware

pub mod http_metrics;
pub mod principal;

pub use http_metrics::http_metrics_middleware;
pub use principal::{resolve_principal, PrincipalState};
