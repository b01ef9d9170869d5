//! HTTP request handlers for the SSO gateway.

pub mod health;
pub mod jwks_handler;
pub mod metrics;
pub mod proxy_handler;
pub mod websso_handler;

pub use health::health_check;
pub use jwks_handler::handle_get_jwks;
pub use metrics::metrics_handler;
pub use proxy_handler::handle_proxy;
pub use websso_handler::handle_websso;
