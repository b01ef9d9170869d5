pub mod key_management_service;
pub mod sso_service;
pub mod token_issuer;
pub mod whitelist;
