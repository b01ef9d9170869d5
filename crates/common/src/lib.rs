//! Common utilities and types shared across the SSO gateway crates.

#![warn(clippy::pedantic)]

/// Module for secret types that prevent accidental logging
pub mod secret;

/// Module for JWT utilities (size limit, segment parsing, audience claims)
pub mod jwt;
