//! Issuance service tests against the public library API, wired the way the
//! binary wires it: configuration in, services built from it.

use gateway_test_utils::{test_config, test_rsa_key_pair, RecordingCookieSink, TokenAssertions};
use sso_gateway::crypto::{self, VerificationKey};
use sso_gateway::errors::GatewayError;
use sso_gateway::models::Principal;
use sso_gateway::services::key_management_service::SigningKeyPair;
use sso_gateway::services::sso_service::{SsoIssuanceService, SsoOutcome, SsoSettings};
use sso_gateway::services::token_issuer::TokenIssuer;
use std::sync::Arc;

fn service(overrides: &[(&str, &str)]) -> Result<SsoIssuanceService, anyhow::Error> {
    let config = test_config(overrides)?;
    let key_pair = Arc::new(SigningKeyPair::from_private_key_pem(
        test_rsa_key_pair(1)?.private_pem,
    )?);
    Ok(SsoIssuanceService::new(
        TokenIssuer::new(config.sso.token_issuer.clone(), key_pair),
        config.redirect_validator.clone(),
        SsoSettings::from(&config.sso),
    ))
}

#[test]
fn test_token_verifies_only_with_matching_key() -> Result<(), anyhow::Error> {
    let service = service(&[])?;
    let mut sink = RecordingCookieSink::new();

    let outcome = service.handle(Some(&Principal::new("alice")), None, &mut sink)?;
    let compact = outcome.token().compact();

    let matching = VerificationKey::from_rsa_pem(test_rsa_key_pair(1)?.public_pem.as_bytes())?;
    let unrelated = VerificationKey::from_rsa_pem(test_rsa_key_pair(2)?.public_pem.as_bytes())?;

    assert!(crypto::verify_compact(&compact, &matching)?);
    assert!(!crypto::verify_compact(&compact, &unrelated)?);
    assert_eq!(sink.single().value, compact);
    Ok(())
}

#[test]
fn test_configured_cookie_settings_flow_into_cookie() -> Result<(), anyhow::Error> {
    let service = service(&[
        ("SSO_REDIRECT_WHITELIST", r"https://.*\.example\.com/.*"),
        ("SSO_COOKIE_NAME", "gateway-sso"),
        ("SSO_COOKIE_SECURE_ONLY", "false"),
        ("SSO_COOKIE_MAX_AGE", "900"),
        ("SSO_COOKIE_DOMAIN_SUFFIX", ".corp.example.com"),
    ])?;
    let mut sink = RecordingCookieSink::new();

    let outcome = service.handle(
        Some(&Principal::new("alice")),
        Some("https://ui.corp.example.com/app"),
        &mut sink,
    )?;

    let SsoOutcome::Redirect { location, token } = outcome else {
        anyhow::bail!("expected a redirect");
    };
    assert_eq!(location, "https://ui.corp.example.com/app");

    let cookie = sink.single();
    assert_eq!(cookie.name, "gateway-sso");
    assert_eq!(cookie.value, token.compact());
    assert_eq!(cookie.domain.as_deref(), Some(".corp.example.com"));
    assert!(!cookie.secure);
    assert_eq!(cookie.max_age, Some(900));
    Ok(())
}

#[test]
fn test_rejections_leave_sink_untouched() -> Result<(), anyhow::Error> {
    let service = service(&[("SSO_REDIRECT_WHITELIST", r"https://app\.example\.com/")])?;

    let mut sink = RecordingCookieSink::new();
    let result = service.handle(None, Some("https://app.example.com/"), &mut sink);
    assert!(matches!(result, Err(GatewayError::Unauthenticated)));
    assert!(sink.is_empty());

    let result = service.handle(
        Some(&Principal::new("alice")),
        Some("https://evil.example.org/"),
        &mut sink,
    );
    assert!(matches!(result, Err(GatewayError::RedirectNotAllowed)));
    assert!(sink.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_concurrent_issuance_is_isolated_per_request() -> Result<(), anyhow::Error> {
    let service = Arc::new(service(&[("SSO_TOKEN_AUDIENCES", "webhdfs")])?);

    let tasks: Vec<_> = (0..16)
        .map(|i| {
            let service = Arc::clone(&service);
            tokio::spawn(async move {
                let name = format!("user-{}", i);
                let mut sink = RecordingCookieSink::new();
                let result = service.handle(Some(&Principal::new(name.clone())), None, &mut sink);
                (name, result.map(|_| sink))
            })
        })
        .collect();

    for task in tasks {
        let (name, sink) = task.await?;
        let sink = sink?;
        sink.single()
            .value
            .as_str()
            .assert_valid_jwt()
            .assert_for_subject(&name)
            .assert_has_audience("webhdfs");
    }
    Ok(())
}
