//! Web SSO token issuance.
//!
//! One request runs a fixed sequence: resolve the principal, validate the
//! return URL against the whitelist, issue a token, attach it as a cookie,
//! then answer with a redirect or with the token itself. Any failure stops
//! the sequence before the cookie sink is touched.

use crate::config::SsoConfig;
use crate::crypto::SignedToken;
use crate::errors::GatewayError;
use crate::models::Principal;
use crate::observability::hash_for_correlation;
use crate::observability::metrics::record_redirect_rejection;
use crate::services::token_issuer::{parse_audiences, TokenIssuer};
use crate::services::whitelist::WhitelistValidator;
use std::fmt;
use tracing::instrument;
use url::{Host, Url};

/// Receives cookies produced by a successful issuance.
///
/// The HTTP layer turns them into `Set-Cookie` headers; tests record them.
pub trait CookieSink {
    fn add_cookie(&mut self, cookie: CookieArtifact);
}

impl CookieSink for Vec<CookieArtifact> {
    fn add_cookie(&mut self, cookie: CookieArtifact) {
        self.push(cookie);
    }
}

/// The SSO cookie. `value` is the token's compact form.
#[derive(Clone, PartialEq, Eq)]
pub struct CookieArtifact {
    pub name: String,
    pub value: String,
    /// `None` is a host-only cookie.
    pub domain: Option<String>,
    pub secure: bool,
    /// `None` is a session cookie.
    pub max_age: Option<i64>,
    pub path: String,
}

impl CookieArtifact {
    /// Render as a `Set-Cookie` header value. Always `HttpOnly`.
    pub fn to_header_value(&self) -> String {
        let mut header = format!("{}={}; Path={}", self.name, self.value, self.path);
        if let Some(domain) = &self.domain {
            header.push_str("; Domain=");
            header.push_str(domain);
        }
        if let Some(max_age) = self.max_age {
            header.push_str(&format!("; Max-Age={}", max_age));
        }
        if self.secure {
            header.push_str("; Secure");
        }
        header.push_str("; HttpOnly");
        header
    }
}

impl fmt::Debug for CookieArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CookieArtifact")
            .field("name", &self.name)
            .field("value", &"[REDACTED]")
            .field("domain", &self.domain)
            .field("secure", &self.secure)
            .field("max_age", &self.max_age)
            .field("path", &self.path)
            .finish()
    }
}

/// Per-process issuance settings, resolved from configuration once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SsoSettings {
    pub cookie_name: String,
    pub cookie_secure_only: bool,
    pub cookie_max_age: Option<i64>,
    pub cookie_domain_suffix: Option<String>,
    pub audiences: Vec<String>,
    pub token_ttl: Option<chrono::Duration>,
    pub token_algorithm: String,
    pub enable_session: bool,
}

impl From<&SsoConfig> for SsoSettings {
    fn from(config: &SsoConfig) -> Self {
        Self {
            cookie_name: config.cookie_name.clone(),
            cookie_secure_only: config.cookie_secure_only,
            cookie_max_age: config.cookie_max_age,
            cookie_domain_suffix: config.cookie_domain_suffix.clone(),
            audiences: parse_audiences(config.token_audiences.as_deref()),
            token_ttl: config.token_ttl,
            token_algorithm: config.token_algorithm.clone(),
            enable_session: config.enable_session,
        }
    }
}

/// Result of a successful issuance.
#[derive(Debug, Clone)]
pub enum SsoOutcome {
    /// Redirect the caller to a whitelisted return URL.
    Redirect { location: String, token: SignedToken },
    /// No return URL was supplied; hand the token back directly.
    Token { token: SignedToken },
}

impl SsoOutcome {
    pub fn token(&self) -> &SignedToken {
        match self {
            SsoOutcome::Redirect { token, .. } | SsoOutcome::Token { token } => token,
        }
    }
}

/// Issues SSO tokens for already-authenticated callers.
#[derive(Debug, Clone)]
pub struct SsoIssuanceService {
    issuer: TokenIssuer,
    whitelist: WhitelistValidator,
    settings: SsoSettings,
}

impl SsoIssuanceService {
    pub fn new(issuer: TokenIssuer, whitelist: WhitelistValidator, settings: SsoSettings) -> Self {
        Self {
            issuer,
            whitelist,
            settings,
        }
    }

    pub fn settings(&self) -> &SsoSettings {
        &self.settings
    }

    pub fn issuer(&self) -> &TokenIssuer {
        &self.issuer
    }

    /// Run one issuance.
    ///
    /// # Errors
    ///
    /// - `Unauthenticated` - no principal
    /// - `RedirectNotAllowed` - `original_url` supplied and not whitelisted
    /// - codec errors such as `UnsupportedAlgorithm`
    ///
    /// On error `sink` has not been written to.
    #[instrument(skip_all, fields(principal = tracing::field::Empty, redirect = original_url.is_some()))]
    pub fn handle(
        &self,
        principal: Option<&Principal>,
        original_url: Option<&str>,
        sink: &mut dyn CookieSink,
    ) -> Result<SsoOutcome, GatewayError> {
        let principal = principal.ok_or_else(|| {
            tracing::debug!(target: "sso.websso", "Issuance rejected: no authenticated principal");
            GatewayError::Unauthenticated
        })?;
        tracing::Span::current().record("principal", hash_for_correlation(principal.name()).as_str());

        if let Some(url) = original_url {
            if !self.whitelist.is_allowed(Some(url)) {
                record_redirect_rejection();
                tracing::warn!(
                    target: "sso.websso",
                    principal = %hash_for_correlation(principal.name()),
                    "Issuance rejected: redirect target not in whitelist"
                );
                return Err(GatewayError::RedirectNotAllowed);
            }
        }

        let token = self.issuer.issue(
            principal.name(),
            &self.settings.audiences,
            &self.settings.token_algorithm,
            self.settings.token_ttl,
        )?;

        sink.add_cookie(self.cookie_for(&token, original_url));

        if self.settings.enable_session {
            tracing::debug!(target: "sso.websso", "Session flag enabled; no server-side session is kept");
        }
        tracing::info!(
            target: "sso.websso",
            principal = %hash_for_correlation(principal.name()),
            alg = %token.algorithm(),
            "SSO token issued"
        );

        Ok(match original_url {
            Some(url) => SsoOutcome::Redirect {
                location: url.to_string(),
                token,
            },
            None => SsoOutcome::Token { token },
        })
    }

    fn cookie_for(&self, token: &SignedToken, original_url: Option<&str>) -> CookieArtifact {
        let domain = self
            .settings
            .cookie_domain_suffix
            .clone()
            .or_else(|| original_url.and_then(derive_cookie_domain));

        CookieArtifact {
            name: self.settings.cookie_name.clone(),
            value: token.compact(),
            domain,
            secure: self.settings.cookie_secure_only,
            max_age: self.settings.cookie_max_age,
            path: "/".to_string(),
        }
    }
}

/// Cookie domain for a return URL when no suffix is configured.
///
/// `host.example.com` becomes `example.com` so sibling services share the
/// cookie. IP addresses, `localhost`, two-label hosts and relative URLs get a
/// host-only cookie.
pub fn derive_cookie_domain(original_url: &str) -> Option<String> {
    let url = Url::parse(original_url).ok()?;
    let Host::Domain(host) = url.host()? else {
        return None;
    };
    if host.eq_ignore_ascii_case("localhost") {
        return None;
    }

    let labels = host.split('.').count();
    if labels < 3 {
        return None;
    }
    host.split_once('.').map(|(_, parent)| parent.to_string())
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]
mod tests {
    use super::*;
    use crate::crypto;
    use crate::services::key_management_service::SigningKeyPair;
    use gateway_test_utils::crypto_fixtures::test_rsa_key_pair;
    use std::sync::Arc;

    fn settings() -> SsoSettings {
        SsoSettings {
            cookie_name: "hadoop-jwt".to_string(),
            cookie_secure_only: true,
            cookie_max_age: None,
            cookie_domain_suffix: None,
            audiences: parse_audiences(Some("recipient1,recipient2")),
            token_ttl: None,
            token_algorithm: "RS256".to_string(),
            enable_session: false,
        }
    }

    fn service_with(settings: SsoSettings, whitelist: Option<&str>) -> SsoIssuanceService {
        let pem = test_rsa_key_pair(1).unwrap().private_pem;
        let pair = SigningKeyPair::from_private_key_pem(pem).unwrap();
        SsoIssuanceService::new(
            TokenIssuer::new("GATEWAY-SSO", Arc::new(pair)),
            WhitelistValidator::new(whitelist).unwrap(),
            settings,
        )
    }

    fn service() -> SsoIssuanceService {
        service_with(settings(), Some("^https?://.*example.com:8080/.*$;^/.*$"))
    }

    fn alice() -> Principal {
        Principal::new("alice")
    }

    #[test]
    fn test_redirect_flow_sets_cookie_and_location() {
        let service = service();
        let mut sink = Vec::new();

        let outcome = service
            .handle(Some(&alice()), Some("http://host.example.com:8080/app"), &mut sink)
            .unwrap();

        let SsoOutcome::Redirect { location, token } = outcome else {
            panic!("expected redirect");
        };
        assert_eq!(location, "http://host.example.com:8080/app");
        assert_eq!(sink.len(), 1);
        assert_eq!(sink[0].name, "hadoop-jwt");
        assert_eq!(sink[0].value, token.compact());
        assert_eq!(sink[0].path, "/");
        assert!(sink[0].secure);
        assert_eq!(sink[0].domain.as_deref(), Some("example.com"));
    }

    #[test]
    fn test_cookie_token_carries_principal_and_audiences() {
        let service = service();
        let mut sink = Vec::new();

        service
            .handle(Some(&alice()), Some("/local/resource/"), &mut sink)
            .unwrap();

        let claims = crypto::decode_claims(&sink[0].value).unwrap();
        assert_eq!(claims.sub, "alice");
        assert_eq!(claims.aud, vec!["recipient1".to_string(), "recipient2".to_string()]);
        assert!(crypto::verify_compact(
            &sink[0].value,
            service.issuer().key_pair().verification_key()
        )
        .unwrap());
    }

    #[test]
    fn test_no_return_url_returns_token_directly() {
        let service = service();
        let mut sink = Vec::new();

        let outcome = service.handle(Some(&alice()), None, &mut sink).unwrap();

        assert!(matches!(outcome, SsoOutcome::Token { .. }));
        assert_eq!(sink.len(), 1);
        assert_eq!(sink[0].domain, None);
    }

    #[test]
    fn test_missing_principal_is_unauthenticated_without_cookie() {
        let mut sink = Vec::new();

        let result = service().handle(None, Some("/local/resource/"), &mut sink);

        assert!(matches!(result, Err(GatewayError::Unauthenticated)));
        assert!(sink.is_empty());
    }

    #[test]
    fn test_disallowed_redirect_rejected_without_cookie() {
        let mut sink = Vec::new();

        let result = service().handle(
            Some(&alice()),
            Some("http://host.example.com:8081/"),
            &mut sink,
        );

        assert!(matches!(result, Err(GatewayError::RedirectNotAllowed)));
        assert!(sink.is_empty());
    }

    #[test]
    fn test_empty_return_url_is_validated_and_rejected() {
        let mut sink = Vec::new();

        let result = service().handle(Some(&alice()), Some(""), &mut sink);

        assert!(matches!(result, Err(GatewayError::RedirectNotAllowed)));
        assert!(sink.is_empty());
    }

    #[test]
    fn test_absent_whitelist_rejects_any_redirect() {
        let service = service_with(settings(), None);
        let mut sink = Vec::new();

        let result = service.handle(Some(&alice()), Some("/local/resource/"), &mut sink);

        assert!(matches!(result, Err(GatewayError::RedirectNotAllowed)));
        assert!(sink.is_empty());
    }

    #[test]
    fn test_unsupported_algorithm_leaves_no_cookie() {
        let service = service_with(
            SsoSettings {
                token_algorithm: "HS256".to_string(),
                ..settings()
            },
            Some("^/.*$"),
        );
        let mut sink = Vec::new();

        let result = service.handle(Some(&alice()), Some("/local/resource/"), &mut sink);

        assert!(matches!(result, Err(GatewayError::UnsupportedAlgorithm(_))));
        assert!(sink.is_empty());
    }

    #[test]
    fn test_configured_cookie_attributes() {
        let service = service_with(
            SsoSettings {
                cookie_name: "sso".to_string(),
                cookie_secure_only: false,
                cookie_max_age: Some(300),
                cookie_domain_suffix: Some(".corp.test".to_string()),
                ..settings()
            },
            Some("^/.*$"),
        );
        let mut sink = Vec::new();

        service
            .handle(Some(&alice()), Some("/local/resource/"), &mut sink)
            .unwrap();

        let cookie = &sink[0];
        assert_eq!(cookie.domain.as_deref(), Some(".corp.test"));
        assert_eq!(cookie.max_age, Some(300));
        let header = cookie.to_header_value();
        assert!(header.starts_with("sso="));
        assert!(header.contains("; Path=/"));
        assert!(header.contains("; Domain=.corp.test"));
        assert!(header.contains("; Max-Age=300"));
        assert!(!header.contains("Secure"));
        assert!(header.ends_with("; HttpOnly"));
    }

    #[test]
    fn test_cookie_ttl_expiry_in_token() {
        let service = service_with(
            SsoSettings {
                token_ttl: Some(chrono::Duration::milliseconds(60_000)),
                ..settings()
            },
            Some("^/.*$"),
        );
        let mut sink = Vec::new();

        let outcome = service.handle(Some(&alice()), None, &mut sink).unwrap();

        let token = outcome.token();
        let iat = token.claims().iat.unwrap();
        assert_eq!(token.expires_at(), Some(iat + 60));
    }

    #[test]
    fn test_cookie_debug_redacts_token() {
        let cookie = CookieArtifact {
            name: "hadoop-jwt".to_string(),
            value: "header.claims.signature".to_string(),
            domain: None,
            secure: true,
            max_age: None,
            path: "/".to_string(),
        };
        assert!(!format!("{:?}", cookie).contains("claims"));
    }

    #[test]
    fn test_derive_cookie_domain() {
        assert_eq!(
            derive_cookie_domain("https://host.example.com:8443/x").as_deref(),
            Some("example.com")
        );
        assert_eq!(
            derive_cookie_domain("https://a.b.example.com/").as_deref(),
            Some("b.example.com")
        );
        assert_eq!(derive_cookie_domain("https://example.com/"), None);
        assert_eq!(derive_cookie_domain("http://localhost:8443/"), None);
        assert_eq!(derive_cookie_domain("http://10.0.0.5:8443/"), None);
        assert_eq!(derive_cookie_domain("http://[::1]:8443/"), None);
        assert_eq!(derive_cookie_domain("/local/resource/"), None);
    }

    #[test]
    fn test_settings_from_config() {
        let config = crate::config::Config::from_vars(
            &[("SSO_TOKEN_AUDIENCES", " recipient1, recipient2 ")]
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
        .unwrap();

        let settings = SsoSettings::from(&config.sso);
        assert_eq!(settings.audiences, vec!["recipient1".to_string(), "recipient2".to_string()]);
        assert_eq!(settings.cookie_name, "hadoop-jwt");
    }
}
