//! SSO gateway configuration.
//!
//! Configuration is loaded once from environment variables. Values are
//! validated up front so a bad setting aborts startup instead of surfacing
//! per request.

use crate::services::whitelist::WhitelistValidator;
use axum::http::HeaderName;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Default server bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8443";

/// Default SSO cookie name.
pub const DEFAULT_COOKIE_NAME: &str = "hadoop-jwt";

/// Default `iss` claim.
pub const DEFAULT_TOKEN_ISSUER: &str = "GATEWAY-SSO";

/// Default signing algorithm name.
pub const DEFAULT_TOKEN_ALGORITHM: &str = "RS256";

/// Default outbound request timeout in seconds.
pub const DEFAULT_FORWARD_TIMEOUT_SECONDS: u64 = 30;

/// SSO gateway configuration.
#[derive(Clone)]
pub struct Config {
    /// Server bind address (default: "0.0.0.0:8443").
    pub bind_address: String,

    /// Token issuance settings.
    pub sso: SsoConfig,

    /// Request forwarding settings.
    pub dispatch: DispatchConfig,

    /// `sso.redirect_whitelist`, compiled at load time.
    pub redirect_validator: WhitelistValidator,

    /// Trusted header naming the authenticated principal.
    pub principal_header: Option<HeaderName>,

    /// RSA private key PEM. `None` means an ephemeral key is generated.
    pub signing_key_file: Option<PathBuf>,

    /// Emit JSON logs instead of text.
    pub json_logs: bool,
}

/// Token issuance and cookie settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SsoConfig {
    pub cookie_name: String,
    pub cookie_secure_only: bool,
    /// `Max-Age` in seconds. `None` is a session cookie.
    pub cookie_max_age: Option<i64>,
    pub cookie_domain_suffix: Option<String>,
    /// Raw `;`-separated whitelist. `None` rejects every redirect.
    pub redirect_whitelist: Option<String>,
    /// Raw comma-separated audience list.
    pub token_audiences: Option<String>,
    /// `None` issues tokens without an expiry.
    pub token_ttl: Option<chrono::Duration>,
    pub token_algorithm: String,
    pub token_issuer: String,
    pub enable_session: bool,
}

/// Backend forwarding settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Backends require a per-connection security handshake.
    pub cluster_secured: bool,
    /// Replay buffer limit; `None` falls back to the dispatcher default.
    pub request_buffer_bytes: Option<usize>,
    /// Static topology: service name to base URL.
    pub backends: HashMap<String, Url>,
    pub forward_timeout: Duration,
}

/// Custom Debug implementation that redacts the signing key location.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("bind_address", &self.bind_address)
            .field("sso", &self.sso)
            .field("dispatch", &self.dispatch)
            .field("redirect_entries", &self.redirect_validator.len())
            .field("principal_header", &self.principal_header)
            .field(
                "signing_key_file",
                &self.signing_key_file.as_ref().map(|_| "[REDACTED]"),
            )
            .field("json_logs", &self.json_logs)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid boolean for {name}: '{value}' (expected true or false)")]
    InvalidBool { name: String, value: String },

    #[error("Invalid integer for {name}: '{value}': {reason}")]
    InvalidNumber {
        name: String,
        value: String,
        reason: String,
    },

    #[error("Invalid request buffer size: {0}")]
    InvalidBufferSize(String),

    #[error("Invalid backend entry: {0}")]
    InvalidBackend(String),

    #[error("Invalid redirect whitelist pattern: {0}")]
    InvalidWhitelist(String),

    #[error("Invalid principal header name: '{0}'")]
    InvalidPrincipalHeader(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address = vars
            .get("BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let redirect_whitelist = non_empty(vars, "SSO_REDIRECT_WHITELIST");
        // Compiled here so a bad pattern fails startup.
        let redirect_validator = WhitelistValidator::new(redirect_whitelist.as_deref())
            .map_err(|e| ConfigError::InvalidWhitelist(e.to_string()))?;

        let sso = SsoConfig {
            cookie_name: non_empty(vars, "SSO_COOKIE_NAME")
                .unwrap_or_else(|| DEFAULT_COOKIE_NAME.to_string()),
            cookie_secure_only: parse_bool(vars, "SSO_COOKIE_SECURE_ONLY", true)?,
            cookie_max_age: parse_i64(vars, "SSO_COOKIE_MAX_AGE")?.filter(|secs| *secs >= 0),
            cookie_domain_suffix: non_empty(vars, "SSO_COOKIE_DOMAIN_SUFFIX"),
            redirect_whitelist,
            token_audiences: non_empty(vars, "SSO_TOKEN_AUDIENCES"),
            token_ttl: parse_i64(vars, "SSO_TOKEN_TTL_MS")?
                .filter(|ms| *ms >= 0)
                .map(chrono::Duration::milliseconds),
            token_algorithm: non_empty(vars, "SSO_TOKEN_ALGORITHM")
                .unwrap_or_else(|| DEFAULT_TOKEN_ALGORITHM.to_string()),
            token_issuer: non_empty(vars, "SSO_TOKEN_ISSUER")
                .unwrap_or_else(|| DEFAULT_TOKEN_ISSUER.to_string()),
            enable_session: parse_bool(vars, "SSO_ENABLE_SESSION", false)?,
        };

        let request_buffer_bytes = match parse_i64(vars, "GATEWAY_REQUEST_BUFFER_BYTES")? {
            None => None,
            Some(bytes) if bytes <= 0 => {
                return Err(ConfigError::InvalidBufferSize(format!(
                    "GATEWAY_REQUEST_BUFFER_BYTES must be positive, got {}",
                    bytes
                )));
            }
            Some(bytes) => Some(usize::try_from(bytes).map_err(|e| {
                ConfigError::InvalidBufferSize(format!(
                    "GATEWAY_REQUEST_BUFFER_BYTES out of range: {}",
                    e
                ))
            })?),
        };

        let forward_timeout_secs = match parse_i64(vars, "GATEWAY_FORWARD_TIMEOUT_SECONDS")? {
            None => DEFAULT_FORWARD_TIMEOUT_SECONDS,
            Some(secs) => u64::try_from(secs)
                .ok()
                .filter(|secs| *secs > 0)
                .ok_or_else(|| ConfigError::InvalidNumber {
                    name: "GATEWAY_FORWARD_TIMEOUT_SECONDS".to_string(),
                    value: secs.to_string(),
                    reason: "must be a positive number of seconds".to_string(),
                })?,
        };

        let backends = match vars.get("GATEWAY_BACKENDS") {
            Some(raw) => parse_backends(raw)?,
            None => HashMap::new(),
        };

        let dispatch = DispatchConfig {
            cluster_secured: parse_bool(vars, "GATEWAY_CLUSTER_SECURED", false)?,
            request_buffer_bytes,
            backends,
            forward_timeout: Duration::from_secs(forward_timeout_secs),
        };

        let principal_header = non_empty(vars, "GATEWAY_PRINCIPAL_HEADER")
            .map(|name| {
                HeaderName::from_bytes(name.as_bytes())
                    .map_err(|_| ConfigError::InvalidPrincipalHeader(name.clone()))
            })
            .transpose()?;

        let json_logs = vars
            .get("LOG_FORMAT")
            .is_some_and(|format| format.eq_ignore_ascii_case("json"));

        Ok(Config {
            bind_address,
            sso,
            dispatch,
            redirect_validator,
            principal_header,
            signing_key_file: non_empty(vars, "SSO_SIGNING_KEY_FILE").map(PathBuf::from),
            json_logs,
        })
    }
}

fn non_empty(vars: &HashMap<String, String>, name: &str) -> Option<String> {
    vars.get(name)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn parse_bool(
    vars: &HashMap<String, String>,
    name: &str,
    default: bool,
) -> Result<bool, ConfigError> {
    let Some(value) = non_empty(vars, name) else {
        return Ok(default);
    };
    match value.to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(ConfigError::InvalidBool {
            name: name.to_string(),
            value,
        }),
    }
}

fn parse_i64(vars: &HashMap<String, String>, name: &str) -> Result<Option<i64>, ConfigError> {
    non_empty(vars, name)
        .map(|value| {
            value.parse::<i64>().map_err(|e| ConfigError::InvalidNumber {
                name: name.to_string(),
                value: value.clone(),
                reason: e.to_string(),
            })
        })
        .transpose()
}

/// Parse `name=url;name=url`. Empty entries are skipped.
fn parse_backends(raw: &str) -> Result<HashMap<String, Url>, ConfigError> {
    let mut backends = HashMap::new();
    for entry in raw.split(';').map(str::trim).filter(|e| !e.is_empty()) {
        let (name, url) = entry
            .split_once('=')
            .ok_or_else(|| ConfigError::InvalidBackend(format!("expected name=url, got '{}'", entry)))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(ConfigError::InvalidBackend(format!(
                "missing service name in '{}'",
                entry
            )));
        }
        let url = Url::parse(url.trim()).map_err(|e| {
            ConfigError::InvalidBackend(format!("invalid URL for service '{}': {}", name, e))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidBackend(format!(
                "service '{}' must use http or https",
                name
            )));
        }
        backends.insert(name.to_string(), url);
    }
    Ok(backends)
}
