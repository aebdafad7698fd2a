//! Configuration and environment selection.
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};
use thiserror::Error;

use crate::Error;

/// Default cache prefix for authorization tickets.
pub const DEFAULT_CACHE_KEY: &str = "arca-ta";

/// Default ticket cache TTL (12 hours).
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(12 * 3600);

/// Default timeout applied to every remote call.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// ARCA environment selection for web service endpoints.
/// - Testing: the homologation environment (`*homo.afip.gov.ar`).
/// - Production: the live environment.
///
/// # Examples
/// ```rust
/// use std::str::FromStr;
/// use arca_core::config::EnvironmentType;
///
/// let env = EnvironmentType::from_str("production")?;
/// assert_eq!(env, EnvironmentType::Production);
/// # Ok::<(), arca_core::config::EnvironmentParseError>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvironmentType {
    #[default]
    Testing,
    Production,
}

/// Error returned when parsing an [`EnvironmentType`] from a string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvironmentParseError {
    #[error("invalid environment type: {input}")]
    Invalid { input: String },
}

impl FromStr for EnvironmentType {
    type Err = EnvironmentParseError;
    fn from_str(env: &str) -> Result<EnvironmentType, EnvironmentParseError> {
        match env.to_ascii_lowercase().as_str() {
            "testing" => Ok(EnvironmentType::Testing),
            "production" => Ok(EnvironmentType::Production),
            _ => Err(EnvironmentParseError::Invalid {
                input: env.to_string(),
            }),
        }
    }
}

impl EnvironmentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvironmentType::Testing => "testing",
            EnvironmentType::Production => "production",
        }
    }

    /// Resolve the environment from a loosely typed setting such as `ARCA_ENV`.
    ///
    /// Only the exact value `production` selects production; anything else,
    /// including a missing value, falls back to testing.
    pub fn from_setting(setting: Option<&str>) -> Self {
        match setting {
            Some("production") => EnvironmentType::Production,
            _ => EnvironmentType::Testing,
        }
    }
}

impl fmt::Display for EnvironmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Web services known to this crate.
///
/// Lookups that accept a service take `&str`, so services not listed here
/// can still be configured and authenticated against by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebService {
    /// Authentication and authorization service.
    Wsaa,
    /// Electronic invoicing service.
    Wsfe,
}

impl WebService {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebService::Wsaa => "wsaa",
            WebService::Wsfe => "wsfe",
        }
    }
}

impl AsRef<str> for WebService {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for WebService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the private key and certificate live, plus the optional passphrase.
#[derive(Debug, Clone)]
pub struct CredentialPaths {
    pub private_key: PathBuf,
    pub certificate: PathBuf,
    pub passphrase: Option<SecretString>,
}

impl CredentialPaths {
    pub fn new(private_key: impl Into<PathBuf>, certificate: impl Into<PathBuf>) -> Self {
        Self {
            private_key: private_key.into(),
            certificate: certificate.into(),
            passphrase: None,
        }
    }

    pub fn with_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(SecretString::new(passphrase.into()));
        self
    }
}

/// Client configuration, passed explicitly to every component that needs it.
///
/// # Examples
/// ```rust
/// use arca_core::config::{Config, CredentialPaths, EnvironmentType, WebService};
///
/// let config = Config::new(
///     EnvironmentType::Testing,
///     "20111111112",
///     CredentialPaths::new("arca.key", "arca.crt"),
/// );
/// let url = config.web_service_url(WebService::Wsfe.as_str())?;
/// assert!(url.contains("wswhomo"));
/// # Ok::<(), arca_core::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    env: EnvironmentType,
    cuit: String,
    credentials: CredentialPaths,
    cache_key: String,
    cache_ttl: Duration,
    request_timeout: Duration,
    respect_ticket_expiration: bool,
    endpoints: HashMap<(String, EnvironmentType), String>,
}

impl Config {
    pub fn new(env: EnvironmentType, cuit: impl Into<String>, credentials: CredentialPaths) -> Self {
        Self {
            env,
            cuit: cuit.into(),
            credentials,
            cache_key: DEFAULT_CACHE_KEY.to_string(),
            cache_ttl: DEFAULT_CACHE_TTL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            respect_ticket_expiration: false,
            endpoints: default_endpoints(),
        }
    }

    /// Build a configuration from `ARCA_*` environment variables.
    ///
    /// # Errors
    /// Returns [`Error::InvalidArgument`] when `ARCA_CUIT` is missing or a
    /// numeric variable cannot be parsed.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Config::from_env`] but reading from an arbitrary lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvironmentType::from_setting(lookup("ARCA_ENV").as_deref());
        let cuit = lookup("ARCA_CUIT")
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| Error::InvalidArgument("ARCA_CUIT is not set".into()))?;
        let directory = PathBuf::from(lookup("ARCA_DIRECTORY").unwrap_or_else(|| ".".into()));
        let private_key = lookup("ARCA_PRIVATE_KEY").unwrap_or_else(|| "arca.key".into());
        let certificate = lookup("ARCA_PUBLIC_CERT").unwrap_or_else(|| "arca.crt".into());

        let mut credentials = CredentialPaths::new(
            resolve_path(&directory, &private_key),
            resolve_path(&directory, &certificate),
        );
        if let Some(passphrase) = lookup("ARCA_PASSPHRASE").filter(|p| !p.is_empty()) {
            credentials = credentials.with_passphrase(passphrase);
        }

        let mut config = Config::new(env, cuit, credentials);
        if let Some(prefix) = lookup("ARCA_CACHE_KEY") {
            config = config.with_cache_key(prefix);
        }
        if let Some(ttl) = lookup("ARCA_CACHE_TTL") {
            config = config.with_cache_ttl(Duration::from_secs(parse_seconds("ARCA_CACHE_TTL", &ttl)?));
        }
        if let Some(timeout) = lookup("ARCA_REQUEST_TIMEOUT") {
            config = config.with_request_timeout(Duration::from_secs(parse_seconds(
                "ARCA_REQUEST_TIMEOUT",
                &timeout,
            )?));
        }
        for service in [WebService::Wsaa, WebService::Wsfe] {
            let key = format!("ARCA_{}_URL", service.as_str().to_ascii_uppercase());
            if let Some(url) = lookup(&key).filter(|u| !u.is_empty()) {
                config = config.with_endpoint(service.as_str(), env, url);
            }
        }
        Ok(config)
    }

    pub fn with_env(mut self, env: EnvironmentType) -> Self {
        self.env = env;
        self
    }

    pub fn with_cache_key(mut self, prefix: impl Into<String>) -> Self {
        self.cache_key = prefix.into();
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_respect_ticket_expiration(mut self, respect: bool) -> Self {
        self.respect_ticket_expiration = respect;
        self
    }

    /// Register or replace the URL of `service` in `env`.
    pub fn with_endpoint(
        mut self,
        service: impl Into<String>,
        env: EnvironmentType,
        url: impl Into<String>,
    ) -> Self {
        self.endpoints.insert((service.into(), env), url.into());
        self
    }

    pub fn env(&self) -> EnvironmentType {
        self.env
    }

    pub fn cuit(&self) -> &str {
        &self.cuit
    }

    pub fn credentials(&self) -> &CredentialPaths {
        &self.credentials
    }

    pub fn cache_key(&self) -> &str {
        &self.cache_key
    }

    pub fn cache_ttl(&self) -> Duration {
        self.cache_ttl
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn respect_ticket_expiration(&self) -> bool {
        self.respect_ticket_expiration
    }

    /// Resolve the endpoint URL of `service` for the configured environment.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] naming the service and environment
    /// when no non-empty URL is configured for the pair.
    pub fn web_service_url(&self, service: &str) -> Result<&str, Error> {
        self.endpoints
            .get(&(service.to_string(), self.env))
            .map(String::as_str)
            .filter(|url| !url.is_empty())
            .ok_or_else(|| Error::Configuration {
                service: service.to_string(),
                environment: self.env,
            })
    }
}

fn default_endpoints() -> HashMap<(String, EnvironmentType), String> {
    [
        (
            WebService::Wsaa,
            EnvironmentType::Testing,
            "https://wsaahomo.afip.gov.ar/ws/services/LoginCms",
        ),
        (
            WebService::Wsaa,
            EnvironmentType::Production,
            "https://wsaa.afip.gov.ar/ws/services/LoginCms",
        ),
        (
            WebService::Wsfe,
            EnvironmentType::Testing,
            "https://wswhomo.afip.gov.ar/wsfev1/service.asmx",
        ),
        (
            WebService::Wsfe,
            EnvironmentType::Production,
            "https://servicios1.afip.gov.ar/wsfev1/service.asmx",
        ),
    ]
    .into_iter()
    .map(|(service, env, url)| ((service.as_str().to_string(), env), url.to_string()))
    .collect()
}

fn resolve_path(directory: &Path, file: &str) -> PathBuf {
    let path = Path::new(file);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        directory.join(path)
    }
}

fn parse_seconds(key: &str, value: &str) -> Result<u64, Error> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::InvalidArgument(format!("{key} must be a number of seconds, got {value:?}")))
}
