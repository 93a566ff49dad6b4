//! Storefront configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `VITRINE_API_URL` - Base URL of the Vitrine backend API
//!
//! ## Optional
//! - `VITRINE_ORIGIN_CEP` - Store's shipping origin postal code (default: 01310100)
//! - `VITRINE_FREE_SHIPPING_THRESHOLD` - Subtotal for free shipping (default: 120.00)
//! - `VITRINE_PAYMENT_POLL_SECS` - Payment status polling interval (default: 10)
//! - `VITRINE_HTTP_TIMEOUT_SECS` - Timeout for outbound HTTP calls (default: 30)
//! - `VITRINE_STORAGE_DIR` - Directory for the local key-value store (default: .vitrine)
//! - `VITRINE_ENVIRONMENT` - `development` or `production` (default: production)
//! - `VITRINE_ACCESS_TOKEN` / `VITRINE_REFRESH_TOKEN` - Session tokens to start with
//! - `VIACEP_BASE_URL` - `ViaCEP` endpoint (default: <https://viacep.com.br/ws>)
//! - `MERCADOPAGO_PUBLIC_KEY` - Public key for card tokenization
//! - `MELHORENVIO_CLIENT_ID` / `MELHORENVIO_REDIRECT_URI` - Carrier authorization app
//! - `MAPSCO_API_KEY` - API key for the geocode.maps.co provider
//! - `SENTRY_DSN` - Sentry error tracking DSN

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;
use thiserror::Error;
use url::Url;
use vitrine_core::{Cep, Money};

const DEFAULT_ORIGIN_CEP: &str = "01310100";
const DEFAULT_FREE_SHIPPING_THRESHOLD: &str = "120.00";
const DEFAULT_VIACEP_BASE_URL: &str = "https://viacep.com.br/ws";
const DEFAULT_MELHORENVIO_AUTHORIZE_URL: &str = "https://melhorenvio.com.br/oauth/authorize";
const DEFAULT_MERCADOPAGO_API_URL: &str = "https://api.mercadopago.com";

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

/// Deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    Development,
    #[default]
    Production,
}

impl Environment {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
        }
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" | "local" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            other => Err(format!("unknown environment '{other}'")),
        }
    }
}

/// Storefront client configuration.
#[derive(Clone)]
pub struct StorefrontConfig {
    /// Backend API base URL
    pub api_url: Url,
    /// Origin postal code for carrier quotes
    pub origin_cep: Cep,
    /// Subtotal at or above which shipping is free
    pub free_shipping_threshold: Money,
    /// Interval between payment status polls
    pub payment_poll_interval: Duration,
    /// Timeout applied to every outbound HTTP request
    pub http_timeout: Duration,
    /// Directory holding the local key-value store
    pub storage_dir: PathBuf,
    /// Deployment environment
    pub environment: Environment,
    /// `ViaCEP` base URL
    pub viacep_base_url: String,
    /// Access token to seed the session with
    pub access_token: Option<SecretString>,
    /// Refresh token to seed the session with
    pub refresh_token: Option<SecretString>,
    /// Card tokenization settings, when cards are enabled
    pub mercadopago: Option<MercadoPagoConfig>,
    /// Carrier authorization app, when configured
    pub melhorenvio: Option<MelhorEnvioConfig>,
    /// API key for the geocode.maps.co reverse geocoder
    pub mapsco_api_key: Option<SecretString>,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
}

impl std::fmt::Debug for StorefrontConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorefrontConfig")
            .field("api_url", &self.api_url.as_str())
            .field("origin_cep", &self.origin_cep)
            .field("free_shipping_threshold", &self.free_shipping_threshold)
            .field("payment_poll_interval", &self.payment_poll_interval)
            .field("http_timeout", &self.http_timeout)
            .field("storage_dir", &self.storage_dir)
            .field("environment", &self.environment)
            .field("viacep_base_url", &self.viacep_base_url)
            .field("access_token", &self.access_token.as_ref().map(|_| "[REDACTED]"))
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("mercadopago", &self.mercadopago)
            .field("melhorenvio", &self.melhorenvio)
            .field("mapsco_api_key", &self.mapsco_api_key.as_ref().map(|_| "[REDACTED]"))
            .field("sentry_dsn", &self.sentry_dsn)
            .finish()
    }
}

/// Mercado Pago card tokenization configuration.
#[derive(Debug, Clone)]
pub struct MercadoPagoConfig {
    /// Public key (safe to expose, identifies the merchant account)
    pub public_key: String,
    /// Mercado Pago API base URL
    pub api_url: String,
}

/// Melhor Envio authorization app configuration.
#[derive(Debug, Clone)]
pub struct MelhorEnvioConfig {
    pub client_id: String,
    pub redirect_uri: String,
    pub authorize_url: String,
}

impl StorefrontConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let api_url = parse_env("VITRINE_API_URL", &get_required_env("VITRINE_API_URL")?, |s| {
            Url::parse(s).map_err(|e| e.to_string())
        })?;
        let origin_cep = parse_env(
            "VITRINE_ORIGIN_CEP",
            &get_env_or_default("VITRINE_ORIGIN_CEP", DEFAULT_ORIGIN_CEP),
            |s| Cep::parse(s).map_err(|e| e.to_string()),
        )?;
        let free_shipping_threshold = parse_env(
            "VITRINE_FREE_SHIPPING_THRESHOLD",
            &get_env_or_default(
                "VITRINE_FREE_SHIPPING_THRESHOLD",
                DEFAULT_FREE_SHIPPING_THRESHOLD,
            ),
            |s| Money::parse(s).map_err(|e| e.to_string()),
        )?;
        let payment_poll_interval = get_duration_secs("VITRINE_PAYMENT_POLL_SECS", 10)?;
        let http_timeout = get_duration_secs("VITRINE_HTTP_TIMEOUT_SECS", 30)?;
        let storage_dir = PathBuf::from(get_env_or_default("VITRINE_STORAGE_DIR", ".vitrine"));
        let environment = parse_env(
            "VITRINE_ENVIRONMENT",
            &get_env_or_default("VITRINE_ENVIRONMENT", "production"),
            Environment::from_str,
        )?;

        Ok(Self {
            api_url,
            origin_cep,
            free_shipping_threshold,
            payment_poll_interval,
            http_timeout,
            storage_dir,
            environment,
            viacep_base_url: get_env_or_default("VIACEP_BASE_URL", DEFAULT_VIACEP_BASE_URL),
            access_token: get_optional_secret("VITRINE_ACCESS_TOKEN"),
            refresh_token: get_optional_secret("VITRINE_REFRESH_TOKEN"),
            mercadopago: MercadoPagoConfig::from_env(),
            melhorenvio: MelhorEnvioConfig::from_env(),
            mapsco_api_key: get_optional_secret("MAPSCO_API_KEY"),
            sentry_dsn: get_optional_env("SENTRY_DSN"),
        })
    }

    /// Configuration for talking to a backend at `api_url`, with defaults
    /// for everything else. Used by tests and tooling.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if `api_url` is not a valid URL.
    pub fn for_api(api_url: &str) -> Result<Self, ConfigError> {
        let api_url = parse_env("VITRINE_API_URL", api_url, |s| {
            Url::parse(s).map_err(|e| e.to_string())
        })?;
        let origin_cep = parse_env("VITRINE_ORIGIN_CEP", DEFAULT_ORIGIN_CEP, |s| {
            Cep::parse(s).map_err(|e| e.to_string())
        })?;
        Ok(Self {
            api_url,
            origin_cep,
            free_shipping_threshold: Money::from_cents(12_000),
            payment_poll_interval: Duration::from_secs(10),
            http_timeout: Duration::from_secs(30),
            storage_dir: PathBuf::from(".vitrine"),
            environment: Environment::Development,
            viacep_base_url: DEFAULT_VIACEP_BASE_URL.to_string(),
            access_token: None,
            refresh_token: None,
            mercadopago: None,
            melhorenvio: None,
            mapsco_api_key: None,
            sentry_dsn: None,
        })
    }

    #[must_use]
    pub fn is_development(&self) -> bool {
        self.environment == Environment::Development
    }
}

impl MercadoPagoConfig {
    fn from_env() -> Option<Self> {
        get_optional_env("MERCADOPAGO_PUBLIC_KEY").map(|public_key| Self {
            public_key,
            api_url: get_env_or_default("MERCADOPAGO_API_URL", DEFAULT_MERCADOPAGO_API_URL),
        })
    }
}

impl MelhorEnvioConfig {
    fn from_env() -> Option<Self> {
        let client_id = get_optional_env("MELHORENVIO_CLIENT_ID")?;
        let redirect_uri = get_optional_env("MELHORENVIO_REDIRECT_URI")?;
        Some(Self {
            client_id,
            redirect_uri,
            authorize_url: get_env_or_default(
                "MELHORENVIO_AUTHORIZE_URL",
                DEFAULT_MELHORENVIO_AUTHORIZE_URL,
            ),
        })
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get an optional environment variable. Empty values count as unset.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Get an optional environment variable as a secret.
fn get_optional_secret(key: &str) -> Option<SecretString> {
    get_optional_env(key).map(SecretString::from)
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    get_optional_env(key).unwrap_or_else(|| default.to_string())
}

/// Parse a value, attributing failures to `key`.
fn parse_env<T>(
    key: &str,
    value: &str,
    parse: impl FnOnce(&str) -> Result<T, String>,
) -> Result<T, ConfigError> {
    parse(value).map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e))
}

/// Get a whole number of seconds; zero is rejected.
fn get_duration_secs(key: &str, default: u64) -> Result<Duration, ConfigError> {
    let Some(raw) = get_optional_env(key) else {
        return Ok(Duration::from_secs(default));
    };
    match raw.trim().parse::<u64>() {
        Ok(0) => Err(ConfigError::InvalidEnvVar(
            key.to_string(),
            "must be greater than zero".to_string(),
        )),
        Ok(secs) => Ok(Duration::from_secs(secs)),
        Err(e) => Err(ConfigError::InvalidEnvVar(key.to_string(), e.to_string())),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_from_str() {
        assert_eq!("dev".parse::<Environment>().unwrap(), Environment::Development);
        assert_eq!(
            " Production ".parse::<Environment>().unwrap(),
            Environment::Production
        );
        assert!("staging".parse::<Environment>().is_err());
    }

    #[test]
    fn test_parse_env_attributes_key() {
        let err = parse_env("VITRINE_ORIGIN_CEP", "123", |s| {
            Cep::parse(s).map_err(|e| e.to_string())
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnvVar(ref key, _) if key == "VITRINE_ORIGIN_CEP"));
    }

    #[test]
    fn test_for_api_defaults() {
        let config = StorefrontConfig::for_api("http://localhost:8000").unwrap();
        assert_eq!(config.origin_cep.as_str(), "01310100");
        assert_eq!(config.free_shipping_threshold, Money::from_cents(12_000));
        assert_eq!(config.payment_poll_interval, Duration::from_secs(10));
        assert!(config.is_development());
    }

    #[test]
    fn test_config_debug_redacts_secrets() {
        let mut config = StorefrontConfig::for_api("http://localhost:8000").unwrap();
        config.access_token = Some(SecretString::from("eyJhbGciOiJIUzI1NiJ9.super_secret"));
        config.refresh_token = Some(SecretString::from("refresh_secret_value"));
        config.mercadopago = Some(MercadoPagoConfig {
            public_key: "APP_USR-public-key".to_string(),
            api_url: DEFAULT_MERCADOPAGO_API_URL.to_string(),
        });

        let debug_output = format!("{config:?}");

        assert!(debug_output.contains("localhost:8000"));
        assert!(debug_output.contains("APP_USR-public-key"));

        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("super_secret"));
        assert!(!debug_output.contains("refresh_secret_value"));
    }
}
