//! Configuration module for environment variable parsing.
//!
//! All process-wide settings are read once at startup and handed to the
//! components that need them. Nothing below the binary reads the environment.

use std::env;
use thiserror::Error;
use tracing::warn;

/// Errors raised when the loaded configuration cannot run the server.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required configuration: {0}")]
    MissingRequired(&'static str),

    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port for the web server to listen on
    pub port: u16,

    /// Shared secret used to verify `stripe-signature` headers
    pub stripe_webhook_secret: Option<String>,

    /// Allowed distance in seconds between the signed timestamp and now
    pub signature_tolerance_secs: u64,

    /// Upper bound on the buffered webhook body
    pub max_body_bytes: usize,

    // =========================================================================
    // Subscription Store
    // =========================================================================

    /// Base URL of the remote subscription store. In-memory when unset.
    pub subscription_store_url: Option<String>,

    /// Bearer token for the remote subscription store
    pub subscription_store_token: Option<String>,

    /// HTTP request timeout in milliseconds
    pub request_timeout_ms: u64,

    // =========================================================================
    // Content API
    // =========================================================================

    pub prismic_endpoint: Option<String>,

    pub prismic_access_token: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port: 8080,
            stripe_webhook_secret: None,
            signature_tolerance_secs: 300,
            max_body_bytes: 1024 * 1024,
            subscription_store_url: None,
            subscription_store_token: None,
            request_timeout_ms: 8000,
            prismic_endpoint: None,
            prismic_access_token: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let defaults = Config::default();

        Config {
            port: parse_or("PORT", defaults.port),

            stripe_webhook_secret: non_empty("STRIPE_WEBHOOK_SECRET"),

            signature_tolerance_secs: parse_or(
                "STRIPE_SIGNATURE_TOLERANCE_SECS",
                defaults.signature_tolerance_secs,
            ),

            max_body_bytes: parse_or("MAX_BODY_BYTES", defaults.max_body_bytes),

            subscription_store_url: non_empty("SUBSCRIPTION_STORE_URL"),

            subscription_store_token: non_empty("SUBSCRIPTION_STORE_TOKEN"),

            request_timeout_ms: parse_or("REQUEST_TIMEOUT_MS", defaults.request_timeout_ms),

            prismic_endpoint: non_empty("PRISMIC_ENDPOINT"),

            prismic_access_token: non_empty("PRISMIC_ACCESS_TOKEN"),
        }
    }

    /// Check that everything the webhook endpoint depends on is present.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stripe_webhook_secret.is_none() {
            return Err(ConfigError::MissingRequired("STRIPE_WEBHOOK_SECRET"));
        }

        if self.max_body_bytes == 0 {
            return Err(ConfigError::Invalid {
                name: "MAX_BODY_BYTES",
                value: "0".to_string(),
            });
        }

        if let Some(raw) = &self.subscription_store_url {
            if url::Url::parse(raw).is_err() {
                return Err(ConfigError::Invalid {
                    name: "SUBSCRIPTION_STORE_URL",
                    value: raw.clone(),
                });
            }
        }

        Ok(())
    }
}

/// Parse a variable into `T`, falling back to `default` when unset or invalid.
fn parse_or<T>(name: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    let raw = match env::var(name) {
        Ok(v) => v,
        Err(_) => return default,
    };

    match raw.trim().parse::<T>() {
        Ok(v) => v,
        Err(_) => {
            warn!(env_var = name, value = %raw, "Invalid value, using default");
            default
        }
    }
}

/// Read a variable, treating blank values as unset.
fn non_empty(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
