//! Storefront configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `KIRANA_API_BASE_URL` - Base URL of the commerce backend
//! - `KIRANA_GATEWAY_KEY_ID` - Payment gateway public key (safe to expose to
//!   the payment widget)
//!
//! ## Optional
//! - `KIRANA_GATEWAY_SECRET` - Gateway secret for server-side embedders
//!   (validated for placeholder patterns and entropy)
//! - `KIRANA_HTTP_TIMEOUT_SECS` - Transport-level request timeout (default: 30)
//! - `KIRANA_PAYMENT_TIMEOUT_SECS` - Bound on the hosted payment collection
//!   wait (default: 45)

use std::collections::HashMap;
use std::time::Duration;

use secrecy::SecretString;
use thiserror::Error;
use url::Url;

const MIN_ENTROPY_BITS_PER_CHAR: f64 = 3.3;

const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
const DEFAULT_PAYMENT_TIMEOUT_SECS: u64 = 45;

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "example",
    "secret",
    "password",
    "xxx",
    "todo",
    "fixme",
    "insert",
    "enter-",
    "put-your",
    "add-your",
];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
}

/// Storefront client configuration.
///
/// Implements `Debug` manually to redact secret fields.
#[derive(Clone)]
pub struct StorefrontConfig {
    /// Base URL of the commerce backend.
    pub api_base_url: Url,
    /// Payment gateway public key handed to the hosted widget.
    pub gateway_key_id: String,
    /// Gateway secret for server-side embedders; not required by the client
    /// flows themselves.
    pub gateway_secret: Option<SecretString>,
    /// Transport-level request timeout.
    pub http_timeout: Duration,
    /// Bound on the hosted payment collection wait.
    pub payment_timeout: Duration,
}

impl std::fmt::Debug for StorefrontConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorefrontConfig")
            .field("api_base_url", &self.api_base_url.as_str())
            .field("gateway_key_id", &self.gateway_key_id)
            .field(
                "gateway_secret",
                &self.gateway_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("http_timeout", &self.http_timeout)
            .field("payment_timeout", &self.payment_timeout)
            .finish()
    }
}

impl StorefrontConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing, invalid, or
    /// if the gateway secret fails validation (placeholder detection,
    /// entropy check).
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let api_base_url = get_required_env("KIRANA_API_BASE_URL")?
            .parse::<Url>()
            .map_err(|e| {
                ConfigError::InvalidEnvVar("KIRANA_API_BASE_URL".to_string(), e.to_string())
            })?;
        let gateway_key_id = get_required_env("KIRANA_GATEWAY_KEY_ID")?;
        let gateway_secret = get_optional_env("KIRANA_GATEWAY_SECRET")
            .map(|value| {
                validate_secret_strength(&value, "KIRANA_GATEWAY_SECRET")?;
                Ok(SecretString::from(value))
            })
            .transpose()?;
        let http_timeout = get_timeout("KIRANA_HTTP_TIMEOUT_SECS", DEFAULT_HTTP_TIMEOUT_SECS)?;
        let payment_timeout =
            get_timeout("KIRANA_PAYMENT_TIMEOUT_SECS", DEFAULT_PAYMENT_TIMEOUT_SECS)?;

        Ok(Self {
            api_base_url,
            gateway_key_id,
            gateway_secret,
            http_timeout,
            payment_timeout,
        })
    }

    /// A configuration for tests and embedders that wire their own values.
    #[must_use]
    pub fn for_base_url(api_base_url: Url, gateway_key_id: impl Into<String>) -> Self {
        Self {
            api_base_url,
            gateway_key_id: gateway_key_id.into(),
            gateway_secret: None,
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
            payment_timeout: Duration::from_secs(DEFAULT_PAYMENT_TIMEOUT_SECS),
        }
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get an optional environment variable.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Get a duration in seconds with a default.
fn get_timeout(key: &str, default_secs: u64) -> Result<Duration, ConfigError> {
    match get_optional_env(key) {
        None => Ok(Duration::from_secs(default_secs)),
        Some(value) => value
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string())),
    }
}

/// Calculate Shannon entropy in bits per character.
fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }

    let mut freq: HashMap<char, usize> = HashMap::new();
    for c in s.chars() {
        *freq.entry(c).or_insert(0) += 1;
    }

    #[allow(clippy::cast_precision_loss)] // String length will never exceed f64 precision
    let len = s.len() as f64;
    freq.values()
        .map(|&count| {
            #[allow(clippy::cast_precision_loss)] // Character count will never exceed f64 precision
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Validate that a secret is not a placeholder and has sufficient entropy.
fn validate_secret_strength(secret: &str, var_name: &str) -> Result<(), ConfigError> {
    let lower = secret.to_lowercase();

    // Check blocklist
    for pattern in PLACEHOLDER_PATTERNS {
        if lower.contains(pattern) {
            return Err(ConfigError::InsecureSecret(
                var_name.to_string(),
                format!("appears to be a placeholder (contains '{pattern}')"),
            ));
        }
    }

    // Check entropy (real secrets like API keys have high entropy)
    let entropy = shannon_entropy(secret);
    if entropy < MIN_ENTROPY_BITS_PER_CHAR {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "entropy too low ({entropy:.2} bits/char, need >= {MIN_ENTROPY_BITS_PER_CHAR:.1}). Use a randomly generated secret."
            ),
        ));
    }

    Ok(())
}
