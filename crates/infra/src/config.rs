//! Configuration loading and representation.
//!
//! Everything comes from the process environment and is validated once at
//! startup; a missing or malformed value stops the process before it touches
//! the bus.

use std::time::Duration;

use reqwest::Url;

const DEFAULT_CLIENT_ID: &str = "larder-erp-sync";
const DEFAULT_GROUP_ID: &str = "larder-erp-sync-group";
const DEFAULT_CATALOG_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_CONCURRENCY: usize = 3;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(var: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            var,
            reason: reason.into(),
        }
    }
}

/// Deployment mode. Production talks TLS to the bus and logs less.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnv {
    Development,
    Production,
    Test,
}

impl AppEnv {
    fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            "test" => Ok(Self::Test),
            other => Err(ConfigError::invalid(
                "APP_ENV",
                format!("{other:?} is not one of development, production, test"),
            )),
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    /// Log filter used when `RUST_LOG` is not set.
    pub fn default_log_directive(&self) -> &'static str {
        if self.is_production() { "info" } else { "debug" }
    }
}

/// SASL PLAIN credentials for the bus.
#[derive(Clone, PartialEq, Eq)]
pub struct SaslCredentials {
    pub username: String,
    pub password: String,
}

impl core::fmt::Debug for SaslCredentials {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SaslCredentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Message bus connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusConfig {
    /// Comma-separated broker list.
    pub brokers: String,
    pub sasl: Option<SaslCredentials>,
    pub client_id: String,
    pub group_id: String,
    pub tls: bool,
}

/// Catalog HTTP API settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogConfig {
    pub base_url: Url,
    pub token: Option<String>,
    pub request_timeout: Duration,
}

/// Complete worker configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    pub env: AppEnv,
    pub bus: BusConfig,
    pub catalog: CatalogConfig,
    /// Partitions processed concurrently.
    pub concurrency: usize,
    /// `None` disables the SKU resolution cache.
    pub sku_cache_ttl: Option<Duration>,
}

impl WorkerConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let require = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));

        let env = get("APP_ENV")
            .map(|v| AppEnv::parse(&v))
            .transpose()?
            .unwrap_or(AppEnv::Development);

        let sasl = match (get("KAFKA_USERNAME"), get("KAFKA_PASSWORD")) {
            (Some(username), Some(password)) => Some(SaslCredentials { username, password }),
            (None, None) => None,
            (Some(_), None) => return Err(ConfigError::Missing("KAFKA_PASSWORD")),
            (None, Some(_)) => return Err(ConfigError::Missing("KAFKA_USERNAME")),
        };

        let bus = BusConfig {
            brokers: require("KAFKA_BROKERS")?,
            sasl,
            client_id: get("KAFKA_CLIENT_ID").unwrap_or_else(|| DEFAULT_CLIENT_ID.to_string()),
            group_id: get("KAFKA_GROUP_ID").unwrap_or_else(|| DEFAULT_GROUP_ID.to_string()),
            tls: env.is_production(),
        };

        let base_url = parse_base_url(&require("CATALOG_API_URL")?)?;
        let timeout_ms = parse_number(get("CATALOG_TIMEOUT_MS"), "CATALOG_TIMEOUT_MS")?
            .unwrap_or(DEFAULT_CATALOG_TIMEOUT_MS);
        if timeout_ms == 0 {
            return Err(ConfigError::invalid("CATALOG_TIMEOUT_MS", "must be > 0"));
        }

        let catalog = CatalogConfig {
            base_url,
            token: get("CATALOG_API_TOKEN"),
            request_timeout: Duration::from_millis(timeout_ms),
        };

        let concurrency = parse_number(get("SYNC_CONCURRENCY"), "SYNC_CONCURRENCY")?
            .unwrap_or(DEFAULT_CONCURRENCY as u64) as usize;
        if concurrency == 0 {
            return Err(ConfigError::invalid("SYNC_CONCURRENCY", "must be >= 1"));
        }

        let sku_cache_ttl = parse_number(get("SKU_CACHE_TTL_SECS"), "SKU_CACHE_TTL_SECS")?
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        Ok(Self {
            env,
            bus,
            catalog,
            concurrency,
            sku_cache_ttl,
        })
    }
}

fn parse_number(value: Option<String>, var: &'static str) -> Result<Option<u64>, ConfigError> {
    value
        .map(|v| {
            v.trim()
                .parse::<u64>()
                .map_err(|e| ConfigError::invalid(var, format!("{v:?}: {e}")))
        })
        .transpose()
}

fn parse_base_url(value: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(value)
        .map_err(|e| ConfigError::invalid("CATALOG_API_URL", format!("{value:?}: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::invalid(
            "CATALOG_API_URL",
            format!("unsupported scheme {:?}", url.scheme()),
        ));
    }
    Ok(url)
}
