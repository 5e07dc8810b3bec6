//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.
//!
//! Each configured domain maps to one bucket and the token used to read it.
//! [`DomainResolver`] is the seam through which builders and executors look
//! those up; [`Config`] is the usual implementation.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub domains: BTreeMap<String, DomainConfig>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Time-series store connection settings
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_org")]
    pub org: String,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    8086
}

fn default_org() -> String {
    "tendril".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            org: default_org(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl StoreConfig {
    /// Base URL of the store's HTTP API
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Per-domain bucket settings
#[derive(Clone, Default, Deserialize)]
pub struct DomainConfig {
    /// Bucket name; defaults to the domain name
    pub bucket: Option<String>,

    #[serde(default)]
    pub token: String,
}

impl std::fmt::Debug for DomainConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DomainConfig")
            .field("bucket", &self.bucket)
            .field("token", &if self.token.is_empty() { "" } else { "****" })
            .finish()
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Connection parameters for one domain
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    pub url: String,
    pub token: String,
    pub org: String,
}

impl std::fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionParams")
            .field("url", &self.url)
            .field("token", &"****")
            .field("org", &self.org)
            .finish()
    }
}

/// Resolves a domain to its bucket and connection parameters
///
/// Values are substituted verbatim into generated programs; no escaping is
/// applied.
pub trait DomainResolver: Send + Sync {
    /// Bucket holding the domain's data
    fn bucket(&self, domain: &str) -> Option<String>;

    /// Connection parameters, if the resolver knows how to reach the store
    fn connection(&self, domain: &str) -> Option<ConnectionParams>;
}

impl DomainResolver for Config {
    fn bucket(&self, domain: &str) -> Option<String> {
        self.domains
            .get(domain)
            .map(|d| d.bucket.clone().unwrap_or_else(|| domain.to_string()))
    }

    fn connection(&self, domain: &str) -> Option<ConnectionParams> {
        self.domains.get(domain).map(|d| ConnectionParams {
            url: self.store.url(),
            token: d.token.clone(),
            org: self.store.org.clone(),
        })
    }
}

/// Plain domain to bucket mapping, without connection details
impl DomainResolver for BTreeMap<String, String> {
    fn bucket(&self, domain: &str) -> Option<String> {
        self.get(domain).cloned()
    }

    fn connection(&self, _domain: &str) -> Option<ConnectionParams> {
        None
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();

        // FLUXPLAN_DOMAINS lists the domains to make available
        if let Ok(domains) = std::env::var("FLUXPLAN_DOMAINS") {
            for domain in domains.split(',').map(str::trim).filter(|d| !d.is_empty()) {
                config.domains.entry(domain.to_string()).or_default();
            }
        }

        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("fluxplan").join("config.toml")),
            Some(PathBuf::from("/etc/fluxplan/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path_opt in config_paths.iter().flatten() {
            if path_opt.exists() {
                match Self::load_with_env(path_opt) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path_opt);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path_opt, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        // Store overrides
        if let Ok(host) = std::env::var("FLUXPLAN_STORE_HOST") {
            self.store.host = host;
        }
        if let Ok(port) = std::env::var("FLUXPLAN_STORE_PORT") {
            if let Ok(p) = port.parse() {
                self.store.port = p;
            }
        }
        if let Ok(org) = std::env::var("FLUXPLAN_STORE_ORG") {
            self.store.org = org;
        }

        // Per-domain overrides
        for (name, domain) in self.domains.iter_mut() {
            let prefix = format!("FLUXPLAN_{}", env_key(name));
            if let Ok(bucket) = std::env::var(format!("{}_BUCKET", prefix)) {
                domain.bucket = Some(bucket);
            }
            if let Ok(token) = std::env::var(format!("{}_TOKEN", prefix)) {
                domain.token = token;
            }
        }

        // Logging overrides
        if let Ok(level) = std::env::var("FLUXPLAN_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("FLUXPLAN_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

/// Upper-cased domain name with non-alphanumerics replaced, for env keys
fn env_key(domain: &str) -> String {
    domain
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# fluxplan Configuration
#
# Environment variables override these settings:
# - FLUXPLAN_STORE_HOST
# - FLUXPLAN_STORE_PORT
# - FLUXPLAN_STORE_ORG
# - FLUXPLAN_<DOMAIN>_BUCKET
# - FLUXPLAN_<DOMAIN>_TOKEN
# - FLUXPLAN_LOG_LEVEL
# - FLUXPLAN_LOG_FORMAT

[store]
# InfluxDB server host
host = "localhost"

# InfluxDB server port
port = 8086

# Organization used for every connection
org = "tendril"

# Request timeout in seconds
request_timeout_secs = 30

# One table per domain. The bucket defaults to the domain name.
[domains.monitors]
bucket = "monitors"
token = ""

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}
