//! Server configuration loading from file and environment variables.

use hive_authority::DiscoveryMetadata;
use hive_db::DbRuntimeSettings;
use hive_types::Grammar;
use serde::Deserialize;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use thiserror::Error;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// HTTP surface settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Transport and topic grammar.
    #[serde(default)]
    pub broker: BrokerConfig,

    /// Trusted time sources.
    #[serde(default)]
    pub clock: ClockConfig,

    /// The authority service run by this process.
    #[serde(default)]
    pub authority: AuthorityConfig,

    /// The discovery document served at `/.well-known/hive-configuration`.
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// An in-process host. Absent unless configured.
    #[serde(default)]
    pub host: Option<HostSettings>,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,

    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,
}

impl DatabaseConfig {
    pub fn runtime_settings(&self) -> DbRuntimeSettings {
        DbRuntimeSettings {
            busy_timeout_ms: self.busy_timeout_ms,
            pool_max_size: self.pool_max_size,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "hive_host=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

/// Which transport the broker runs over.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// In-process hub with the access evaluator as its hook.
    #[default]
    Memory,
    Nats,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BrokerConfig {
    #[serde(default)]
    pub transport: TransportKind,

    /// One grammar per deployment.
    #[serde(default)]
    pub grammar: Grammar,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClockConfig {
    /// SNTP servers as `host:port`. Empty means the system clock is trusted.
    #[serde(default)]
    pub sources: Vec<String>,

    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
}

#[derive(Clone, Deserialize)]
pub struct AuthorityConfig {
    #[serde(default = "default_authority_id")]
    pub id: String,

    /// Base URL of the discovery document. When unset the `[discovery]`
    /// section is used directly.
    #[serde(default)]
    pub discovery_url: Option<String>,

    /// Credential the authority presents to the broker.
    #[serde(default = "default_authority_id")]
    pub credential: String,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default)]
    pub broker_address: Option<String>,

    #[serde(default)]
    pub token_endpoint: Option<String>,
}

impl DiscoveryConfig {
    /// The served document, if both fields are configured.
    pub fn metadata(&self) -> Option<DiscoveryMetadata> {
        Some(DiscoveryMetadata {
            broker_address: self.broker_address.clone()?,
            token_endpoint: self.token_endpoint.clone()?,
        })
    }
}

#[derive(Clone, Deserialize)]
pub struct HostSettings {
    pub id: String,

    #[serde(default)]
    pub secret: String,

    #[serde(default = "default_claim_window_ms")]
    pub claim_window_ms: u64,

    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
}

impl HostSettings {
    pub fn claim_window(&self) -> Duration {
        Duration::from_millis(self.claim_window_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    3000
}

fn default_db_path() -> String {
    "hive.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    DbRuntimeSettings::default().busy_timeout_ms
}

fn default_pool_max_size() -> u32 {
    DbRuntimeSettings::default().pool_max_size
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_refresh_interval_secs() -> u64 {
    24 * 60 * 60
}

fn default_authority_id() -> String {
    "authority".to_string()
}

fn default_true() -> bool {
    true
}

fn default_claim_window_ms() -> u64 {
    5_000
}

fn default_retry_delay_secs() -> u64 {
    10
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            pool_max_size: default_pool_max_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            refresh_interval_secs: default_refresh_interval_secs(),
        }
    }
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        Self {
            id: default_authority_id(),
            discovery_url: None,
            credential: default_authority_id(),
            enabled: true,
        }
    }
}

impl fmt::Debug for AuthorityConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorityConfig")
            .field("id", &self.id)
            .field("discovery_url", &self.discovery_url)
            .field("credential", &"[REDACTED]")
            .field("enabled", &self.enabled)
            .finish()
    }
}

impl fmt::Debug for HostSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostSettings")
            .field("id", &self.id)
            .field("secret", &"[REDACTED]")
            .field("claim_window_ms", &self.claim_window_ms)
            .field("retry_delay_secs", &self.retry_delay_secs)
            .finish()
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `HIVE_HOST` overrides `server.host`
/// - `HIVE_PORT` overrides `server.port`
/// - `HIVE_DB_PATH` overrides `database.path`
/// - `HIVE_LOG_LEVEL` overrides `logging.level`
/// - `HIVE_LOG_JSON` overrides `logging.json` (set to "true" to enable)
/// - `HIVE_BROKER_URL` overrides `discovery.broker_address`
/// - `HIVE_HOST_SECRET` overrides `host.secret` when a host is configured
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => parse_config(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

/// Parses a TOML document. Missing sections take their defaults.
///
/// # Errors
///
/// Returns `ConfigError::Parse` for invalid TOML or unknown enum values.
pub fn parse_config(contents: &str) -> Result<Config, ConfigError> {
    Ok(toml::from_str(contents)?)
}

fn apply_env_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(host) = var("HIVE_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Some(port) = var("HIVE_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Some(db_path) = var("HIVE_DB_PATH") {
        config.database.path = db_path;
    }
    if let Some(level) = var("HIVE_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = var("HIVE_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
    if let Some(url) = var("HIVE_BROKER_URL") {
        config.discovery.broker_address = Some(url);
    }
    if let Some(secret) = var("HIVE_HOST_SECRET") {
        if let Some(host) = config.host.as_mut() {
            host.secret = secret;
        }
    }
}
