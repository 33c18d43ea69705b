//! Configuration loading.
//!
//! Configuration is loaded from TOML with the following resolution order:
//! 1. `--config <path>` (CLI flag)
//! 2. `~/.fredgate/config.toml` (user)
//! 3. `/etc/fredgate/config.toml` (system)
//! 4. built-in defaults
//!
//! Environment overrides are applied on top of whatever was loaded:
//!
//! | variable                          | setting                         |
//! |-----------------------------------|---------------------------------|
//! | `FRED_API_KEY`                    | `client.api_key`                |
//! | `FREDGATE_RATE_LIMIT_ENABLED`     | `rate_limit.enabled`            |
//! | `FREDGATE_RATE_LIMIT_PER_SECOND`  | `rate_limit.per_second`         |
//! | `FREDGATE_RATE_LIMIT_PER_MINUTE`  | `rate_limit.per_minute`         |
//! | `FREDGATE_CACHE_ENABLED`          | `cache.enabled`                 |
//! | `FREDGATE_CACHE_BACKEND`          | `cache.backend`                 |
//! | `FREDGATE_CACHE_DEFAULT_TTL`      | `cache.default_ttl_secs`        |
//! | `FREDGATE_CACHE_TTL_<NAMESPACE>`  | `cache.namespaces.<namespace>`  |
//!
//! A value that does not parse is a configuration error, reported at load
//! time rather than on first use.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::cache::{CacheBackendKind, CacheConfig, DEFAULT_MAX_ENTRIES, MAX_TTL};
use crate::client::{ClientConfig, DEFAULT_BASE_URL, RetryConfig};
use crate::limiter::{MAX_PENALTY, RateLimitConfig};
use crate::orchestrator::DEFAULT_MAX_WORKERS;
use crate::{FredError, Result};

const ENV_API_KEY: &str = "FRED_API_KEY";
const ENV_NAMESPACE_TTL_PREFIX: &str = "FREDGATE_CACHE_TTL_";

/// Complete configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub client: ClientSection,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub rate_limit: RateLimitSection,
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub batch: BatchSection,
}

/// Upstream connection.
#[derive(Clone, Deserialize)]
pub struct ClientSection {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Usually supplied through `FRED_API_KEY` instead.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default)]
    pub user_agent: Option<String>,
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            timeout_secs: default_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            user_agent: None,
        }
    }
}

impl std::fmt::Debug for ClientSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSection")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("timeout_secs", &self.timeout_secs)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    10
}

/// Retry policy.
#[derive(Debug, Clone, Deserialize)]
pub struct RetrySection {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    5000
}

/// Request budgets.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub per_second: Option<u32>,
    #[serde(default = "default_per_minute")]
    pub per_minute: Option<u32>,
    /// Cooldown when a 429 carries no hint.
    #[serde(default = "default_penalty_secs")]
    pub penalty_secs: f64,
}

impl Default for RateLimitSection {
    fn default() -> Self {
        Self {
            enabled: true,
            per_second: None,
            per_minute: default_per_minute(),
            penalty_secs: default_penalty_secs(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_per_minute() -> Option<u32> {
    Some(120)
}

fn default_penalty_secs() -> f64 {
    5.0
}

/// Cache backend and TTLs.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub backend: CacheBackendKind,
    /// `0` disables caching for namespaces without their own TTL.
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,
    #[serde(default = "default_max_entries")]
    pub max_entries: u64,
    #[serde(default)]
    pub directory: Option<PathBuf>,
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,
    /// Namespace → TTL seconds, layered over the built-in table. `0`
    /// disables caching for the namespace.
    #[serde(default)]
    pub namespaces: BTreeMap<String, u64>,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: CacheBackendKind::default(),
            default_ttl_secs: default_ttl_secs(),
            max_entries: default_max_entries(),
            directory: None,
            operation_timeout_ms: default_operation_timeout_ms(),
            namespaces: BTreeMap::new(),
        }
    }
}

fn default_ttl_secs() -> u64 {
    300
}

fn default_max_entries() -> u64 {
    DEFAULT_MAX_ENTRIES
}

fn default_operation_timeout_ms() -> u64 {
    250
}

/// Batch fetching.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchSection {
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
}

impl Default for BatchSection {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
        }
    }
}

fn default_max_workers() -> usize {
    DEFAULT_MAX_WORKERS
}

impl Config {
    /// Load configuration from the standard locations, then apply
    /// environment overrides from the process environment.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let mut config = match Self::resolve_config_path(explicit_path)? {
            Some(path) => Self::load_file(&path)?,
            None => {
                debug!("no config file found; using defaults");
                Self::default()
            }
        };
        config.apply_env_overrides_from(std::env::vars())?;
        config.validate()?;
        Ok(config)
    }

    /// Load a single TOML file without environment overrides.
    pub fn load_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            FredError::Configuration(format!("Failed to read config file {path:?}: {e}"))
        })?;
        let config = Self::from_toml_str(&content).map_err(|e| {
            FredError::Configuration(format!("Failed to parse config file {path:?}: {e}"))
        })?;
        debug!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    /// Parse TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| FredError::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve the config file path. `None` means "use defaults".
    fn resolve_config_path(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit {
            if path.exists() {
                return Ok(Some(path.to_path_buf()));
            }
            return Err(FredError::Configuration(format!(
                "Config file not found: {path:?}"
            )));
        }

        // User config
        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".fredgate").join("config.toml");
            if user_config.exists() {
                return Ok(Some(user_config));
            }
        }

        // System config
        let system_config = PathBuf::from("/etc/fredgate/config.toml");
        if system_config.exists() {
            return Ok(Some(system_config));
        }

        Ok(None)
    }

    /// Apply overrides from `(name, value)` pairs. Unrelated names are
    /// ignored.
    pub fn apply_env_overrides_from<I, K, V>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (name, value) in vars {
            let (name, value) = (name.as_ref(), value.as_ref().trim());
            match name {
                ENV_API_KEY => {
                    if !value.is_empty() {
                        self.client.api_key = Some(value.to_owned());
                    }
                }
                "FREDGATE_RATE_LIMIT_ENABLED" => {
                    self.rate_limit.enabled = parse_bool(name, value)?;
                }
                "FREDGATE_RATE_LIMIT_PER_SECOND" => {
                    self.rate_limit.per_second = Some(parse_number(name, value)?);
                }
                "FREDGATE_RATE_LIMIT_PER_MINUTE" => {
                    self.rate_limit.per_minute = Some(parse_number(name, value)?);
                }
                "FREDGATE_CACHE_ENABLED" => {
                    self.cache.enabled = parse_bool(name, value)?;
                }
                "FREDGATE_CACHE_BACKEND" => {
                    self.cache.backend = value.parse()?;
                }
                "FREDGATE_CACHE_DEFAULT_TTL" => {
                    self.cache.default_ttl_secs = parse_number(name, value)?;
                }
                _ => {
                    if let Some(namespace) = name.strip_prefix(ENV_NAMESPACE_TTL_PREFIX) {
                        if namespace.is_empty() {
                            continue;
                        }
                        let ttl = parse_number(name, value)?;
                        self.cache.namespaces.insert(namespace.to_lowercase(), ttl);
                    }
                }
            }
        }
        Ok(())
    }

    /// Reject values no component can work with.
    pub fn validate(&self) -> Result<()> {
        if !self.rate_limit.penalty_secs.is_finite() || self.rate_limit.penalty_secs < 0.0 {
            return Err(FredError::Configuration(format!(
                "rate_limit.penalty_secs must be a non-negative number, got {}",
                self.rate_limit.penalty_secs
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(FredError::Configuration(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        let max_ttl = MAX_TTL.as_secs();
        if self.cache.default_ttl_secs > max_ttl {
            return Err(FredError::Configuration(format!(
                "cache.default_ttl_secs must be at most {max_ttl}, got {}",
                self.cache.default_ttl_secs
            )));
        }
        let too_long = self.cache.namespaces.iter().find(|(_, secs)| **secs > max_ttl);
        if let Some((namespace, secs)) = too_long {
            return Err(FredError::Configuration(format!(
                "cache.namespaces.{namespace} must be at most {max_ttl} seconds, got {secs}"
            )));
        }
        if self.rate_limit.penalty_secs > MAX_PENALTY.as_secs_f64() {
            return Err(FredError::Configuration(format!(
                "rate_limit.penalty_secs must be at most {}, got {}",
                MAX_PENALTY.as_secs(),
                self.rate_limit.penalty_secs
            )));
        }
        if self.batch.max_workers == 0 {
            return Err(FredError::Configuration(
                "batch.max_workers must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn rate_limit_config(&self) -> RateLimitConfig {
        RateLimitConfig {
            enabled: self.rate_limit.enabled,
            per_second: self.rate_limit.per_second,
            per_minute: self.rate_limit.per_minute,
            penalty: Duration::try_from_secs_f64(self.rate_limit.penalty_secs)
                .unwrap_or(Duration::ZERO),
        }
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.retry.max_attempts,
            initial_delay: Duration::from_millis(self.retry.initial_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
        }
    }

    pub fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new()
            .base_url(self.client.base_url.clone())
            .timeout(Duration::from_secs(self.client.timeout_secs))
            .connect_timeout(Duration::from_secs(self.client.connect_timeout_secs))
            .retry(self.retry_config());
        config.api_key = self.client.api_key.clone();
        if let Some(agent) = &self.client.user_agent {
            config = config.user_agent(agent.clone());
        }
        config
    }

    /// Cache settings, with file and environment namespace TTLs layered over
    /// the built-in table.
    pub fn cache_config(&self) -> CacheConfig {
        let mut config = CacheConfig {
            enabled: self.cache.enabled,
            backend: self.cache.backend,
            default_ttl: seconds(self.cache.default_ttl_secs),
            max_entries: self.cache.max_entries,
            directory: self.cache.directory.clone(),
            operation_timeout: Duration::from_millis(self.cache.operation_timeout_ms),
            ..CacheConfig::default()
        };
        for (namespace, secs) in &self.cache.namespaces {
            config = config.namespace(namespace, seconds(*secs));
        }
        config
    }
}

fn seconds(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(FredError::Configuration(format!(
            "{name} must be a boolean, got '{value}'"
        ))),
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| {
        FredError::Configuration(format!("{name} must be a non-negative integer, got '{value}'"))
    })
}
