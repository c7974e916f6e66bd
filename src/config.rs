//! Configuration management for the rate limiter.
//!
//! The configuration record is loaded once at startup from an optional file
//! (a `.env` style `KEY=VALUE` file by default) layered under the process
//! environment, and is immutable afterwards.

use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File, FileFormat, Map, Value};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{RateLimiterError, Result};
use crate::storage::MAX_TTL;

/// Keys recognised in configuration files and the environment.
///
/// Matching is case-insensitive; `redis_addr` is accepted as an older
/// spelling of `storage_addr`.
const KNOWN_KEYS: &[&str] = &[
    "web_server_port",
    "storage_addr",
    "redis_addr",
    "default_limit_by_ip",
    "default_limit_by_token",
    "block_time_in_seconds",
    "token_limits",
    "storage_backend",
    "request_timeout_ms",
];

/// Main configuration for the rate limiter service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimiterConfig {
    /// Port the HTTP listener binds to
    #[serde(default = "default_web_server_port")]
    pub web_server_port: String,

    /// Address of the counter store
    #[serde(default = "default_storage_addr", alias = "redis_addr")]
    pub storage_addr: String,

    /// Default per-second quota for IP identifiers
    #[serde(default = "default_limit_by_ip")]
    pub default_limit_by_ip: u64,

    /// Default per-second quota for tokens absent from `token_limits`
    #[serde(default = "default_limit_by_token")]
    pub default_limit_by_token: u64,

    /// Cooldown applied after an identifier first exceeds its quota
    #[serde(default = "default_block_time")]
    pub block_time_in_seconds: u64,

    /// Per-token quotas, `"t1:n1,t2:n2"`
    #[serde(default)]
    pub token_limits: String,

    /// Which counter store to use
    #[serde(default)]
    pub storage_backend: StorageBackend,

    /// Deadline for the storage calls of a single request, 0 disables it
    #[serde(default)]
    pub request_timeout_ms: u64,
}

/// Selects the counter store implementation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Remote Redis-compatible server at `storage_addr`
    #[default]
    Redis,
    /// In-process store, only meaningful for a single instance
    Memory,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            web_server_port: default_web_server_port(),
            storage_addr: default_storage_addr(),
            default_limit_by_ip: default_limit_by_ip(),
            default_limit_by_token: default_limit_by_token(),
            block_time_in_seconds: default_block_time(),
            token_limits: String::new(),
            storage_backend: StorageBackend::default(),
            request_timeout_ms: 0,
        }
    }
}

fn default_web_server_port() -> String {
    "8080".to_string()
}

fn default_storage_addr() -> String {
    "localhost:6379".to_string()
}

fn default_limit_by_ip() -> u64 {
    10
}

fn default_limit_by_token() -> u64 {
    100
}

fn default_block_time() -> u64 {
    60
}

impl RateLimiterConfig {
    /// Load configuration from a file and the process environment.
    ///
    /// Environment variables take precedence over the file. When `required`
    /// is false a missing file is ignored.
    pub fn load(path: &Path, required: bool) -> Result<Self> {
        Self::from_sources(Some((path, required)), std::env::vars())
    }

    /// Load configuration from an optional file and an explicit set of
    /// environment variables.
    pub fn from_sources<I>(file: Option<(&Path, bool)>, env: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let file_values = match file {
            Some((path, required)) => {
                if required && !path.exists() {
                    return Err(RateLimiterError::Config(format!(
                        "configuration file {} does not exist",
                        path.display()
                    )));
                }
                let source = Config::builder().add_source(file_source(path, required)).build()?;
                normalize(source.try_deserialize::<Map<String, Value>>()?)?
            }
            None => Map::new(),
        };

        let env_values: Map<String, String> = env
            .into_iter()
            .map(|(key, value)| (key.to_lowercase(), value))
            .filter(|(key, _)| KNOWN_KEYS.contains(&key.as_str()))
            .collect();

        debug!(
            file_keys = file_values.len(),
            env_keys = env_values.len(),
            "Merging configuration sources"
        );

        let config = Config::builder()
            .add_source(Environment::default().source(Some(file_values)))
            .add_source(Environment::default().source(Some(env_values)))
            .build()?;

        let config: RateLimiterConfig = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Check the fields whose type is fixed by the listener and store.
    pub fn validate(&self) -> Result<()> {
        self.listen_port()?;
        if self.block_time_in_seconds > MAX_TTL.as_secs() {
            return Err(RateLimiterError::Config(format!(
                "block_time_in_seconds {} exceeds the maximum of {}",
                self.block_time_in_seconds,
                MAX_TTL.as_secs()
            )));
        }
        if self.storage_backend == StorageBackend::Redis && self.storage_addr.trim().is_empty() {
            return Err(RateLimiterError::Config(
                "storage_addr must not be empty for the redis backend".to_string(),
            ));
        }
        Ok(())
    }

    /// The port the HTTP listener binds to.
    pub fn listen_port(&self) -> Result<u16> {
        self.web_server_port.trim().parse().map_err(|_| {
            RateLimiterError::Config(format!(
                "web_server_port {:?} is not a valid TCP port",
                self.web_server_port
            ))
        })
    }

    /// Cooldown applied once an identifier exceeds its quota.
    pub fn block_time(&self) -> Duration {
        Duration::from_secs(self.block_time_in_seconds)
    }

    /// Deadline applied to the storage calls of one request, if any.
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_ms > 0).then(|| Duration::from_millis(self.request_timeout_ms))
    }

    /// Connection URL for the Redis backend.
    ///
    /// Bare `host:port` addresses get the `redis://` scheme.
    pub fn storage_url(&self) -> String {
        let addr = self.storage_addr.trim();
        if addr.contains("://") {
            addr.to_string()
        } else {
            format!("redis://{}", addr)
        }
    }
}

/// `.env` files and extensionless files are read as `KEY=VALUE` lines.
fn file_source(path: &Path, required: bool) -> File<config::FileSourceFile, FileFormat> {
    let format = match path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => FileFormat::Yaml,
        Some("toml") => FileFormat::Toml,
        Some("json") => FileFormat::Json,
        _ => FileFormat::Ini,
    };
    File::from(path).format(format).required(required)
}

fn normalize(values: Map<String, Value>) -> Result<Map<String, String>> {
    let mut normalized = Map::new();
    for (key, value) in values {
        let key = key.to_lowercase();
        if !KNOWN_KEYS.contains(&key.as_str()) {
            continue;
        }
        let value = value.into_string()?;
        normalized.insert(key, value);
    }
    Ok(normalized)
}
