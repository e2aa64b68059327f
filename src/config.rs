use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    pub database_url: String,

    #[serde(default)]
    pub database_echo: bool,

    #[serde(default = "default_pool_size")]
    pub database_pool_size: u32,

    #[serde(default = "default_max_overflow")]
    pub database_max_overflow: u32,

    /// Seconds to wait for a free connection
    #[serde(default = "default_pool_timeout")]
    pub database_pool_timeout: u64,

    #[serde(default = "default_pre_ping")]
    pub database_pre_ping: bool,

    /// Maximum connection age in seconds
    #[serde(default = "default_pool_recycle")]
    pub database_pool_recycle: u64,

    #[serde(default = "default_overflow_idle_timeout")]
    pub database_overflow_idle_timeout: u64,

    #[serde(default = "default_rust_log")]
    pub rust_log: String,

    #[serde(default)]
    pub rust_log_format: LogFormat,
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Pool and connection options for [`crate::db::Database`].
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    /// Log every statement at INFO
    pub echo: bool,
    /// Steady-state pooled connections
    pub pool_size: u32,
    /// Transient connections allowed beyond `pool_size`
    pub max_overflow: u32,
    pub pool_timeout: Duration,
    /// Validate a connection before handing it out
    pub pre_ping: bool,
    pub pool_recycle: Duration,
    pub overflow_idle_timeout: Duration,
}

impl DatabaseConfig {
    /// Config with the same defaults as the environment loader.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            echo: false,
            pool_size: default_pool_size(),
            max_overflow: default_max_overflow(),
            pool_timeout: Duration::from_secs(default_pool_timeout()),
            pre_ping: default_pre_ping(),
            pool_recycle: Duration::from_secs(default_pool_recycle()),
            overflow_idle_timeout: Duration::from_secs(default_overflow_idle_timeout()),
        }
    }

    /// Upper bound on concurrently checked-out connections.
    pub fn max_connections(&self) -> u32 {
        self.pool_size.saturating_add(self.max_overflow)
    }
}

fn default_port() -> u16 {
    3000
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_pool_size() -> u32 {
    5
}

fn default_max_overflow() -> u32 {
    10
}

fn default_pool_timeout() -> u64 {
    30
}

fn default_pre_ping() -> bool {
    true
}

fn default_pool_recycle() -> u64 {
    3600
}

fn default_overflow_idle_timeout() -> u64 {
    60
}

fn default_rust_log() -> String {
    "info,sessionpool=debug".to_string()
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        envy::from_env::<Config>().map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
    }

    pub fn database(&self) -> DatabaseConfig {
        DatabaseConfig {
            url: self.database_url.clone(),
            echo: self.database_echo,
            pool_size: self.database_pool_size,
            max_overflow: self.database_max_overflow,
            pool_timeout: Duration::from_secs(self.database_pool_timeout),
            pre_ping: self.database_pre_ping,
            pool_recycle: Duration::from_secs(self.database_pool_recycle),
            overflow_idle_timeout: Duration::from_secs(self.database_overflow_idle_timeout),
        }
    }
}
