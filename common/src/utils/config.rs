use std::{path::PathBuf, time::Duration};

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    #[serde(default = "default_broker_url")]
    pub broker_url: String,
    #[serde(default = "default_server_name")]
    pub server_name: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_retry_count")]
    pub rpc_retry_count: usize,
    #[serde(default = "default_retry_interval_secs")]
    pub rpc_retry_interval_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub rpc_timeout_secs: u64,
    #[serde(default = "default_dispatcher_concurrency")]
    pub dispatcher_concurrency: usize,
    #[serde(default = "default_poll_timeout_secs")]
    pub dispatcher_poll_timeout_secs: u64,
    #[serde(default = "default_reply_ttl_secs")]
    pub dispatcher_reply_ttl_secs: u64,
}

fn default_broker_url() -> String {
    "redis://127.0.0.1:6379/0".to_string()
}

fn default_server_name() -> String {
    "server".to_string()
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_retry_count() -> usize {
    3
}

fn default_retry_interval_secs() -> u64 {
    5
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_dispatcher_concurrency() -> usize {
    8
}

fn default_poll_timeout_secs() -> u64 {
    1
}

fn default_reply_ttl_secs() -> u64 {
    600
}

impl AppConfig {
    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(&self.data_dir)
    }

    /// Retry and timeout settings applied to every remote call.
    pub fn rpc_policy(&self) -> RpcPolicy {
        RpcPolicy {
            retry_count: self.rpc_retry_count,
            retry_interval: Duration::from_secs(self.rpc_retry_interval_secs),
            timeout: Duration::from_secs(self.rpc_timeout_secs),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            broker_url: default_broker_url(),
            server_name: default_server_name(),
            data_dir: default_data_dir(),
            rpc_retry_count: default_retry_count(),
            rpc_retry_interval_secs: default_retry_interval_secs(),
            rpc_timeout_secs: default_timeout_secs(),
            dispatcher_concurrency: default_dispatcher_concurrency(),
            dispatcher_poll_timeout_secs: default_poll_timeout_secs(),
            dispatcher_reply_ttl_secs: default_reply_ttl_secs(),
        }
    }
}

/// Per-call retry policy. A call makes at most `retry_count + 1` attempts, each
/// waiting up to `timeout` for a reply, with `retry_interval` between attempts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RpcPolicy {
    pub retry_count: usize,
    pub retry_interval: Duration,
    pub timeout: Duration,
}

impl Default for RpcPolicy {
    fn default() -> Self {
        AppConfig::default().rpc_policy()
    }
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}
