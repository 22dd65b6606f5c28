//! Shared transport session and connection pool configuration.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    /// Maximum redirects a single task follows on its own.
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,

    /// Skip TLS certificate verification (for self-signed upstreams in test setups)
    #[serde(default)]
    pub tls_skip_verify: bool,

    /// Headers stamped onto every request the session sends.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_headers: BTreeMap<String, String>,

    #[serde(default)]
    pub connection_pool: ConnectionPoolConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_redirects: default_max_redirects(),
            tls_skip_verify: false,
            extra_headers: BTreeMap::new(),
            connection_pool: ConnectionPoolConfig::default(),
        }
    }
}

fn default_max_redirects() -> usize {
    10
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectionPoolConfig {
    #[serde(default = "default_pool_max_idle_per_host")]
    pub max_idle_per_host: usize,

    #[serde(default = "default_pool_idle_timeout")]
    pub idle_timeout_secs: u64,

    #[serde(default = "default_keepalive_timeout")]
    pub keepalive_timeout_secs: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl Default for ConnectionPoolConfig {
    fn default() -> Self {
        Self {
            max_idle_per_host: default_pool_max_idle_per_host(),
            idle_timeout_secs: default_pool_idle_timeout(),
            keepalive_timeout_secs: default_keepalive_timeout(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

fn default_pool_max_idle_per_host() -> usize {
    100
}

fn default_pool_idle_timeout() -> u64 {
    90
}

fn default_keepalive_timeout() -> u64 {
    60
}

fn default_connect_timeout() -> u64 {
    5
}
