//! Capture store and interceptor settings.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CaptureConfig {
    /// Prefix joined with a query's path to form the URL it matches.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Bounded read size used when draining streamed request bodies.
    #[serde(default = "default_body_read_chunk_size")]
    pub body_read_chunk_size: usize,

    /// Timeout for admin API waits that do not pass `timeoutMs`.
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,

    /// Gunzip captured request bodies that carry the gzip magic.
    #[serde(default = "default_decompress")]
    pub decompress_request_bodies: bool,
}

impl CaptureConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            body_read_chunk_size: default_body_read_chunk_size(),
            default_timeout_ms: default_timeout_ms(),
            decompress_request_bodies: default_decompress(),
        }
    }
}

fn default_base_url() -> String {
    "https://example.com/".to_string()
}

fn default_body_read_chunk_size() -> usize {
    1024
}

fn default_timeout_ms() -> u64 {
    1000
}

fn default_decompress() -> bool {
    true
}
