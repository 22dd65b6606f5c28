//! Configuration types for wiretap.

mod capture;
mod listen;
mod session;

use std::path::Path;

use hyper::header::{HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};

pub use capture::CaptureConfig;
pub use listen::{AdminConfig, ListenConfig};
pub use session::{ConnectionPoolConfig, SessionConfig};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub listen: ListenConfig,
    #[serde(default)]
    pub admin: AdminConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, anyhow::Error> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.capture.body_read_chunk_size == 0 {
            anyhow::bail!("capture.body_read_chunk_size must be greater than 0");
        }

        match self.capture.base_url.split_once("://") {
            Some((scheme, rest)) if !scheme.is_empty() && !rest.is_empty() => {}
            _ => anyhow::bail!(
                "capture.base_url '{}' must be an absolute URL with a scheme, e.g. 'https://example.com/'",
                self.capture.base_url
            ),
        }

        if self.admin.enabled
            && self.admin.port == self.listen.port
            && self.listen.port != 0
            && self.admin.host == self.listen.host
        {
            anyhow::bail!(
                "admin.port ({}) must differ from listen.port",
                self.admin.port
            );
        }

        for (name, value) in &self.session.extra_headers {
            HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                anyhow::anyhow!("Invalid header name in session.extra_headers '{name}': {e}")
            })?;
            HeaderValue::from_str(value).map_err(|e| {
                anyhow::anyhow!("Invalid value for session.extra_headers '{name}': {e}")
            })?;
        }

        Ok(())
    }
}
