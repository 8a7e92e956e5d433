use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

pub const ENV_API_ENDPOINT: &str = "ALBUMSYNC_API_ENDPOINT";
pub const ENV_TIMEOUT_SECS: &str = "ALBUMSYNC_TIMEOUT_SECS";

fn default_timeout_secs() -> u64 {
    300
}

fn default_user_agent() -> String {
    format!("albumsync/{}", env!("CARGO_PKG_VERSION"))
}

/// Connection settings for the album service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL, e.g. `http://192.168.1.10:3000/api`
    pub api_endpoint: String,
    /// Whole-request timeout. Batch uploads can be large, so this is generous.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl ClientConfig {
    pub fn new(api_endpoint: impl Into<String>) -> Self {
        Self {
            api_endpoint: api_endpoint.into(),
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }

    /// Read `ALBUMSYNC_API_ENDPOINT` and the optional `ALBUMSYNC_TIMEOUT_SECS`.
    pub fn from_env() -> anyhow::Result<Self> {
        let endpoint = std::env::var(ENV_API_ENDPOINT)
            .with_context(|| format!("{} is not set", ENV_API_ENDPOINT))?;
        let mut config = Self::new(endpoint);
        if let Ok(raw) = std::env::var(ENV_TIMEOUT_SECS) {
            config.timeout_secs = raw
                .parse()
                .with_context(|| format!("{}={:?} is not a number", ENV_TIMEOUT_SECS, raw))?;
        }
        Ok(config)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Endpoint without trailing slashes.
    pub fn base_url(&self) -> &str {
        self.api_endpoint.trim_end_matches('/')
    }
}
