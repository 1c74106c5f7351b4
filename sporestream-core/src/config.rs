use std::collections::BTreeMap;
use std::time::Duration;
use std::{fs, path::Path};

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::decoder::PayloadSchema;
use crate::error::{CoreResult, StreamError};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct EndpointCfg {
    /// Full URL of the streaming route, e.g. `https://host/api/ai/stream`.
    pub url: String,
    /// Name of the environment variable that holds a bearer token, if any.
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Extra headers sent with every request.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl EndpointCfg {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key_env: None,
            headers: BTreeMap::new(),
        }
    }

    /// Resolve the bearer token from the environment. Missing variable → `None`.
    pub fn api_key(&self) -> Option<SecretString> {
        let var = self.api_key_env.as_deref()?;
        std::env::var(var).ok().map(SecretString::from)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct HttpCfg {
    /// TCP connect timeout in milliseconds (default 5000ms)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Total request timeout in milliseconds, body included (default 300000ms)
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Optional per-host idle connection pool cap (None = reqwest default)
    #[serde(default)]
    pub pool_max_idle_per_host: Option<usize>,
}

impl Default for HttpCfg {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            pool_max_idle_per_host: None,
        }
    }
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}
fn default_request_timeout_ms() -> u64 {
    300_000
}

/// What to do when a new request arrives while one is still streaming.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OverlapPolicy {
    /// Refuse with `StreamError::Busy` until the current exchange ends.
    Reject,
    /// Cancel the current exchange, then start the new one.
    #[default]
    CancelPrevious,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct StreamCfg {
    #[serde(default)]
    pub schema: PayloadSchema,
    /// Grace period after a `done` status before completion is assumed.
    /// Zero disables the timer.
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    #[serde(default)]
    pub overlap: OverlapPolicy,
}

impl Default for StreamCfg {
    fn default() -> Self {
        Self {
            schema: PayloadSchema::default(),
            settle_ms: default_settle_ms(),
            overlap: OverlapPolicy::default(),
        }
    }
}

impl StreamCfg {
    pub fn settle(&self) -> Option<Duration> {
        (self.settle_ms > 0).then(|| Duration::from_millis(self.settle_ms))
    }
}

fn default_settle_ms() -> u64 {
    1_000
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Config {
    pub endpoint: EndpointCfg,
    /// HTTP client configuration (timeouts, pooling). Missing → defaults.
    #[serde(default)]
    pub http: HttpCfg,
    #[serde(default)]
    pub stream: StreamCfg,
}

impl Config {
    pub fn for_url(url: impl Into<String>) -> Self {
        Self {
            endpoint: EndpointCfg::new(url),
            http: HttpCfg::default(),
            stream: StreamCfg::default(),
        }
    }

    /// Load a Config from a file path (JSON or TOML by extension). If the
    /// extension is missing or unrecognized, try JSON first, then TOML.
    pub fn from_path<P: AsRef<Path>>(path: P) -> CoreResult<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(StreamError::from)?;
        let s = std::str::from_utf8(&bytes).map_err(|e| StreamError::Other(e.into()))?;
        let cfg: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => {
                serde_json::from_str::<Self>(s).map_err(|e| StreamError::Other(e.into()))?
            }
            Some("toml") => toml::from_str::<Self>(s).map_err(|e| StreamError::Other(e.into()))?,
            _ => serde_json::from_str::<Self>(s)
                .map_err(|e| StreamError::Other(e.into()))
                .or_else(|_| {
                    toml::from_str::<Self>(s).map_err(|e| StreamError::Other(e.into()))
                })?,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> CoreResult<()> {
        let url = self.endpoint.url.trim();
        if url.is_empty() {
            return Err(StreamError::Config("endpoint.url is empty".into()));
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(StreamError::Config(format!(
                "endpoint.url must be http(s), got '{url}'"
            )));
        }
        if self.http.connect_timeout_ms == 0 || self.http.request_timeout_ms == 0 {
            return Err(StreamError::Config("http timeouts must be non-zero".into()));
        }
        Ok(())
    }
}
