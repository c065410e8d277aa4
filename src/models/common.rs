use std::time::Duration;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use url::Url;

const DEFAULT_RPC_URL: &str = "https://ethereum-rpc.publicnode.com";
const DEFAULT_WS_URL: &str = "wss://ethereum-rpc.publicnode.com";
const DEFAULT_QUEUE_CAPACITY: usize = 999_999;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub address: String,
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: "0.0.0.0".to_string(),
            port: 9100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub address: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    // Per-subscription buffer between the websocket reader and its watcher.
    // Overflow drops the newest event.
    pub queue_capacity: usize,
    pub request_timeout_secs: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            request_timeout_secs: 10,
        }
    }
}

impl StreamConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub rpc_url: String,
    pub ws_url: String,
    pub server: ServerConfig,
    pub stream: StreamConfig,
    pub shutdown_timeout_secs: u64,
    pub metrics: MetricsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rpc_url: DEFAULT_RPC_URL.to_string(),
            ws_url: DEFAULT_WS_URL.to_string(),
            server: ServerConfig::default(),
            stream: StreamConfig::default(),
            shutdown_timeout_secs: 30,
            metrics: MetricsConfig::default(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        let rpc_url: Url = self.rpc_url.parse()?;
        if !matches!(rpc_url.scheme(), "http" | "https") {
            bail!("rpc_url must use http or https, got {}", rpc_url.scheme());
        }

        let ws_url: Url = self.ws_url.parse()?;
        if !matches!(ws_url.scheme(), "ws" | "wss") {
            bail!("ws_url must use ws or wss, got {}", ws_url.scheme());
        }

        if self.stream.queue_capacity == 0 {
            bail!("stream.queue_capacity must be greater than zero");
        }
        if self.stream.queue_capacity > Semaphore::MAX_PERMITS {
            bail!(
                "stream.queue_capacity must be at most {}, got {}",
                Semaphore::MAX_PERMITS,
                self.stream.queue_capacity
            );
        }

        Ok(())
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}
