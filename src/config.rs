//! Configuration management for Veilsync

use crate::subscription::fetcher::{Credentials, NetworkSettings};
use crate::{Error, Result};
use serde::Deserialize;
use std::env;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

/// How the worker routes traffic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceMode {
    /// System-wide tunnel; no local forwarding proxy to piggyback on
    Vpn,
    /// Local SOCKS proxy only
    Proxy,
    /// Transparent proxy
    Transproxy,
}

impl FromStr for ServiceMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "vpn" => Ok(ServiceMode::Vpn),
            "proxy" => Ok(ServiceMode::Proxy),
            "transproxy" => Ok(ServiceMode::Transproxy),
            other => Err(Error::configuration(format!("Unknown service mode: {}", other))),
        }
    }
}

impl fmt::Display for ServiceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServiceMode::Vpn => "vpn",
            ServiceMode::Proxy => "proxy",
            ServiceMode::Transproxy => "transproxy",
        };
        f.write_str(name)
    }
}

/// Client configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// WebSocket endpoint of the worker control channel
    pub worker_endpoint: String,

    /// Timeout for a single worker command in milliseconds
    pub command_timeout_ms: u64,

    /// Traffic sample cadence in milliseconds (0 disables samples)
    pub bandwidth_interval_ms: u64,

    /// Rebind attempts after the worker channel dies
    pub reconnect_attempts: u32,

    /// Base backoff between rebind attempts in milliseconds
    pub reconnect_backoff_ms: u64,

    /// Subscription fetch timeout in seconds
    pub fetch_timeout_secs: u64,

    /// User agent sent with subscription fetches
    pub user_agent: String,

    /// Active service mode
    pub service_mode: ServiceMode,

    /// Intermediary SOCKS proxy used for subscription fetches
    pub socks_address: Option<String>,

    /// Intermediary proxy username
    pub socks_user: String,

    /// Intermediary proxy password
    pub socks_password: String,

    /// Local forwarding proxy exposed by the worker
    pub proxy_address: String,

    /// Subscription feeds refreshed by the daemon
    pub subscription_urls: Vec<String>,

    /// Refresh cadence in seconds (0 disables periodic refresh)
    pub subscription_refresh_secs: u64,

    /// Route subscription fetches through the intermediary proxy
    pub use_proxy_for_fetch: bool,

    /// Log level
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            worker_endpoint: "ws://127.0.0.1:1090".to_string(),
            command_timeout_ms: 5000,
            bandwidth_interval_ms: 500,
            reconnect_attempts: 3,
            reconnect_backoff_ms: 500,
            fetch_timeout_secs: 30,
            user_agent: format!("veilsync/{}", env!("CARGO_PKG_VERSION")),
            service_mode: ServiceMode::Vpn,
            socks_address: None,
            socks_user: String::new(),
            socks_password: String::new(),
            proxy_address: "127.0.0.1:1080".to_string(),
            subscription_urls: Vec::new(),
            subscription_refresh_secs: 0,
            use_proxy_for_fetch: false,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();

        if let Ok(endpoint) = env::var("VEILSYNC_WORKER_ENDPOINT") {
            config.worker_endpoint = endpoint;
        }

        if let Ok(timeout) = env::var("VEILSYNC_COMMAND_TIMEOUT_MS") {
            config.command_timeout_ms = timeout
                .parse()
                .map_err(|_| Error::configuration("Invalid VEILSYNC_COMMAND_TIMEOUT_MS"))?;
        }

        if let Ok(interval) = env::var("VEILSYNC_BANDWIDTH_INTERVAL_MS") {
            config.bandwidth_interval_ms = interval
                .parse()
                .map_err(|_| Error::configuration("Invalid VEILSYNC_BANDWIDTH_INTERVAL_MS"))?;
        }

        if let Ok(attempts) = env::var("VEILSYNC_RECONNECT_ATTEMPTS") {
            config.reconnect_attempts = attempts
                .parse()
                .map_err(|_| Error::configuration("Invalid VEILSYNC_RECONNECT_ATTEMPTS"))?;
        }

        if let Ok(backoff) = env::var("VEILSYNC_RECONNECT_BACKOFF_MS") {
            config.reconnect_backoff_ms = backoff
                .parse()
                .map_err(|_| Error::configuration("Invalid VEILSYNC_RECONNECT_BACKOFF_MS"))?;
        }

        if let Ok(timeout) = env::var("VEILSYNC_FETCH_TIMEOUT") {
            config.fetch_timeout_secs = timeout
                .parse()
                .map_err(|_| Error::configuration("Invalid VEILSYNC_FETCH_TIMEOUT"))?;
        }

        if let Ok(user_agent) = env::var("VEILSYNC_USER_AGENT") {
            config.user_agent = user_agent;
        }

        if let Ok(mode) = env::var("VEILSYNC_SERVICE_MODE") {
            config.service_mode = mode.parse()?;
        }

        if let Ok(address) = env::var("VEILSYNC_SOCKS_ADDRESS") {
            config.socks_address = Some(address).filter(|a| !a.is_empty());
        }

        if let Ok(user) = env::var("VEILSYNC_SOCKS_USER") {
            config.socks_user = user;
        }

        if let Ok(password) = env::var("VEILSYNC_SOCKS_PASSWORD") {
            config.socks_password = password;
        }

        if let Ok(address) = env::var("VEILSYNC_PROXY_ADDRESS") {
            config.proxy_address = address;
        }

        if let Ok(urls) = env::var("VEILSYNC_SUBSCRIPTIONS") {
            config.subscription_urls = urls
                .split(',')
                .map(str::trim)
                .filter(|u| !u.is_empty())
                .map(String::from)
                .collect();
        }

        if let Ok(refresh) = env::var("VEILSYNC_SUBSCRIPTION_REFRESH") {
            config.subscription_refresh_secs = refresh
                .parse()
                .map_err(|_| Error::configuration("Invalid VEILSYNC_SUBSCRIPTION_REFRESH"))?;
        }

        if let Ok(use_proxy) = env::var("VEILSYNC_USE_PROXY") {
            config.use_proxy_for_fetch = use_proxy
                .parse()
                .map_err(|_| Error::configuration("Invalid VEILSYNC_USE_PROXY"))?;
        }

        if let Ok(log_level) = env::var("VEILSYNC_LOG_LEVEL") {
            config.log_level = log_level;
        }

        Ok(config)
    }

    /// Load configuration from a file
    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::configuration(format!("Failed to read config file: {}", e)))?;

        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| Error::configuration(format!("Failed to parse config: {}", e)))
    }

    /// Build the fetch-side network settings, validating addresses
    pub fn network_settings(&self) -> Result<NetworkSettings> {
        let socks_address = self
            .socks_address
            .as_deref()
            .map(|a| parse_addr("socks_address", a))
            .transpose()?;
        let proxy_address = parse_addr("proxy_address", &self.proxy_address)?;

        let credentials = if self.socks_user.is_empty() {
            None
        } else {
            Some(Credentials {
                username: self.socks_user.clone(),
                password: self.socks_password.clone(),
            })
        };

        Ok(NetworkSettings {
            socks_address,
            proxy_address,
            service_mode: self.service_mode,
            credentials,
        })
    }
}

fn parse_addr(field: &str, value: &str) -> Result<SocketAddr> {
    value
        .parse()
        .map_err(|_| Error::configuration(format!("Invalid {}: {}", field, value)))
}
