//! Subscription fetching
//!
//! Route selection is pure and lives on [`NetworkSettings`]; the HTTP side
//! builds one reqwest client per fetch so proxy credentials never outlive
//! the request that needs them.

use async_trait::async_trait;
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::debug;

use super::document::decode_document;
use super::traits::Fetcher;
use crate::config::{Config, ServiceMode};
use crate::{Error, Result};

/// Username/password for the intermediary SOCKS proxy
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Network facts the fetch route depends on
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkSettings {
    /// Intermediary SOCKS proxy, if the user configured one
    pub socks_address: Option<SocketAddr>,
    /// Local forwarding proxy exposed by the worker
    pub proxy_address: SocketAddr,
    pub service_mode: ServiceMode,
    /// Intermediary credentials; `None` when no username is set
    pub credentials: Option<Credentials>,
}

/// Where a fetch goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchRoute {
    Direct,
    Proxy(SocketAddr),
}

impl FetchRoute {
    /// Proxy address, if any
    pub fn proxy(self) -> Option<SocketAddr> {
        match self {
            FetchRoute::Direct => None,
            FetchRoute::Proxy(addr) => Some(addr),
        }
    }
}

impl NetworkSettings {
    /// Pick the fetch route, first matching rule wins:
    /// no intermediary means direct; `use_proxy` goes through the
    /// intermediary; outside VPN mode the local forwarding proxy is used;
    /// otherwise direct.
    pub fn select_route(&self, use_proxy: bool) -> FetchRoute {
        let Some(socks) = self.socks_address else {
            return FetchRoute::Direct;
        };
        if use_proxy {
            FetchRoute::Proxy(socks)
        } else if self.service_mode != ServiceMode::Vpn {
            FetchRoute::Proxy(self.proxy_address)
        } else {
            FetchRoute::Direct
        }
    }

    /// Credentials to attach for a route; never for direct fetches
    pub fn credentials_for(&self, route: FetchRoute) -> Option<&Credentials> {
        match route {
            FetchRoute::Direct => None,
            FetchRoute::Proxy(_) => self.credentials.as_ref(),
        }
    }
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            socks_address: None,
            proxy_address: SocketAddr::from(([127, 0, 0, 1], 1080)),
            service_mode: ServiceMode::Vpn,
            credentials: None,
        }
    }
}

/// reqwest-backed fetcher
///
/// Dropping the returned future aborts the request.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    timeout: Duration,
    user_agent: String,
}

impl HttpFetcher {
    pub fn new(timeout: Duration, user_agent: impl Into<String>) -> Self {
        Self {
            timeout,
            user_agent: user_agent.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Duration::from_secs(config.fetch_timeout_secs),
            config.user_agent.clone(),
        )
    }

    fn client(
        &self,
        proxy: Option<SocketAddr>,
        credentials: Option<&Credentials>,
    ) -> Result<reqwest::Client> {
        let builder = reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(self.user_agent.as_str());

        let builder = match proxy {
            None => builder.no_proxy(),
            Some(addr) => builder.proxy(reqwest::Proxy::all(proxy_url(addr, credentials)?)?),
        };

        Ok(builder.build()?)
    }
}

/// `socks5h://` so the proxy resolves host names
fn proxy_url(addr: SocketAddr, credentials: Option<&Credentials>) -> Result<reqwest::Url> {
    let mut url = reqwest::Url::parse(&format!("socks5h://{}", addr))
        .map_err(|e| Error::configuration(format!("Invalid proxy address {}: {}", addr, e)))?;

    if let Some(credentials) = credentials {
        url.set_username(&credentials.username)
            .and_then(|_| url.set_password(Some(&credentials.password)))
            .map_err(|_| Error::configuration("Proxy URL cannot carry credentials"))?;
    }
    Ok(url)
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(
        &self,
        url: &str,
        proxy: Option<SocketAddr>,
        credentials: Option<&Credentials>,
    ) -> Result<String> {
        let client = self.client(proxy, credentials)?;
        debug!(url, ?proxy, authenticated = credentials.is_some(), "Fetching subscription");

        let response = client.get(url).send().await?.error_for_status()?;
        let body = response.bytes().await?;
        debug!(url, bytes = body.len(), "Subscription body received");

        decode_document(&body)
    }
}
