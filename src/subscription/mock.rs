//! Scripted fetcher for testing

use async_trait::async_trait;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Mutex;

use super::fetcher::Credentials;
use super::traits::Fetcher;
use crate::{Error, Result};

/// One recorded fetch
#[derive(Debug, Clone, PartialEq)]
pub struct FetchCall {
    pub url: String,
    pub proxy: Option<SocketAddr>,
    pub credentials: Option<Credentials>,
}

/// Fetcher serving decoded documents from memory
///
/// Unknown URLs fail with a network error.
#[derive(Debug, Default)]
pub struct MockFetcher {
    documents: Mutex<HashMap<String, String>>,
    calls: Mutex<Vec<FetchCall>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `document` for `url` from now on
    pub fn serve(&self, url: impl Into<String>, document: impl Into<String>) {
        self.documents
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(url.into(), document.into());
    }

    /// Stop serving `url`
    pub fn remove(&self, url: &str) {
        self.documents
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(url);
    }

    pub fn calls(&self) -> Vec<FetchCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(
        &self,
        url: &str,
        proxy: Option<SocketAddr>,
        credentials: Option<&Credentials>,
    ) -> Result<String> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(FetchCall {
                url: url.to_string(),
                proxy,
                credentials: credentials.cloned(),
            });

        self.documents
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(url)
            .cloned()
            .ok_or_else(|| Error::network(format!("404 Not Found: {}", url)))
    }
}
