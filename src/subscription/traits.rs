//! Subscription records and the seams of the sync engine

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

use super::fetcher::Credentials;
use super::profile::Profile;
use crate::Result;

/// Outcome of the last sync of a subscription
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SubscriptionStatus {
    #[default]
    Normal,
    /// The feed returned no profiles
    Empty,
    /// The feed's group label no longer matches the stored one
    NameChanged,
}

/// Remote feed of profiles
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub id: i64,
    pub url: String,
    /// Group label owned by this subscription
    pub group: String,
    pub status: SubscriptionStatus,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Subscription {
    /// Unsaved subscription for a feed URL
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            id: 0,
            url: url.into(),
            group: String::new(),
            status: SubscriptionStatus::Normal,
            updated_at: None,
        }
    }
}

/// Profile persistence
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Insert, returning the assigned id
    async fn create(&self, profile: Profile) -> Result<i64>;

    /// Replace by id, returning rows affected
    async fn update(&self, profile: &Profile) -> Result<usize>;

    /// Delete by id, returning rows affected
    async fn delete(&self, id: i64) -> Result<usize>;

    async fn get(&self, id: i64) -> Result<Option<Profile>>;

    async fn get_all(&self) -> Result<Vec<Profile>>;

    async fn get_all_by_group(&self, group: &str) -> Result<Vec<Profile>>;
}

/// Subscription persistence
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Insert, returning the assigned id
    async fn create(&self, subscription: Subscription) -> Result<i64>;

    /// Replace by id, returning rows affected
    async fn update(&self, subscription: &Subscription) -> Result<usize>;

    /// Delete by id, returning rows affected
    async fn delete(&self, id: i64) -> Result<usize>;

    async fn get(&self, id: i64) -> Result<Option<Subscription>>;

    async fn get_all(&self) -> Result<Vec<Subscription>>;
}

/// Downloads and decodes a subscription document
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch `url`, through `proxy` when given, and return the decoded
    /// document text. Credentials apply to the proxy only.
    async fn fetch(
        &self,
        url: &str,
        proxy: Option<SocketAddr>,
        credentials: Option<&Credentials>,
    ) -> Result<String>;
}
