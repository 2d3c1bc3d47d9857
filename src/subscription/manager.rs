//! Subscription sync engine
//!
//! Fetches run without holding any lock. Every store mutation of a sync,
//! and the duplicate check plus insert of `create`, runs under `sync_lock`
//! so two syncs of one group never interleave their writes.

use rand::seq::SliceRandom;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument, warn};

use super::document::{parse_document, ParsedDocument};
use super::fetcher::NetworkSettings;
use super::profile::Profile;
use super::traits::{Fetcher, ProfileStore, Subscription, SubscriptionStatus, SubscriptionStore};
use crate::{Error, Result};

/// Outcome of one subscription during [`SubscriptionManager::update_all`]
#[derive(Debug)]
pub struct SyncReport {
    /// Subscription as left after the attempt
    pub subscription: Subscription,
    pub result: Result<()>,
}

/// Keeps stored profiles in step with their subscriptions
pub struct SubscriptionManager {
    profiles: Arc<dyn ProfileStore>,
    subscriptions: Arc<dyn SubscriptionStore>,
    fetcher: Arc<dyn Fetcher>,
    settings: RwLock<NetworkSettings>,
    sync_lock: Mutex<()>,
}

impl SubscriptionManager {
    pub fn new(
        profiles: Arc<dyn ProfileStore>,
        subscriptions: Arc<dyn SubscriptionStore>,
        fetcher: Arc<dyn Fetcher>,
        settings: NetworkSettings,
    ) -> Self {
        Self {
            profiles,
            subscriptions,
            fetcher,
            settings: RwLock::new(settings),
            sync_lock: Mutex::new(()),
        }
    }

    /// Replace the network settings used by later fetches
    pub async fn set_network_settings(&self, settings: NetworkSettings) {
        *self.settings.write().await = settings;
    }

    pub async fn network_settings(&self) -> NetworkSettings {
        self.settings.read().await.clone()
    }

    async fn fetch(&self, url: &str, use_proxy: bool) -> Result<String> {
        let settings = self.network_settings().await;
        let route = settings.select_route(use_proxy);
        info!(url, ?route, "Fetching subscription");

        self.fetcher
            .fetch(url, route.proxy(), settings.credentials_for(route))
            .await
    }

    /// Register a new feed.
    ///
    /// The feed must yield at least one profile and its first profile must
    /// carry a group label that no stored subscription owns yet.
    #[instrument(skip(self))]
    pub async fn create(&self, url: &str, use_proxy: bool) -> Result<Subscription> {
        let document = self.fetch(url, use_proxy).await?;
        let parsed = parse_document(&document);
        let group = parsed.group().map(str::to_owned).ok_or_else(|| {
            Error::invalid_subscription(format!("{} has no labelled profiles", url))
        })?;

        let mut subscription = {
            let _guard = self.sync_lock.lock().await;
            let existing = self.subscriptions.get_all().await?;
            if existing.iter().any(|s| s.group == group) {
                return Err(Error::duplicate_group(group));
            }

            let mut subscription = Subscription::new(url);
            subscription.group = group;
            subscription.id = self.subscriptions.create(subscription.clone()).await?;
            subscription
        };

        info!(id = subscription.id, group = %subscription.group, "Subscription created");
        self.apply(&mut subscription, parsed).await?;
        Ok(subscription)
    }

    /// Sync one subscription.
    ///
    /// `prefetched` skips the fetch when it holds a non-empty document.
    #[instrument(skip(self, subscription, prefetched), fields(id = subscription.id, group = %subscription.group))]
    pub async fn update(
        &self,
        subscription: &mut Subscription,
        use_proxy: bool,
        prefetched: Option<&str>,
    ) -> Result<()> {
        let fetched;
        let document = match prefetched {
            Some(document) if !document.is_empty() => document,
            _ => {
                fetched = self.fetch(&subscription.url, use_proxy).await?;
                fetched.as_str()
            }
        };

        self.apply(subscription, parse_document(document)).await
    }

    /// Sync every stored subscription in turn; one failure does not stop
    /// the rest.
    #[instrument(skip(self))]
    pub async fn update_all(&self, use_proxy: bool) -> Result<Vec<SyncReport>> {
        let subscriptions = self.subscriptions.get_all().await?;
        let mut reports = Vec::with_capacity(subscriptions.len());

        for mut subscription in subscriptions {
            let result = self.update(&mut subscription, use_proxy, None).await;
            if let Err(e) = &result {
                warn!(id = subscription.id, url = %subscription.url, error = %e, "Subscription sync failed");
            }
            reports.push(SyncReport {
                subscription,
                result,
            });
        }

        let failed = reports.iter().filter(|r| r.result.is_err()).count();
        info!(total = reports.len(), failed, "Synced all subscriptions");
        Ok(reports)
    }

    /// Delete a subscription and every profile of its group.
    ///
    /// Returns false when no such subscription exists.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: i64) -> Result<bool> {
        let _guard = self.sync_lock.lock().await;
        let Some(subscription) = self.subscriptions.get(id).await? else {
            return Ok(false);
        };

        let removed = self.delete_group(&subscription.group).await?;
        let rows = self.subscriptions.delete(id).await?;
        if rows != 1 {
            return Err(Error::storage(format!(
                "Deleting subscription {} affected {} rows",
                id, rows
            )));
        }

        info!(id, group = %subscription.group, removed, "Subscription deleted");
        Ok(true)
    }

    /// Delete every profile of the subscription's group, keeping the
    /// subscription itself
    pub async fn delete_profiles(&self, subscription: &Subscription) -> Result<usize> {
        let _guard = self.sync_lock.lock().await;
        self.delete_group(&subscription.group).await
    }

    pub async fn get(&self, id: i64) -> Result<Option<Subscription>> {
        self.subscriptions.get(id).await
    }

    pub async fn list(&self) -> Result<Vec<Subscription>> {
        self.subscriptions.get_all().await
    }

    async fn apply(&self, subscription: &mut Subscription, parsed: ParsedDocument) -> Result<()> {
        let _guard = self.sync_lock.lock().await;
        let ParsedDocument {
            limit,
            mut profiles,
        } = parsed;

        let Some(first) = profiles.first() else {
            let removed = self.delete_group(&subscription.group).await?;
            subscription.status = SubscriptionStatus::Empty;
            self.persist(subscription).await?;
            info!(id = subscription.id, removed, "Subscription is empty");
            return Ok(());
        };

        if first.group != subscription.group {
            warn!(
                id = subscription.id,
                stored = %subscription.group,
                fetched = %first.group,
                "Subscription group renamed upstream"
            );
            subscription.status = SubscriptionStatus::NameChanged;
            return self.persist(subscription).await;
        }

        subscription.status = SubscriptionStatus::Normal;
        self.persist(subscription).await?;

        if let Some(limit) = limit {
            if limit < profiles.len() {
                debug!(limit, available = profiles.len(), "Applying MAX subset");
                profiles.shuffle(&mut rand::thread_rng());
                profiles.truncate(limit);
            }
        }

        self.reconcile(&subscription.group, profiles).await
    }

    async fn persist(&self, subscription: &mut Subscription) -> Result<()> {
        subscription.updated_at = Some(chrono::Utc::now());
        let rows = self.subscriptions.update(subscription).await?;
        if rows != 1 {
            return Err(Error::storage(format!(
                "Updating subscription {} affected {} rows",
                subscription.id, rows
            )));
        }
        Ok(())
    }

    async fn delete_group(&self, group: &str) -> Result<usize> {
        // an empty label is the manual group, never owned by a feed
        if group.is_empty() {
            return Ok(0);
        }
        let mut removed = 0;
        for profile in self.profiles.get_all_by_group(group).await? {
            removed += self.profiles.delete(profile.id).await?;
        }
        Ok(removed)
    }

    /// Make the stored profiles of `group` equal the candidates, keeping the
    /// ids of servers that are already stored
    async fn reconcile(&self, group: &str, candidates: Vec<Profile>) -> Result<()> {
        let mut stale = self.profiles.get_all_by_group(group).await?;
        let (mut created, mut kept) = (0usize, 0usize);

        for mut candidate in candidates {
            candidate.group = group.to_string();

            match stale.iter().position(|p| p.same_server(&candidate)) {
                Some(index) => {
                    let mut existing = stale.swap_remove(index);
                    if existing.name != candidate.name {
                        existing.name = candidate.name;
                        let rows = self.profiles.update(&existing).await?;
                        if rows != 1 {
                            return Err(Error::storage(format!(
                                "Updating profile {} affected {} rows",
                                existing.id, rows
                            )));
                        }
                    }
                    kept += 1;
                }
                None => {
                    candidate.id = 0;
                    self.profiles.create(candidate).await?;
                    created += 1;
                }
            }
        }

        let removed = stale.len();
        for profile in stale {
            self.profiles.delete(profile.id).await?;
        }

        info!(group, created, kept, removed, "Reconciled subscription profiles");
        Ok(())
    }
}
