//! In-memory stores
//!
//! Backing for the daemon and for tests. Ids are assigned from 1 upward and
//! never reused. `set_available(false)` makes every call fail with a
//! storage error.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use tokio::sync::RwLock;

use super::profile::Profile;
use super::traits::{ProfileStore, Subscription, SubscriptionStore};
use crate::{Error, Result};

trait Record: Clone + Send + Sync {
    const KIND: &'static str;
    fn id(&self) -> i64;
    fn set_id(&mut self, id: i64);
}

impl Record for Profile {
    const KIND: &'static str = "profile";
    fn id(&self) -> i64 {
        self.id
    }
    fn set_id(&mut self, id: i64) {
        self.id = id;
    }
}

impl Record for Subscription {
    const KIND: &'static str = "subscription";
    fn id(&self) -> i64 {
        self.id
    }
    fn set_id(&mut self, id: i64) {
        self.id = id;
    }
}

#[derive(Debug)]
struct Table<T> {
    rows: RwLock<BTreeMap<i64, T>>,
    last_id: AtomicI64,
    available: AtomicBool,
}

impl<T: Record> Table<T> {
    fn new() -> Self {
        Self {
            rows: RwLock::new(BTreeMap::new()),
            last_id: AtomicI64::new(0),
            available: AtomicBool::new(true),
        }
    }

    fn check(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::storage(format!("{} store unavailable", T::KIND)))
        }
    }

    async fn create(&self, mut row: T) -> Result<i64> {
        self.check()?;
        let id = self.last_id.fetch_add(1, Ordering::SeqCst) + 1;
        row.set_id(id);
        self.rows.write().await.insert(id, row);
        Ok(id)
    }

    async fn update(&self, row: &T) -> Result<usize> {
        self.check()?;
        let mut rows = self.rows.write().await;
        match rows.get_mut(&row.id()) {
            Some(slot) => {
                *slot = row.clone();
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn delete(&self, id: i64) -> Result<usize> {
        self.check()?;
        Ok(self.rows.write().await.remove(&id).map_or(0, |_| 1))
    }

    async fn get(&self, id: i64) -> Result<Option<T>> {
        self.check()?;
        Ok(self.rows.read().await.get(&id).cloned())
    }

    async fn filter(&self, predicate: impl Fn(&T) -> bool) -> Result<Vec<T>> {
        self.check()?;
        Ok(self
            .rows
            .read()
            .await
            .values()
            .filter(|row| predicate(row))
            .cloned()
            .collect())
    }
}

/// In-memory [`ProfileStore`]
#[derive(Debug)]
pub struct MemoryProfileStore {
    table: Table<Profile>,
}

impl MemoryProfileStore {
    pub fn new() -> Self {
        Self {
            table: Table::new(),
        }
    }

    /// Toggle simulated storage failure
    pub fn set_available(&self, available: bool) {
        self.table.available.store(available, Ordering::SeqCst);
    }
}

impl Default for MemoryProfileStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn create(&self, profile: Profile) -> Result<i64> {
        self.table.create(profile).await
    }

    async fn update(&self, profile: &Profile) -> Result<usize> {
        self.table.update(profile).await
    }

    async fn delete(&self, id: i64) -> Result<usize> {
        self.table.delete(id).await
    }

    async fn get(&self, id: i64) -> Result<Option<Profile>> {
        self.table.get(id).await
    }

    async fn get_all(&self) -> Result<Vec<Profile>> {
        self.table.filter(|_| true).await
    }

    async fn get_all_by_group(&self, group: &str) -> Result<Vec<Profile>> {
        self.table.filter(|p| p.group == group).await
    }
}

/// In-memory [`SubscriptionStore`]
#[derive(Debug)]
pub struct MemorySubscriptionStore {
    table: Table<Subscription>,
}

impl MemorySubscriptionStore {
    pub fn new() -> Self {
        Self {
            table: Table::new(),
        }
    }

    /// Toggle simulated storage failure
    pub fn set_available(&self, available: bool) {
        self.table.available.store(available, Ordering::SeqCst);
    }
}

impl Default for MemorySubscriptionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SubscriptionStore for MemorySubscriptionStore {
    async fn create(&self, subscription: Subscription) -> Result<i64> {
        self.table.create(subscription).await
    }

    async fn update(&self, subscription: &Subscription) -> Result<usize> {
        self.table.update(subscription).await
    }

    async fn delete(&self, id: i64) -> Result<usize> {
        self.table.delete(id).await
    }

    async fn get(&self, id: i64) -> Result<Option<Subscription>> {
        self.table.get(id).await
    }

    async fn get_all(&self) -> Result<Vec<Subscription>> {
        self.table.filter(|_| true).await
    }
}
