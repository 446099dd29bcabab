//! In-memory cache-tier ports: stock, lock, ledger and activity cache.

use futures::future::BoxFuture;
use seckill_core::cache::ActivityCache;
use seckill_core::error::StoreError;
use seckill_core::ledger::ParticipationLedger;
use seckill_core::lock::{DistributedLock, LockToken};
use seckill_core::stock::{DeductOutcome, StockStore};
use seckill_core::types::{Activity, ActivityId, UserId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Outage switch shared by the in-memory stores.
#[derive(Debug, Default)]
struct Outage(AtomicBool);

impl Outage {
    fn set(&self, down: bool) {
        self.0.store(down, Ordering::SeqCst);
    }

    fn check(&self, command: &'static str) -> Result<(), StoreError> {
        if self.0.load(Ordering::SeqCst) {
            Err(StoreError::ConnectionFailed(format!(
                "simulated outage during {command}"
            )))
        } else {
            Ok(())
        }
    }
}

/// In-memory [`StockStore`]. Deduction happens under a single mutex, which
/// gives the same atomicity as the server-side script.
#[derive(Clone, Debug, Default)]
pub struct InMemoryStockStore {
    counters: Arc<Mutex<HashMap<ActivityId, i64>>>,
    outage: Arc<Outage>,
}

impl InMemoryStockStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the cache going away (or coming back).
    pub fn set_unavailable(&self, down: bool) {
        self.outage.set(down);
    }

    /// Overwrite a counter directly, bypassing set-if-absent.
    pub fn force_stock(&self, activity: ActivityId, quantity: i64) {
        self.counters.lock().unwrap().insert(activity, quantity);
    }
}

impl StockStore for InMemoryStockStore {
    fn init_stock(
        &self,
        activity: ActivityId,
        quantity: i64,
    ) -> BoxFuture<'_, Result<i64, StoreError>> {
        Box::pin(async move {
            self.outage.check("init_stock")?;
            let mut counters = self.counters.lock().unwrap();
            Ok(*counters.entry(activity).or_insert(quantity))
        })
    }

    fn get_stock(&self, activity: ActivityId) -> BoxFuture<'_, Result<i64, StoreError>> {
        Box::pin(async move { Ok(self.peek_stock(activity).await?.unwrap_or(0)) })
    }

    fn peek_stock(&self, activity: ActivityId) -> BoxFuture<'_, Result<Option<i64>, StoreError>> {
        Box::pin(async move {
            self.outage.check("get_stock")?;
            Ok(self.counters.lock().unwrap().get(&activity).copied())
        })
    }

    fn deduct(
        &self,
        activity: ActivityId,
        count: i64,
    ) -> BoxFuture<'_, Result<DeductOutcome, StoreError>> {
        Box::pin(async move {
            self.outage.check("deduct")?;
            let mut counters = self.counters.lock().unwrap();
            let Some(current) = counters.get_mut(&activity) else {
                return Ok(DeductOutcome::NotFound);
            };
            if *current < count {
                return Ok(DeductOutcome::InsufficientStock);
            }
            *current -= count;
            Ok(DeductOutcome::Deducted)
        })
    }
}

/// In-memory [`DistributedLock`] with TTL expiry on the Tokio clock.
#[derive(Clone, Debug, Default)]
pub struct InMemoryLock {
    held: Arc<Mutex<HashMap<String, (LockToken, Instant)>>>,
    outage: Arc<Outage>,
}

impl InMemoryLock {
    /// No locks held.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the cache going away (or coming back).
    pub fn set_unavailable(&self, down: bool) {
        self.outage.set(down);
    }

    /// Whether `key` is currently held and unexpired.
    #[must_use]
    pub fn is_held(&self, key: &str) -> bool {
        self.held
            .lock()
            .unwrap()
            .get(key)
            .is_some_and(|(_, expires)| *expires > Instant::now())
    }
}

impl DistributedLock for InMemoryLock {
    fn acquire(
        &self,
        key: &str,
        ttl: Duration,
    ) -> BoxFuture<'_, Result<Option<LockToken>, StoreError>> {
        let key = key.to_string();
        Box::pin(async move {
            self.outage.check("acquire")?;
            let now = Instant::now();
            let mut held = self.held.lock().unwrap();
            if held.get(&key).is_some_and(|(_, expires)| *expires > now) {
                return Ok(None);
            }
            let token = LockToken::generate();
            held.insert(key, (token.clone(), now + ttl));
            Ok(Some(token))
        })
    }

    fn release(&self, key: &str, token: &LockToken) -> BoxFuture<'_, Result<bool, StoreError>> {
        let key = key.to_string();
        let token = token.clone();
        Box::pin(async move {
            self.outage.check("release")?;
            let now = Instant::now();
            let mut held = self.held.lock().unwrap();
            match held.get(&key) {
                Some((owner, expires)) if *owner == token && *expires > now => {
                    held.remove(&key);
                    Ok(true)
                }
                _ => Ok(false),
            }
        })
    }
}

/// In-memory [`ParticipationLedger`] with per-record TTL.
#[derive(Clone, Debug)]
pub struct InMemoryLedger {
    records: Arc<Mutex<HashMap<(UserId, ActivityId), Instant>>>,
    ttl: Duration,
    outage: Arc<Outage>,
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new(Duration::from_secs(24 * 60 * 60))
    }
}

impl InMemoryLedger {
    /// Ledger whose records live for `ttl`.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            records: Arc::default(),
            ttl,
            outage: Arc::default(),
        }
    }

    /// Simulate the cache going away (or coming back).
    pub fn set_unavailable(&self, down: bool) {
        self.outage.set(down);
    }

    /// Number of live records.
    #[must_use]
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.records
            .lock()
            .unwrap()
            .values()
            .filter(|expires| **expires > now)
            .count()
    }

    /// Whether there are no live records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ParticipationLedger for InMemoryLedger {
    fn record_join(
        &self,
        user: UserId,
        activity: ActivityId,
    ) -> BoxFuture<'_, Result<bool, StoreError>> {
        Box::pin(async move {
            self.outage.check("record_join")?;
            let now = Instant::now();
            let mut records = self.records.lock().unwrap();
            if records.get(&(user, activity)).is_some_and(|e| *e > now) {
                return Ok(false);
            }
            records.insert((user, activity), now + self.ttl);
            Ok(true)
        })
    }

    fn is_joined(
        &self,
        user: UserId,
        activity: ActivityId,
    ) -> BoxFuture<'_, Result<bool, StoreError>> {
        Box::pin(async move {
            self.outage.check("is_joined")?;
            let now = Instant::now();
            Ok(self
                .records
                .lock()
                .unwrap()
                .get(&(user, activity))
                .is_some_and(|e| *e > now))
        })
    }
}

/// In-memory [`ActivityCache`].
#[derive(Clone, Debug, Default)]
pub struct InMemoryActivityCache {
    entries: Arc<Mutex<HashMap<ActivityId, Activity>>>,
    outage: Arc<Outage>,
}

impl InMemoryActivityCache {
    /// Empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the cache going away (or coming back).
    pub fn set_unavailable(&self, down: bool) {
        self.outage.set(down);
    }

    /// Whether an entry exists for `id`.
    #[must_use]
    pub fn contains(&self, id: ActivityId) -> bool {
        self.entries.lock().unwrap().contains_key(&id)
    }
}

impl ActivityCache for InMemoryActivityCache {
    fn put<'a>(&'a self, activity: &'a Activity) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            self.outage.check("put_activity")?;
            self.entries
                .lock()
                .unwrap()
                .insert(activity.id, activity.clone());
            Ok(())
        })
    }

    fn get(&self, id: ActivityId) -> BoxFuture<'_, Result<Option<Activity>, StoreError>> {
        Box::pin(async move {
            self.outage.check("get_activity")?;
            Ok(self.entries.lock().unwrap().get(&id).cloned())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn init_stock_is_set_if_absent() {
        let stock = InMemoryStockStore::new();
        let a = ActivityId::new(1);
        assert_eq!(stock.init_stock(a, 10).await.unwrap(), 10);
        assert_eq!(stock.init_stock(a, 99).await.unwrap(), 10);
        assert_eq!(stock.get_stock(a).await.unwrap(), 10);
        assert_eq!(stock.get_stock(ActivityId::new(2)).await.unwrap(), 0);
        assert_eq!(stock.peek_stock(ActivityId::new(2)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn deduct_outcomes() {
        let stock = InMemoryStockStore::new();
        let a = ActivityId::new(1);
        assert_eq!(stock.deduct(a, 1).await.unwrap(), DeductOutcome::NotFound);
        stock.init_stock(a, 2).await.unwrap();
        assert_eq!(stock.deduct(a, 3).await.unwrap(), DeductOutcome::InsufficientStock);
        assert_eq!(stock.deduct(a, 2).await.unwrap(), DeductOutcome::Deducted);
        assert_eq!(stock.get_stock(a).await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn lock_expires_after_ttl() {
        let lock = InMemoryLock::new();
        let first = lock.acquire("k", Duration::from_secs(1)).await.unwrap();
        assert!(first.is_some());
        assert!(lock.acquire("k", Duration::from_secs(1)).await.unwrap().is_none());

        tokio::time::advance(Duration::from_millis(1001)).await;
        let second = lock.acquire("k", Duration::from_secs(1)).await.unwrap();
        assert!(second.is_some());

        // The first holder's token no longer owns the key.
        assert!(!lock.release("k", &first.unwrap()).await.unwrap());
        assert!(lock.is_held("k"));
        assert!(lock.release("k", &second.unwrap()).await.unwrap());
        assert!(!lock.is_held("k"));
    }

    #[tokio::test]
    async fn ledger_records_once() {
        let ledger = InMemoryLedger::default();
        let (u, a) = (UserId::new(1), ActivityId::new(2));
        assert!(!ledger.is_joined(u, a).await.unwrap());
        assert!(ledger.record_join(u, a).await.unwrap());
        assert!(!ledger.record_join(u, a).await.unwrap());
        assert!(ledger.is_joined(u, a).await.unwrap());
        assert_eq!(ledger.len(), 1);
    }

    #[tokio::test]
    async fn outage_surfaces_as_connection_error() {
        let stock = InMemoryStockStore::new();
        stock.set_unavailable(true);
        assert!(matches!(
            stock.deduct(ActivityId::new(1), 1).await,
            Err(StoreError::ConnectionFailed(_))
        ));
    }
}
