//! Subscription map and per-conid cache guarded by a single mutex
//! (`spec.md` §5: "The subscription map and the cache are guarded by a
//! mutex").

use chrono::{DateTime, Utc};
use model::market_data::{MarketDataCacheEntry, Subscription};
use rust_decimal::Decimal;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Shared state the streamer's reader, timer, and health-check tasks all
/// touch. Kept behind one mutex deliberately — callbacks run on the
/// reader task and must not block (`spec.md` §9 "Global event emitter"
/// guidance), so critical sections here are kept short.
#[derive(Debug, Default)]
pub struct SharedCache {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    subscriptions: HashMap<i64, Subscription>,
    entries: HashMap<i64, MarketDataCacheEntry>,
    subscription_errors: HashMap<i64, String>,
}

impl SharedCache {
    /// An empty cache with no subscriptions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store (or replace) a subscription. Invariant: at most one per
    /// conid (`spec.md` §3).
    pub async fn add_subscription(&self, subscription: Subscription) {
        let mut inner = self.inner.lock().await;
        inner.subscriptions.insert(subscription.conid, subscription);
    }

    /// Remove a subscription and its cache entry is left untouched (cache
    /// survives unsubscribe; it is only cleared on a full reconnect).
    pub async fn remove_subscription(&self, conid: i64) -> Option<Subscription> {
        let mut inner = self.inner.lock().await;
        inner.subscriptions.remove(&conid)
    }

    /// All currently held subscriptions, for replay on reconnect
    /// (`spec.md` §3, §4.2).
    pub async fn all_subscriptions(&self) -> Vec<Subscription> {
        let inner = self.inner.lock().await;
        inner.subscriptions.values().cloned().collect()
    }

    /// Apply a mutation to one conid's cache entry, creating it on first
    /// tick.
    pub async fn update_entry(&self, conid: i64, now: DateTime<Utc>, mutate: impl FnOnce(&mut MarketDataCacheEntry)) {
        let mut inner = self.inner.lock().await;
        let entry = inner
            .entries
            .entry(conid)
            .or_insert_with(|| MarketDataCacheEntry::new(conid, now));
        mutate(entry);
        inner.subscription_errors.remove(&conid);
    }

    /// `getCachedMarketData(conid)`.
    pub async fn get(&self, conid: i64) -> Option<MarketDataCacheEntry> {
        let inner = self.inner.lock().await;
        inner.entries.get(&conid).cloned()
    }

    /// `isDataFresh(maxAgeMs)` applied to one conid.
    pub async fn is_fresh(&self, conid: i64, now: DateTime<Utc>, max_age: chrono::Duration) -> bool {
        let inner = self.inner.lock().await;
        inner.entries.get(&conid).is_some_and(|e| e.is_fresh(now, max_age))
    }

    /// Record a subscription-error frame for `conid`.
    pub async fn record_subscription_error(&self, conid: i64, message: String) {
        let mut inner = self.inner.lock().await;
        inner.subscription_errors.insert(conid, message);
    }

    /// `hasSubscriptionError()` — true if any conid currently carries an
    /// unresolved error.
    pub async fn has_subscription_error(&self) -> bool {
        let inner = self.inner.lock().await;
        !inner.subscription_errors.is_empty()
    }

    /// Clear cached entries and subscription errors without touching the
    /// subscription map itself — used by `forceFullReconnect` and by the
    /// authentication-failure reconnect path (`spec.md` §4.2).
    pub async fn clear_cache(&self) {
        let mut inner = self.inner.lock().await;
        inner.entries.clear();
        inner.subscription_errors.clear();
    }

    /// Seed one conid's cache entry from a persisted row, used to rehydrate
    /// last-known prices on startup before the first WS tick arrives
    /// (`spec.md` §4.2). Does not touch the subscription map.
    pub async fn seed(
        &self,
        conid: i64,
        last: Option<Decimal>,
        bid: Option<Decimal>,
        ask: Option<Decimal>,
        timestamp: DateTime<Utc>,
    ) {
        let mut inner = self.inner.lock().await;
        let entry = inner.entries.entry(conid).or_insert_with(|| MarketDataCacheEntry::new(conid, timestamp));
        entry.last = last;
        entry.bid = bid;
        entry.ask = ask;
        entry.timestamp = timestamp;
    }

    /// Age in milliseconds of the oldest still-subscribed conid's cache
    /// entry, used by `getDataAge()`.
    pub async fn oldest_age_ms(&self, now: DateTime<Utc>) -> Option<i64> {
        let inner = self.inner.lock().await;
        inner
            .entries
            .values()
            .map(|e| e.age_ms(now))
            .max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::market_data::InstrumentKind;

    #[tokio::test]
    async fn subscription_is_replaced_not_duplicated() {
        let cache = SharedCache::new();
        cache
            .add_subscription(Subscription::new(1, Some("SPY".into()), InstrumentKind::Stock))
            .await;
        cache
            .add_subscription(Subscription::new(1, Some("SPY".into()), InstrumentKind::Stock))
            .await;
        assert_eq!(cache.all_subscriptions().await.len(), 1);
    }

    #[tokio::test]
    async fn clear_cache_preserves_subscriptions() {
        let cache = SharedCache::new();
        cache
            .add_subscription(Subscription::new(1, None, InstrumentKind::Stock))
            .await;
        cache
            .update_entry(1, DateTime::<Utc>::MIN_UTC, |e| e.last = Some(Default::default()))
            .await;
        cache.clear_cache().await;
        assert!(cache.get(1).await.is_none());
        assert_eq!(cache.all_subscriptions().await.len(), 1);
    }
}
