//! Time-bounded memoisation in front of any collector

use async_trait::async_trait;
use cached::{Cached, TimedCache};
use std::time::Duration;
use tokio::sync::Mutex;

use super::{Collector, CollectorMetadata};
use crate::identifier::Identifier;
use crate::record::SourceRecord;

/// Serves repeated fetches for the same identifier from memory until the TTL
/// lapses. Only successful records are cached so a transient upstream failure
/// is retried on the next request.
pub struct CachedCollector<C> {
    inner: C,
    cache: Mutex<TimedCache<String, SourceRecord>>,
}

impl<C: Collector> CachedCollector<C> {
    pub fn new(inner: C, ttl: Duration) -> Self {
        Self {
            inner,
            cache: Mutex::new(TimedCache::with_lifespan(ttl)),
        }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    pub async fn invalidate(&self, identifier: &Identifier) {
        let _ = self.cache.lock().await.cache_remove(identifier.as_str());
    }

    pub async fn len(&self) -> usize {
        self.cache.lock().await.cache_size()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl<C: Collector> Collector for CachedCollector<C> {
    fn metadata(&self) -> &CollectorMetadata {
        self.inner.metadata()
    }

    async fn fetch(&self, identifier: &Identifier) -> SourceRecord {
        let key = identifier.as_str().to_string();

        if let Some(hit) = self.cache.lock().await.cache_get(&key).cloned() {
            tracing::debug!(source = %self.inner.metadata().source_name, %identifier, "cache hit");
            return hit;
        }

        // lock is not held across the upstream call
        let record = self.inner.fetch(identifier).await;
        if record.success {
            let _ = self.cache.lock().await.cache_set(key, record.clone());
        }
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::test_support::StaticCollector;
    use crate::record::{PriceInfo, RecordData, ReliabilityTier};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        inner: StaticCollector,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Collector for Counting {
        fn metadata(&self) -> &CollectorMetadata {
            self.inner.metadata()
        }

        async fn fetch(&self, identifier: &Identifier) -> SourceRecord {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.fetch(identifier).await
        }
    }

    fn counting(inner: StaticCollector) -> Counting {
        Counting {
            inner,
            calls: AtomicUsize::new(0),
        }
    }

    #[tokio::test]
    async fn test_second_fetch_is_served_from_cache() {
        let data = RecordData {
            price_info: Some(PriceInfo {
                current: Some(190.0),
                ..Default::default()
            }),
            ..Default::default()
        };
        let cached = CachedCollector::new(
            counting(StaticCollector::ok("yahoo", ReliabilityTier::High, data, 80)),
            Duration::from_secs(60),
        );
        let id = Identifier::parse("AAPL").unwrap();

        let first = cached.fetch(&id).await;
        let second = cached.fetch(&id).await;

        assert_eq!(first, second);
        assert_eq!(cached.inner().calls.load(Ordering::SeqCst), 1);
        assert_eq!(cached.len().await, 1);

        cached.invalidate(&id).await;
        assert!(cached.is_empty().await);
        cached.fetch(&id).await;
        assert_eq!(cached.inner().calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let cached = CachedCollector::new(
            counting(StaticCollector::failing("yahoo", "upstream 503")),
            Duration::from_secs(60),
        );
        let id = Identifier::parse("7203").unwrap();

        assert!(!cached.fetch(&id).await.success);
        assert!(!cached.fetch(&id).await.success);
        assert_eq!(cached.inner().calls.load(Ordering::SeqCst), 2);
        assert!(cached.is_empty().await);
    }
}
