//! Collectors: one partial record from one upstream source
//!
//! A collector never fails across its boundary. Network errors, parse errors
//! and malformed payloads all come back as a [`SourceRecord`] with
//! `success = false` and a reason in `errors`, possibly alongside the field
//! groups that did parse.

pub mod agent;
pub mod alpha_vantage;
pub mod cached;
pub mod yahoo;

pub use agent::AgentCollector;
pub use alpha_vantage::AlphaVantageCollector;
pub use cached::CachedCollector;
pub use yahoo::YahooCollector;

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::identifier::{Identifier, Market};
pub use crate::record::ReliabilityTier;
use crate::record::SourceRecord;

/// Static description of a collector, used for tie-breaking and routing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectorMetadata {
    pub source_name: String,
    /// Lower value is preferred when a group is selected by priority
    pub priority: u32,
    pub reliability_tier: ReliabilityTier,
    pub supported_markets: Vec<Market>,
}

impl CollectorMetadata {
    pub fn new(source_name: impl Into<String>, priority: u32, tier: ReliabilityTier) -> Self {
        Self {
            source_name: source_name.into(),
            priority,
            reliability_tier: tier,
            supported_markets: vec![Market::Domestic, Market::Foreign],
        }
    }

    pub fn with_markets(mut self, markets: impl Into<Vec<Market>>) -> Self {
        self.supported_markets = markets.into();
        self
    }

    pub fn supports(&self, market: Market) -> bool {
        self.supported_markets.contains(&market)
    }
}

/// Fetches one partial record for an identifier
#[async_trait]
pub trait Collector: Send + Sync {
    fn metadata(&self) -> &CollectorMetadata;

    /// Fetch a record; failures are reported inside the record, never returned
    async fn fetch(&self, identifier: &Identifier) -> SourceRecord;
}

/// Fetch from every collector concurrently and wait for all of them
///
/// Each fetch is bounded by `timeout`; an expired fetch becomes a failure
/// record for that source while its siblings keep running. Collectors that do
/// not cover the identifier's market are not called. Output order matches
/// `collectors`.
pub async fn collect_all(
    collectors: &[Arc<dyn Collector>],
    identifier: &Identifier,
    timeout: Duration,
) -> Vec<SourceRecord> {
    let fetches = collectors.iter().map(|collector| async move {
        let meta = collector.metadata();

        if !meta.supports(identifier.market()) {
            tracing::debug!(
                source = %meta.source_name,
                identifier = %identifier,
                "collector does not cover market, skipping"
            );
            return SourceRecord::failure(
                identifier,
                &meta.source_name,
                format!("{:?} market not supported", identifier.market()),
            );
        }

        let operation = format!("fetch {} from {}", identifier, meta.source_name);
        let record = match agent_utils::with_timeout(operation, timeout, collector.fetch(identifier)).await {
            Ok(record) => record,
            Err(elapsed) => {
                tracing::warn!(source = %meta.source_name, identifier = %identifier, "{elapsed}");
                SourceRecord::failure(identifier, &meta.source_name, elapsed.to_string())
            }
        };

        if record.success {
            tracing::debug!(source = %meta.source_name, confidence = record.confidence, "collector succeeded");
        } else {
            tracing::warn!(source = %meta.source_name, errors = ?record.errors, "collector failed");
        }

        record.with_source_metadata(meta.reliability_tier, meta.priority)
    });

    join_all(fetches).await
}


#[cfg(test)]
mod tests {
    use super::test_support::StaticCollector;
    use super::*;
    use crate::record::{PriceInfo, RecordData};
    use mockall::mock;

    mock! {
        pub Source {}

        #[async_trait]
        impl Collector for Source {
            fn metadata(&self) -> &CollectorMetadata;
            async fn fetch(&self, identifier: &Identifier) -> SourceRecord;
        }
    }

    fn price_data() -> RecordData {
        RecordData {
            price_info: Some(PriceInfo {
                current: Some(3100.0),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_collect_all_keeps_order_and_stamps_metadata() {
        let collectors: Vec<Arc<dyn Collector>> = vec![
            Arc::new(StaticCollector::ok("alpha", ReliabilityTier::High, price_data(), 80)),
            Arc::new(StaticCollector::failing("beta", "HTTP 503")),
        ];
        let id = Identifier::parse("7203").unwrap();

        let records = collect_all(&collectors, &id, Duration::from_secs(1)).await;

        assert_eq!(records.len(), 2);
        assert!(records[0].success);
        assert_eq!(records[0].reliability_tier, ReliabilityTier::High);
        assert!(!records[1].success);
        assert_eq!(records[1].errors, vec!["HTTP 503".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_collector_times_out_without_blocking_siblings() {
        let mut slow = StaticCollector::ok("slow", ReliabilityTier::Medium, price_data(), 90);
        slow.delay = Some(Duration::from_secs(30));
        let collectors: Vec<Arc<dyn Collector>> = vec![
            Arc::new(slow),
            Arc::new(StaticCollector::ok("fast", ReliabilityTier::Medium, price_data(), 70)),
        ];
        let id = Identifier::parse("AAPL").unwrap();

        let records = collect_all(&collectors, &id, Duration::from_secs(5)).await;

        assert!(!records[0].success);
        assert!(records[0].errors[0].contains("timed out"));
        assert!(records[1].success);
    }

    #[tokio::test]
    async fn test_unsupported_market_is_not_fetched() {
        let mut source = MockSource::new();
        source.expect_metadata().return_const(
            CollectorMetadata::new("foreign-only", 1, ReliabilityTier::Medium)
                .with_markets(vec![Market::Foreign]),
        );
        source.expect_fetch().times(0);

        let collectors: Vec<Arc<dyn Collector>> = vec![Arc::new(source)];
        let id = Identifier::parse("7203").unwrap();
        let records = collect_all(&collectors, &id, Duration::from_secs(1)).await;

        assert!(!records[0].success);
        assert!(records[0].errors[0].contains("not supported"));
    }
}
