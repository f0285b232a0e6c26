//! Record model: field groups, per-source records and the canonical merge result
//!
//! Every leaf is optional and serializes as an explicit `null`; keys are never
//! omitted. A [`SourceRecord`] may lack whole groups, a [`CanonicalRecord`]
//! always carries all five.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::identifier::Identifier;

/// One of the five independently sourced sections of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldGroup {
    PriceInfo,
    FinancialMetrics,
    TechnicalIndicators,
    NewsItems,
    SentimentSummary,
}

impl FieldGroup {
    pub const ALL: [FieldGroup; 5] = [
        Self::PriceInfo,
        Self::FinancialMetrics,
        Self::TechnicalIndicators,
        Self::NewsItems,
        Self::SentimentSummary,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PriceInfo => "priceInfo",
            Self::FinancialMetrics => "financialMetrics",
            Self::TechnicalIndicators => "technicalIndicators",
            Self::NewsItems => "newsItems",
            Self::SentimentSummary => "sentimentSummary",
        }
    }
}

impl fmt::Display for FieldGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How much a source is trusted, used for tie-breaking and the validator bonus
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ReliabilityTier {
    Low,
    #[default]
    Medium,
    High,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PriceInfo {
    pub current: Option<f64>,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub previous_close: Option<f64>,
    pub change: Option<f64>,
    pub change_percent: Option<f64>,
    pub volume: Option<i64>,
    pub currency: Option<String>,
    pub as_of: Option<String>,
}

impl PriceInfo {
    /// At least one of the price leaves is populated
    pub fn has_any_price(&self) -> bool {
        [
            self.current,
            self.open,
            self.high,
            self.low,
            self.previous_close,
        ]
        .iter()
        .any(Option::is_some)
    }

    /// The price the validator checks for positivity
    pub fn reference_price(&self) -> Option<f64> {
        self.current.or(self.previous_close)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FinancialMetrics {
    pub market_cap: Option<f64>,
    pub per: Option<f64>,
    pub pbr: Option<f64>,
    pub roe: Option<f64>,
    pub eps: Option<f64>,
    pub dividend_yield: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TechnicalIndicators {
    pub rsi: Option<f64>,
    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,
    pub sma_20: Option<f64>,
    pub sma_50: Option<f64>,
    pub bollinger_upper: Option<f64>,
    pub bollinger_lower: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewsItem {
    pub title: String,
    /// Expected to be ISO-8601; kept verbatim so the validator can flag bad values
    pub published_at: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
}

impl NewsItem {
    pub fn new(title: impl Into<String>, published_at: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            published_at: published_at.into(),
            url: None,
            source: None,
            summary: None,
        }
    }

    /// Key used for de-duplication: trimmed, case-folded title
    pub fn dedup_key(&self) -> String {
        self.title.trim().to_lowercase()
    }

    /// Parsed publication time, `None` when the timestamp is not ISO-8601
    pub fn published(&self) -> Option<DateTime<Utc>> {
        parse_iso8601(&self.published_at)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SentimentSummary {
    /// -1.0 (bearish) to 1.0 (bullish)
    pub score: Option<f64>,
    pub label: Option<String>,
    pub positive: Option<u32>,
    pub negative: Option<u32>,
    pub neutral: Option<u32>,
}

/// Accepts RFC 3339 date-times and plain `YYYY-MM-DD` dates
pub fn parse_iso8601(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

/// The five groups as delivered by one source; any subset may be absent
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordData {
    pub price_info: Option<PriceInfo>,
    pub financial_metrics: Option<FinancialMetrics>,
    pub technical_indicators: Option<TechnicalIndicators>,
    pub news_items: Option<Vec<NewsItem>>,
    pub sentiment_summary: Option<SentimentSummary>,
}

impl RecordData {
    pub fn has_group(&self, group: FieldGroup) -> bool {
        match group {
            FieldGroup::PriceInfo => self.price_info.is_some(),
            FieldGroup::FinancialMetrics => self.financial_metrics.is_some(),
            FieldGroup::TechnicalIndicators => self.technical_indicators.is_some(),
            FieldGroup::NewsItems => self.news_items.as_ref().is_some_and(|n| !n.is_empty()),
            FieldGroup::SentimentSummary => self.sentiment_summary.is_some(),
        }
    }

    pub fn is_empty(&self) -> bool {
        FieldGroup::ALL.iter().all(|g| !self.has_group(*g))
    }
}

/// Output of one collector for one identifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRecord {
    pub identifier: String,
    #[serde(flatten)]
    pub data: RecordData,
    pub source_name: String,
    pub reliability_tier: ReliabilityTier,
    pub priority: u32,
    pub timestamp: DateTime<Utc>,
    /// Collector-asserted confidence, 0-100
    pub confidence: u8,
    pub success: bool,
    pub errors: Vec<String>,
}

impl SourceRecord {
    fn base(identifier: &Identifier, source_name: &str) -> Self {
        Self {
            identifier: identifier.to_string(),
            data: RecordData::default(),
            source_name: source_name.to_string(),
            reliability_tier: ReliabilityTier::default(),
            priority: 0,
            timestamp: Utc::now(),
            confidence: 0,
            success: false,
            errors: Vec::new(),
        }
    }

    /// A successful record carrying `data`
    pub fn success(
        identifier: &Identifier,
        source_name: &str,
        data: RecordData,
        confidence: u8,
    ) -> Self {
        Self {
            data,
            confidence: confidence.min(100),
            success: true,
            ..Self::base(identifier, source_name)
        }
    }

    /// A failed record with one human-readable reason
    pub fn failure(identifier: &Identifier, source_name: &str, reason: impl Into<String>) -> Self {
        Self {
            errors: vec![reason.into()],
            ..Self::base(identifier, source_name)
        }
    }

    /// Stamp collector metadata used later for tie-breaking
    pub fn with_source_metadata(mut self, tier: ReliabilityTier, priority: u32) -> Self {
        self.reliability_tier = tier;
        self.priority = priority;
        self
    }

    pub fn has_group(&self, group: FieldGroup) -> bool {
        self.data.has_group(group)
    }
}

/// The single merged description of an instrument
///
/// Every group is present even when all of its leaves are null. Fields are
/// only readable after assembly; stages downstream of the aggregator share it
/// behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalRecord {
    identifier: String,
    price_info: PriceInfo,
    financial_metrics: FinancialMetrics,
    technical_indicators: TechnicalIndicators,
    news_items: Vec<NewsItem>,
    sentiment_summary: SentimentSummary,
    sources_used: Vec<String>,
    merge_confidence: u8,
}

impl CanonicalRecord {
    /// The all-null default shape
    pub fn empty(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            price_info: PriceInfo::default(),
            financial_metrics: FinancialMetrics::default(),
            technical_indicators: TechnicalIndicators::default(),
            news_items: Vec::new(),
            sentiment_summary: SentimentSummary::default(),
            sources_used: Vec::new(),
            merge_confidence: 0,
        }
    }

    pub(crate) fn assemble(
        identifier: impl Into<String>,
        data: RecordData,
        sources_used: Vec<String>,
        merge_confidence: u8,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            price_info: data.price_info.unwrap_or_default(),
            financial_metrics: data.financial_metrics.unwrap_or_default(),
            technical_indicators: data.technical_indicators.unwrap_or_default(),
            news_items: data.news_items.unwrap_or_default(),
            sentiment_summary: data.sentiment_summary.unwrap_or_default(),
            sources_used,
            merge_confidence: merge_confidence.min(100),
        }
    }

    pub(crate) fn with_merge_confidence(mut self, confidence: u8) -> Self {
        self.merge_confidence = confidence.min(100);
        self
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn price_info(&self) -> &PriceInfo {
        &self.price_info
    }

    pub fn financial_metrics(&self) -> &FinancialMetrics {
        &self.financial_metrics
    }

    pub fn technical_indicators(&self) -> &TechnicalIndicators {
        &self.technical_indicators
    }

    pub fn news_items(&self) -> &[NewsItem] {
        &self.news_items
    }

    pub fn sentiment_summary(&self) -> &SentimentSummary {
        &self.sentiment_summary
    }

    pub fn sources_used(&self) -> &[String] {
        &self.sources_used
    }

    pub fn merge_confidence(&self) -> u8 {
        self.merge_confidence
    }

    /// Serialized form handed to opinion agents
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id() -> Identifier {
        Identifier::parse("AAPL").unwrap()
    }

    #[test]
    fn test_empty_canonical_serializes_every_leaf_as_null() {
        let record = CanonicalRecord::empty("AAPL");
        let json = serde_json::to_value(&record).unwrap();

        for group in ["priceInfo", "financialMetrics", "technicalIndicators", "sentimentSummary"] {
            let obj = json[group].as_object().unwrap();
            assert!(!obj.is_empty());
            assert!(obj.values().all(serde_json::Value::is_null), "{group}");
        }
        assert_eq!(json["newsItems"], serde_json::json!([]));
        assert_eq!(json["mergeConfidence"], 0);
    }

    #[test]
    fn test_source_record_keeps_absent_groups_as_null() {
        let record = SourceRecord::failure(&id(), "yahoo", "timeout");
        let json = serde_json::to_value(&record).unwrap();

        let obj = json.as_object().unwrap();
        for key in ["priceInfo", "financialMetrics", "technicalIndicators", "newsItems"] {
            assert!(obj.contains_key(key), "{key} missing");
            assert!(obj[key].is_null());
        }
        assert_eq!(json["success"], false);
        assert_eq!(json["errors"][0], "timeout");
    }

    #[test]
    fn test_has_group() {
        let data = RecordData {
            price_info: Some(PriceInfo {
                current: Some(10.0),
                ..Default::default()
            }),
            news_items: Some(vec![]),
            ..Default::default()
        };
        let record = SourceRecord::success(&id(), "agent", data, 70);

        assert!(record.has_group(FieldGroup::PriceInfo));
        assert!(!record.has_group(FieldGroup::NewsItems));
        assert!(!record.has_group(FieldGroup::FinancialMetrics));
    }

    #[test]
    fn test_parse_iso8601() {
        assert!(parse_iso8601("2024-05-01T09:30:00Z").is_some());
        assert!(parse_iso8601("2024-05-01T09:30:00+09:00").is_some());
        assert!(parse_iso8601("2024-05-01").is_some());
        assert!(parse_iso8601("May 1st").is_none());
        assert!(parse_iso8601("2024/05/01").is_none());
    }

    #[test]
    fn test_dedup_key() {
        let a = NewsItem::new("Q3 Results Strong", "2024-05-01");
        let b = NewsItem::new("q3 results strong ", "2024-05-02");
        assert_eq!(a.dedup_key(), b.dedup_key());
    }

    #[test]
    fn test_tier_ordering() {
        assert!(ReliabilityTier::High > ReliabilityTier::Medium);
        assert!(ReliabilityTier::Medium > ReliabilityTier::Low);
    }
}
