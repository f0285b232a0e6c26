//! Plausibility scoring for a single, possibly partial, record
//!
//! Scoring starts at 100 and each violated rule deducts its penalty. The
//! reliability tier of the producing source adds a one-off adjustment. The
//! result is clamped to `0..=100`. A record is valid iff it has no errors;
//! warnings only cost score.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::record::{
    CanonicalRecord, FinancialMetrics, NewsItem, PriceInfo, ReliabilityTier, SourceRecord,
    TechnicalIndicators,
};

const BASE_SCORE: i32 = 100;
const MAX_DAILY_CHANGE_PERCENT: f64 = 50.0;
const MIN_NEWS_TITLE_CHARS: usize = 5;
const PER_RANGE: (f64, f64) = (0.0, 1000.0);
const PBR_RANGE: (f64, f64) = (0.0, 50.0);
const ROE_RANGE: (f64, f64) = (-100.0, 100.0);
const RSI_RANGE: (f64, f64) = (0.0, 100.0);

/// A validator rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rule {
    MissingIdentifier,
    MissingPrice,
    NonPositivePrice,
    ExtremeDailyChange,
    NegativeVolume,
    PerOutOfRange,
    PbrOutOfRange,
    RoeOutOfRange,
    RsiOutOfRange,
    ShortNewsTitle,
    InvalidNewsTimestamp,
}

impl Rule {
    pub fn penalty(&self) -> i32 {
        match self {
            Self::MissingIdentifier | Self::MissingPrice => 20,
            Self::NonPositivePrice => 30,
            Self::ExtremeDailyChange => 10,
            Self::NegativeVolume => 15,
            Self::PerOutOfRange | Self::PbrOutOfRange | Self::RoeOutOfRange | Self::RsiOutOfRange => 5,
            Self::ShortNewsTitle => 2,
            Self::InvalidNewsTimestamp => 3,
        }
    }

    /// Errors block validity, everything else is a warning
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Self::MissingIdentifier | Self::MissingPrice | Self::NonPositivePrice | Self::NegativeVolume
        )
    }
}

fn tier_adjustment(tier: ReliabilityTier) -> i32 {
    match tier {
        ReliabilityTier::High => 5,
        ReliabilityTier::Medium => 0,
        ReliabilityTier::Low => -10,
    }
}

/// One violated rule with a human-readable message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub rule: Rule,
    pub message: String,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
    pub score: u8,
}

impl ValidationResult {
    /// No price leaf at all: the merged record cannot describe the instrument
    pub fn lacks_required_leaves(&self) -> bool {
        self.errors.iter().any(|e| e.rule == Rule::MissingPrice)
    }

    pub fn error_messages(&self) -> impl Iterator<Item = String> + '_ {
        self.errors.iter().map(ToString::to_string)
    }

    pub fn warning_messages(&self) -> impl Iterator<Item = String> + '_ {
        self.warnings.iter().map(ToString::to_string)
    }
}

/// Borrowed view over whatever is being validated
#[derive(Debug, Clone, Copy)]
pub struct RecordView<'a> {
    pub identifier: &'a str,
    pub price_info: Option<&'a PriceInfo>,
    pub financial_metrics: Option<&'a FinancialMetrics>,
    pub technical_indicators: Option<&'a TechnicalIndicators>,
    pub news_items: &'a [NewsItem],
    pub reliability_tier: Option<ReliabilityTier>,
}

impl<'a> From<&'a SourceRecord> for RecordView<'a> {
    fn from(record: &'a SourceRecord) -> Self {
        Self {
            identifier: &record.identifier,
            price_info: record.data.price_info.as_ref(),
            financial_metrics: record.data.financial_metrics.as_ref(),
            technical_indicators: record.data.technical_indicators.as_ref(),
            news_items: record.data.news_items.as_deref().unwrap_or_default(),
            reliability_tier: Some(record.reliability_tier),
        }
    }
}

impl<'a> From<&'a CanonicalRecord> for RecordView<'a> {
    fn from(record: &'a CanonicalRecord) -> Self {
        Self {
            identifier: record.identifier(),
            price_info: Some(record.price_info()),
            financial_metrics: Some(record.financial_metrics()),
            technical_indicators: Some(record.technical_indicators()),
            news_items: record.news_items(),
            reliability_tier: None,
        }
    }
}

/// Stateless record validator
#[derive(Debug, Clone, Copy, Default)]
pub struct Validator;

struct Tally {
    errors: Vec<ValidationIssue>,
    warnings: Vec<ValidationIssue>,
    score: i32,
}

impl Tally {
    fn flag(&mut self, rule: Rule, message: String) {
        self.score -= rule.penalty();
        let issue = ValidationIssue { rule, message };
        if rule.is_error() {
            self.errors.push(issue);
        } else {
            self.warnings.push(issue);
        }
    }
}

fn out_of_range(value: Option<f64>, (min, max): (f64, f64)) -> Option<f64> {
    value.filter(|v| *v < min || *v > max)
}

impl Validator {
    pub fn new() -> Self {
        Self
    }

    pub fn validate_source(&self, record: &SourceRecord) -> ValidationResult {
        self.validate(RecordView::from(record))
    }

    pub fn validate_canonical(&self, record: &CanonicalRecord) -> ValidationResult {
        self.validate(RecordView::from(record))
    }

    /// Score a record; identical input always yields identical output
    pub fn validate(&self, view: RecordView<'_>) -> ValidationResult {
        let mut tally = Tally {
            errors: Vec::new(),
            warnings: Vec::new(),
            score: BASE_SCORE,
        };

        if view.identifier.trim().is_empty() {
            tally.flag(Rule::MissingIdentifier, "identifier is missing".to_string());
        }

        Self::check_price(&mut tally, view.price_info);

        if let Some(metrics) = view.financial_metrics {
            Self::check_financials(&mut tally, metrics);
        }

        if let Some(technicals) = view.technical_indicators {
            if let Some(rsi) = out_of_range(technicals.rsi, RSI_RANGE) {
                tally.flag(Rule::RsiOutOfRange, format!("RSI {rsi} outside [0, 100]"));
            }
        }

        for (idx, item) in view.news_items.iter().enumerate() {
            Self::check_news(&mut tally, idx, item);
        }

        if let Some(tier) = view.reliability_tier {
            tally.score += tier_adjustment(tier);
        }

        ValidationResult {
            is_valid: tally.errors.is_empty(),
            score: tally.score.clamp(0, 100) as u8,
            errors: tally.errors,
            warnings: tally.warnings,
        }
    }

    fn check_price(tally: &mut Tally, price: Option<&PriceInfo>) {
        let Some(price) = price.filter(|p| p.has_any_price()) else {
            tally.flag(Rule::MissingPrice, "no price value present".to_string());
            return;
        };

        if let Some(value) = price.reference_price().filter(|v| *v <= 0.0) {
            tally.flag(Rule::NonPositivePrice, format!("price {value} is not positive"));
        }

        if let Some(change) = price
            .change_percent
            .filter(|c| c.abs() > MAX_DAILY_CHANGE_PERCENT)
        {
            tally.flag(
                Rule::ExtremeDailyChange,
                format!("daily change {change}% exceeds ±{MAX_DAILY_CHANGE_PERCENT}%"),
            );
        }

        if let Some(volume) = price.volume.filter(|v| *v < 0) {
            tally.flag(Rule::NegativeVolume, format!("volume {volume} is negative"));
        }
    }

    fn check_financials(tally: &mut Tally, metrics: &FinancialMetrics) {
        if let Some(per) = out_of_range(metrics.per, PER_RANGE) {
            tally.flag(Rule::PerOutOfRange, format!("PER {per} outside [0, 1000]"));
        }
        if let Some(pbr) = out_of_range(metrics.pbr, PBR_RANGE) {
            tally.flag(Rule::PbrOutOfRange, format!("PBR {pbr} outside [0, 50]"));
        }
        if let Some(roe) = out_of_range(metrics.roe, ROE_RANGE) {
            tally.flag(Rule::RoeOutOfRange, format!("ROE {roe} outside [-100, 100]"));
        }
    }

    fn check_news(tally: &mut Tally, idx: usize, item: &NewsItem) {
        if item.title.trim().chars().count() < MIN_NEWS_TITLE_CHARS {
            tally.flag(
                Rule::ShortNewsTitle,
                format!("news[{idx}] title {:?} is too short", item.title),
            );
        }
        if item.published().is_none() {
            tally.flag(
                Rule::InvalidNewsTimestamp,
                format!("news[{idx}] timestamp {:?} is not ISO-8601", item.published_at),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::Identifier;
    use crate::record::RecordData;

    fn record(data: RecordData, tier: ReliabilityTier) -> SourceRecord {
        let id = Identifier::parse("7203").unwrap();
        SourceRecord::success(&id, "test", data, 80).with_source_metadata(tier, 1)
    }

    fn price(current: f64) -> PriceInfo {
        PriceInfo {
            current: Some(current),
            ..Default::default()
        }
    }

    #[test]
    fn test_clean_record_scores_full() {
        let data = RecordData {
            price_info: Some(price(2500.0)),
            ..Default::default()
        };
        let result = Validator::new().validate_source(&record(data, ReliabilityTier::Medium));

        assert!(result.is_valid);
        assert_eq!(result.score, 100);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_tier_adjustment_is_clamped() {
        let data = RecordData {
            price_info: Some(price(10.0)),
            ..Default::default()
        };
        let v = Validator::new();
        assert_eq!(v.validate_source(&record(data.clone(), ReliabilityTier::High)).score, 100);
        assert_eq!(v.validate_source(&record(data, ReliabilityTier::Low)).score, 90);
    }

    #[test]
    fn test_missing_price_is_an_error() {
        let result =
            Validator::new().validate_source(&record(RecordData::default(), ReliabilityTier::Medium));

        assert!(!result.is_valid);
        assert!(result.lacks_required_leaves());
        assert_eq!(result.score, 80);
    }

    #[test]
    fn test_price_rules() {
        let data = RecordData {
            price_info: Some(PriceInfo {
                current: Some(0.0),
                change_percent: Some(-62.0),
                volume: Some(-1),
                ..Default::default()
            }),
            ..Default::default()
        };
        let result = Validator::new().validate_source(&record(data, ReliabilityTier::Medium));

        assert!(!result.is_valid);
        let rules: Vec<Rule> = result.errors.iter().map(|e| e.rule).collect();
        assert_eq!(rules, vec![Rule::NonPositivePrice, Rule::NegativeVolume]);
        assert_eq!(result.warnings[0].rule, Rule::ExtremeDailyChange);
        assert_eq!(result.score, 100 - 30 - 10 - 15);
    }

    #[test]
    fn test_metric_ranges_are_warnings() {
        let data = RecordData {
            price_info: Some(price(100.0)),
            financial_metrics: Some(FinancialMetrics {
                per: Some(1200.0),
                pbr: Some(-1.0),
                roe: Some(150.0),
                ..Default::default()
            }),
            technical_indicators: Some(TechnicalIndicators {
                rsi: Some(101.0),
                ..Default::default()
            }),
            ..Default::default()
        };
        let result = Validator::new().validate_source(&record(data, ReliabilityTier::Medium));

        assert!(result.is_valid);
        assert_eq!(result.warnings.len(), 4);
        assert_eq!(result.score, 80);
    }

    #[test]
    fn test_news_rules_apply_per_item() {
        let data = RecordData {
            price_info: Some(price(100.0)),
            news_items: Some(vec![
                NewsItem::new("Q3", "2024-05-01T00:00:00Z"),
                NewsItem::new("Guidance raised", "yesterday"),
                NewsItem::new("Hi", "soon"),
            ]),
            ..Default::default()
        };
        let result = Validator::new().validate_source(&record(data, ReliabilityTier::Medium));

        assert!(result.is_valid);
        assert_eq!(result.warnings.len(), 4);
        assert_eq!(result.score, 100 - 2 - 3 - 2 - 3);
    }

    #[test]
    fn test_score_floor() {
        let news: Vec<NewsItem> = (0..40).map(|_| NewsItem::new("x", "bad")).collect();
        let data = RecordData {
            news_items: Some(news),
            ..Default::default()
        };
        let result = Validator::new().validate_source(&record(data, ReliabilityTier::Low));
        assert_eq!(result.score, 0);
    }

    #[test]
    fn test_validation_is_pure() {
        let canonical = CanonicalRecord::empty("AAPL");
        let v = Validator::new();
        let first = v.validate_canonical(&canonical);
        let second = v.validate_canonical(&canonical);
        assert_eq!(first, second);
        assert!(first.lacks_required_leaves());
    }
}
