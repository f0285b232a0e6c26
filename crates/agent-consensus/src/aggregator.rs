//! Field-group-wise merge of source records into one canonical record

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use crate::error::ConsensusError;
use crate::identifier::Identifier;
use crate::quorum::Quorum;
use crate::record::{CanonicalRecord, FieldGroup, NewsItem, RecordData, ReliabilityTier, SourceRecord};
use crate::validator::{ValidationResult, Validator};

pub const DEFAULT_MAX_NEWS_ITEMS: usize = 5;
const RECORD_BONUS_PER_SOURCE: u32 = 5;
const RECORD_BONUS_CAP: u32 = 20;

/// How one field group is chosen among the records that carry it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    /// Highest collector confidence plus validation score; ties go to the
    /// higher reliability tier, then to the first record seen
    BestScore,
    /// Lowest collector priority value; ties go to the first record seen
    HighestPriority,
    /// Union of every record. News is de-duplicated, newest first and
    /// truncated; other groups are filled leaf by leaf in best-score order.
    MergeAll,
}

/// The single table deciding how every field group is merged
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionPolicy {
    strategies: BTreeMap<FieldGroup, SelectionStrategy>,
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        Self::uniform(SelectionStrategy::BestScore)
            .with(FieldGroup::NewsItems, SelectionStrategy::MergeAll)
    }
}

impl SelectionPolicy {
    pub fn uniform(strategy: SelectionStrategy) -> Self {
        Self {
            strategies: FieldGroup::ALL.iter().map(|g| (*g, strategy)).collect(),
        }
    }

    pub fn with(mut self, group: FieldGroup, strategy: SelectionStrategy) -> Self {
        self.strategies.insert(group, strategy);
        self
    }

    pub fn strategy(&self, group: FieldGroup) -> SelectionStrategy {
        self.strategies
            .get(&group)
            .copied()
            .unwrap_or(SelectionStrategy::BestScore)
    }
}

/// Ranking input for one record carrying a group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    /// Position of the record in the aggregator's input
    pub index: usize,
    pub confidence: u8,
    pub score: u8,
    pub tier: ReliabilityTier,
}

impl Candidate {
    fn total(&self) -> u16 {
        u16::from(self.confidence) + u16::from(self.score)
    }
}

fn best_score_order(a: &Candidate, b: &Candidate) -> std::cmp::Ordering {
    b.total()
        .cmp(&a.total())
        .then(b.tier.cmp(&a.tier))
        .then(a.index.cmp(&b.index))
}

/// Index of the record maximising confidence + validation score
pub fn select_best(candidates: &[Candidate]) -> Option<usize> {
    candidates
        .iter()
        .min_by(|a, b| best_score_order(a, b))
        .map(|c| c.index)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregationResult {
    pub success: bool,
    pub canonical_record: Arc<CanonicalRecord>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub sources_used: Vec<String>,
    pub confidence: u8,
    /// Validator verdict on the merged record
    pub validation: ValidationResult,
    usable: bool,
}

impl AggregationResult {
    fn failed(identifier: &Identifier, errors: Vec<String>, warnings: Vec<String>) -> Self {
        let canonical = CanonicalRecord::empty(identifier.as_str());
        let validation = Validator::new().validate_canonical(&canonical);
        Self {
            success: false,
            canonical_record: Arc::new(canonical),
            errors,
            warnings,
            sources_used: Vec::new(),
            confidence: 0,
            validation,
            usable: false,
        }
    }

    /// Whether the merged record can be handed to the consensus step
    pub fn is_usable(&self) -> bool {
        self.usable
    }

    /// The error a caller should see when the record is not usable
    pub fn failure(&self) -> Option<ConsensusError> {
        if self.usable {
            return None;
        }
        let reason = if self.errors.is_empty() {
            "no usable source record".to_string()
        } else {
            self.errors.join("; ")
        };
        Some(ConsensusError::AggregationFailure(reason))
    }

    /// Rule violations on a record that is still usable
    pub fn degradation(&self) -> Option<ConsensusError> {
        (self.usable && !self.errors.is_empty())
            .then(|| ConsensusError::ValidationDegradation(self.errors.join("; ")))
    }
}

/// Merges the successful records of one fan-out
#[derive(Debug, Clone)]
pub struct Aggregator {
    validator: Validator,
    policy: SelectionPolicy,
    max_news_items: usize,
    quorum: Quorum,
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new()
    }
}

/// Working state for one `aggregate` call
struct Merge<'a> {
    records: Vec<&'a SourceRecord>,
    scores: Vec<u8>,
    contributors: HashSet<usize>,
}

impl<'a> Merge<'a> {
    fn candidates(&self, group: FieldGroup) -> Vec<Candidate> {
        self.records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.has_group(group))
            .map(|(index, r)| Candidate {
                index,
                confidence: r.confidence,
                score: self.scores[index],
                tier: r.reliability_tier,
            })
            .collect()
    }

    fn pick(&self, group: FieldGroup, strategy: SelectionStrategy) -> Option<usize> {
        let candidates = self.candidates(group);
        match strategy {
            SelectionStrategy::HighestPriority => candidates
                .iter()
                .min_by_key(|c| (self.records[c.index].priority, c.index))
                .map(|c| c.index),
            SelectionStrategy::BestScore | SelectionStrategy::MergeAll => select_best(&candidates),
        }
    }

    /// Choose or coalesce one singular group
    fn singular<T, F>(&mut self, group: FieldGroup, strategy: SelectionStrategy, get: F) -> Option<T>
    where
        T: Clone + Serialize + DeserializeOwned,
        F: Fn(&RecordData) -> Option<&T>,
    {
        if strategy != SelectionStrategy::MergeAll {
            let index = self.pick(group, strategy)?;
            self.contributors.insert(index);
            return get(&self.records[index].data).cloned();
        }

        let mut ranked = self.candidates(group);
        ranked.sort_by(best_score_order);

        let mut merged = serde_json::Map::new();
        for candidate in ranked {
            let Some(group_value) = get(&self.records[candidate.index].data) else {
                continue;
            };
            let Ok(Value::Object(leaves)) = serde_json::to_value(group_value) else {
                continue;
            };
            for (leaf, value) in leaves {
                let slot = merged.entry(leaf).or_insert(Value::Null);
                if slot.is_null() && !value.is_null() {
                    *slot = value;
                    self.contributors.insert(candidate.index);
                }
            }
        }

        if merged.is_empty() {
            return None;
        }
        serde_json::from_value(Value::Object(merged)).ok()
    }

    fn news(&mut self, strategy: SelectionStrategy, limit: usize) -> Option<Vec<NewsItem>> {
        if strategy != SelectionStrategy::MergeAll {
            let index = self.pick(FieldGroup::NewsItems, strategy)?;
            let mut items = self.records[index].data.news_items.clone().unwrap_or_default();
            items.truncate(limit);
            self.contributors.insert(index);
            return Some(items);
        }

        let mut seen = HashSet::new();
        let mut items: Vec<(usize, NewsItem)> = self
            .records
            .iter()
            .enumerate()
            .flat_map(|(index, r)| {
                r.data
                    .news_items
                    .iter()
                    .flatten()
                    .map(move |item| (index, item))
            })
            .filter(|(_, item)| seen.insert(item.dedup_key()))
            .map(|(index, item)| (index, item.clone()))
            .collect();

        if items.is_empty() {
            return None;
        }

        // newest first, unparseable timestamps last, stable otherwise
        items.sort_by_key(|(_, item)| std::cmp::Reverse(item.published()));
        items.truncate(limit);

        self.contributors.extend(items.iter().map(|(index, _)| *index));
        Some(items.into_iter().map(|(_, item)| item).collect())
    }

    fn source_of(&self, group: FieldGroup, strategy: SelectionStrategy) -> Vec<String> {
        match strategy {
            SelectionStrategy::MergeAll => self
                .records
                .iter()
                .enumerate()
                .filter(|(i, r)| self.contributors.contains(i) && r.has_group(group))
                .map(|(_, r)| r.source_name.clone())
                .collect(),
            _ => self
                .pick(group, strategy)
                .map(|i| vec![self.records[i].source_name.clone()])
                .unwrap_or_default(),
        }
    }
}

impl Aggregator {
    pub fn new() -> Self {
        Self {
            validator: Validator::new(),
            policy: SelectionPolicy::default(),
            max_news_items: DEFAULT_MAX_NEWS_ITEMS,
            quorum: Quorum::at_least(1, 1),
        }
    }

    pub fn with_policy(mut self, policy: SelectionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_max_news_items(mut self, max_news_items: usize) -> Self {
        self.max_news_items = max_news_items;
        self
    }

    pub fn with_quorum(mut self, quorum: Quorum) -> Self {
        self.quorum = quorum;
        self
    }

    pub fn policy(&self) -> &SelectionPolicy {
        &self.policy
    }

    pub fn aggregate(&self, records: &[SourceRecord], identifier: &Identifier) -> AggregationResult {
        let mut warnings = Vec::new();
        let mut successful = Vec::new();

        for record in records {
            if !record.success {
                let reason = if record.errors.is_empty() {
                    "unknown error".to_string()
                } else {
                    record.errors.join("; ")
                };
                let unavailable = ConsensusError::SourceUnavailable {
                    source_name: record.source_name.clone(),
                    reason,
                };
                warnings.push(unavailable.to_string());
            } else if record.identifier != identifier.as_str() {
                warnings.push(format!(
                    "Source {} returned data for {}, expected {}",
                    record.source_name, record.identifier, identifier
                ));
            } else {
                successful.push(record);
            }
        }

        if successful.is_empty() {
            tracing::warn!(%identifier, "no collector succeeded");
            return AggregationResult::failed(
                identifier,
                vec!["no collector returned a successful record".to_string()],
                warnings,
            );
        }

        if !self.quorum.is_met(successful.len()) {
            tracing::warn!(%identifier, quorum = %self.quorum, successes = successful.len(), "collector quorum not met");
            return AggregationResult::failed(
                identifier,
                vec![format!(
                    "collector quorum {} not met: {} succeeded",
                    self.quorum,
                    successful.len()
                )],
                warnings,
            );
        }

        let scores = successful
            .iter()
            .map(|record| {
                let verdict = self.validator.validate_source(record);
                for issue in &verdict.errors {
                    warnings.push(format!("{}: {issue}", record.source_name));
                }
                verdict.score
            })
            .collect();

        let mut merge = Merge {
            records: successful,
            scores,
            contributors: HashSet::new(),
        };

        let data = RecordData {
            price_info: merge.singular(
                FieldGroup::PriceInfo,
                self.policy.strategy(FieldGroup::PriceInfo),
                |d| d.price_info.as_ref(),
            ),
            financial_metrics: merge.singular(
                FieldGroup::FinancialMetrics,
                self.policy.strategy(FieldGroup::FinancialMetrics),
                |d| d.financial_metrics.as_ref(),
            ),
            technical_indicators: merge.singular(
                FieldGroup::TechnicalIndicators,
                self.policy.strategy(FieldGroup::TechnicalIndicators),
                |d| d.technical_indicators.as_ref(),
            ),
            news_items: merge.news(
                self.policy.strategy(FieldGroup::NewsItems),
                self.max_news_items,
            ),
            sentiment_summary: merge.singular(
                FieldGroup::SentimentSummary,
                self.policy.strategy(FieldGroup::SentimentSummary),
                |d| d.sentiment_summary.as_ref(),
            ),
        };

        let mut sources_used: Vec<String> = Vec::new();
        for group in FieldGroup::ALL {
            if !data.has_group(group) {
                continue;
            }
            for source in merge.source_of(group, self.policy.strategy(group)) {
                if !sources_used.contains(&source) {
                    sources_used.push(source);
                }
            }
        }

        let canonical = CanonicalRecord::assemble(identifier.as_str(), data, sources_used.clone(), 0);
        let validation = self.validator.validate_canonical(&canonical);

        let contributing: Vec<u32> = merge
            .records
            .iter()
            .enumerate()
            .filter(|(i, _)| merge.contributors.contains(i))
            .map(|(_, r)| u32::from(r.confidence))
            .collect();
        let confidence = merge_confidence(&contributing, validation.score, merge.records.len());

        let errors: Vec<String> = validation.error_messages().collect();
        warnings.extend(validation.warning_messages());
        let usable = !validation.lacks_required_leaves();

        tracing::info!(
            %identifier,
            sources = ?sources_used,
            confidence,
            score = validation.score,
            usable,
            "aggregation complete"
        );

        AggregationResult {
            success: errors.is_empty(),
            canonical_record: Arc::new(canonical.with_merge_confidence(confidence)),
            errors,
            warnings,
            sources_used,
            confidence,
            validation,
            usable,
        }
    }
}

/// `round((mean(confidences) + score) / 2 + min(5 * records, 20))`, clamped to 0..=100
pub fn merge_confidence(confidences: &[u32], score: u8, record_count: usize) -> u8 {
    let mean = if confidences.is_empty() {
        0.0
    } else {
        f64::from(confidences.iter().sum::<u32>()) / confidences.len() as f64
    };
    let count = u32::try_from(record_count).unwrap_or(u32::MAX);
    let bonus = RECORD_BONUS_PER_SOURCE.saturating_mul(count).min(RECORD_BONUS_CAP);
    let raw = ((mean + f64::from(score)) / 2.0 + f64::from(bonus)).round();
    raw.clamp(0.0, 100.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{FinancialMetrics, PriceInfo, SentimentSummary, TechnicalIndicators};

    fn id() -> Identifier {
        Identifier::parse("AAPL").unwrap()
    }

    fn price(current: f64) -> PriceInfo {
        PriceInfo {
            current: Some(current),
            ..Default::default()
        }
    }

    fn record(source: &str, confidence: u8, data: RecordData) -> SourceRecord {
        SourceRecord::success(&id(), source, data, confidence)
            .with_source_metadata(ReliabilityTier::Medium, 1)
    }

    #[test]
    fn test_all_failures_yield_null_shaped_record() {
        let records = vec![
            SourceRecord::failure(&id(), "yahoo", "HTTP 503"),
            SourceRecord::failure(&id(), "alpha_vantage", "rate limited"),
        ];
        let result = Aggregator::new().aggregate(&records, &id());

        assert!(!result.success);
        assert!(!result.is_usable());
        assert_eq!(result.confidence, 0);
        assert_eq!(result.warnings.len(), 2);
        assert!(result.warnings[0].contains("yahoo"));
        assert!(matches!(result.failure(), Some(ConsensusError::AggregationFailure(_))));

        let json: Value = serde_json::from_str(&result.canonical_record.to_json().unwrap()).unwrap();
        for leaf in ["current", "open", "high", "low", "previousClose", "volume"] {
            assert!(json["priceInfo"].as_object().unwrap().contains_key(leaf));
            assert!(json["priceInfo"][leaf].is_null());
        }
        assert!(json["technicalIndicators"]["rsi"].is_null());
        assert_eq!(json["newsItems"], Value::Array(vec![]));
    }

    #[test]
    fn test_select_best_breaks_ties_by_tier_then_order() {
        let c = |index, confidence, score| Candidate {
            index,
            confidence,
            score,
            tier: ReliabilityTier::Medium,
        };
        assert_eq!(select_best(&[c(0, 60, 80), c(1, 90, 70), c(2, 70, 90)]), Some(1));

        let mut high = c(2, 70, 90);
        high.tier = ReliabilityTier::High;
        assert_eq!(select_best(&[c(0, 60, 80), c(1, 90, 70), high]), Some(2));
        assert_eq!(select_best(&[]), None);
    }

    #[test]
    fn test_price_choice_is_independent_per_group() {
        // validation scores 80 / 70 / 90 from range warnings
        let alpha = record(
            "alpha",
            60,
            RecordData {
                price_info: Some(price(10.0)),
                financial_metrics: Some(FinancialMetrics {
                    per: Some(5000.0),
                    pbr: Some(99.0),
                    roe: Some(400.0),
                    ..Default::default()
                }),
                technical_indicators: Some(TechnicalIndicators {
                    rsi: Some(150.0),
                    ..Default::default()
                }),
                ..Default::default()
            },
        );
        let beta = record(
            "beta",
            90,
            RecordData {
                price_info: Some(PriceInfo {
                    change_percent: Some(60.0),
                    ..price(20.0)
                }),
                financial_metrics: Some(FinancialMetrics {
                    per: Some(-1.0),
                    pbr: Some(-1.0),
                    roe: Some(-200.0),
                    ..Default::default()
                }),
                technical_indicators: Some(TechnicalIndicators {
                    rsi: Some(-3.0),
                    ..Default::default()
                }),
                ..Default::default()
            },
        );
        let gamma = record(
            "gamma",
            70,
            RecordData {
                price_info: Some(PriceInfo {
                    change_percent: Some(-55.0),
                    ..price(30.0)
                }),
                sentiment_summary: Some(SentimentSummary {
                    score: Some(0.4),
                    ..Default::default()
                }),
                ..Default::default()
            },
        );

        let validator = Validator::new();
        let scores: Vec<u8> = [&alpha, &beta, &gamma]
            .iter()
            .map(|r| validator.validate_source(r).score)
            .collect();
        assert_eq!(scores, vec![80, 70, 90]);

        let result = Aggregator::new().aggregate(&[alpha, beta, gamma], &id());
        let canonical = &result.canonical_record;

        assert_eq!(canonical.price_info().current, Some(20.0));
        assert_eq!(canonical.sentiment_summary().score, Some(0.4));
        assert_eq!(result.sources_used, vec!["beta", "gamma"]);
        assert!(result.is_usable());
    }

    #[test]
    fn test_news_is_deduplicated_sorted_and_capped() {
        let item = |title: &str, at: &str| NewsItem::new(title, at);
        let first = record(
            "yahoo",
            80,
            RecordData {
                price_info: Some(price(100.0)),
                news_items: Some(vec![
                    item("Q3 Results Strong", "2024-05-01T00:00:00Z"),
                    item("Guidance raised", "2024-05-03T00:00:00Z"),
                    item("Undated rumour", "last tuesday"),
                ]),
                ..Default::default()
            },
        );
        let second = record(
            "alpha_vantage",
            70,
            RecordData {
                news_items: Some(vec![
                    item("q3 results strong ", "2024-05-02T00:00:00Z"),
                    item("New product line", "2024-05-04T00:00:00Z"),
                    item("CEO interview", "2024-04-20"),
                    item("Buyback announced", "2024-04-30T12:00:00Z"),
                ]),
                ..Default::default()
            },
        );

        let result = Aggregator::new().aggregate(&[first, second], &id());
        let titles: Vec<&str> = result
            .canonical_record
            .news_items()
            .iter()
            .map(|n| n.title.as_str())
            .collect();

        assert_eq!(
            titles,
            vec![
                "New product line",
                "Guidance raised",
                "Q3 Results Strong",
                "Buyback announced",
                "CEO interview",
            ]
        );
        assert_eq!(result.sources_used, vec!["yahoo", "alpha_vantage"]);
    }

    #[test]
    fn test_confidence_formula() {
        let only = record("yahoo", 80, RecordData {
            price_info: Some(price(100.0)),
            ..Default::default()
        });
        let result = Aggregator::new().aggregate(&[only], &id());

        // canonical score 100: (80 + 100) / 2 + 5
        assert_eq!(result.validation.score, 100);
        assert_eq!(result.confidence, 95);
        assert_eq!(result.canonical_record.merge_confidence(), 95);
        assert!(result.success);

        assert_eq!(merge_confidence(&[100, 100, 100, 100, 100], 100, 5), 100);
        assert_eq!(merge_confidence(&[], 0, 0), 0);
        assert_eq!(merge_confidence(&[55], 70, 1), 68);
    }

    #[test]
    fn test_missing_price_is_unusable() {
        let news_only = record("news", 90, RecordData {
            sentiment_summary: Some(SentimentSummary {
                score: Some(0.1),
                ..Default::default()
            }),
            ..Default::default()
        });
        let result = Aggregator::new().aggregate(&[news_only], &id());

        assert!(!result.success);
        assert!(!result.is_usable());
        assert!(result.validation.lacks_required_leaves());
        assert!(result.degradation().is_none());
    }

    #[test]
    fn test_usable_record_with_rule_errors_is_degraded() {
        let negative = record("yahoo", 80, RecordData {
            price_info: Some(PriceInfo {
                volume: Some(-5),
                ..price(100.0)
            }),
            ..Default::default()
        });
        let result = Aggregator::new().aggregate(&[negative], &id());

        assert!(!result.success);
        assert!(result.is_usable());
        assert!(matches!(
            result.degradation(),
            Some(ConsensusError::ValidationDegradation(_))
        ));
    }

    #[test]
    fn test_quorum_and_identifier_mismatch() {
        let good = record("yahoo", 80, RecordData {
            price_info: Some(price(100.0)),
            ..Default::default()
        });
        let other = SourceRecord::success(
            &Identifier::parse("MSFT").unwrap(),
            "stale",
            RecordData {
                price_info: Some(price(1.0)),
                ..Default::default()
            },
            99,
        );

        let aggregator = Aggregator::new().with_quorum(Quorum::at_least(2, 2));
        let result = aggregator.aggregate(&[good.clone(), other], &id());
        assert!(!result.is_usable());
        assert!(result.errors[0].contains("quorum 2-of-2"));
        assert!(result.warnings.iter().any(|w| w.contains("MSFT")));

        let relaxed = Aggregator::new().aggregate(&[good], &id());
        assert!(relaxed.is_usable());
    }

    #[test]
    fn test_highest_priority_and_leafwise_merge() {
        let primary = record("primary", 10, RecordData {
            price_info: Some(PriceInfo {
                current: Some(100.0),
                ..Default::default()
            }),
            ..Default::default()
        })
        .with_source_metadata(ReliabilityTier::Low, 1);
        let secondary = record("secondary", 95, RecordData {
            price_info: Some(PriceInfo {
                current: Some(101.0),
                volume: Some(1_000),
                ..Default::default()
            }),
            ..Default::default()
        })
        .with_source_metadata(ReliabilityTier::High, 2);

        let by_priority = Aggregator::new().with_policy(
            SelectionPolicy::default().with(FieldGroup::PriceInfo, SelectionStrategy::HighestPriority),
        );
        let result = by_priority.aggregate(&[secondary.clone(), primary.clone()], &id());
        assert_eq!(result.canonical_record.price_info().current, Some(100.0));
        assert_eq!(result.canonical_record.price_info().volume, None);

        let merged = Aggregator::new().with_policy(
            SelectionPolicy::uniform(SelectionStrategy::MergeAll),
        );
        let mut sparse = primary;
        sparse.confidence = 100;
        sparse.data.price_info = Some(PriceInfo {
            current: Some(99.0),
            ..Default::default()
        });
        let result = merged.aggregate(&[sparse, secondary], &id());
        let price = result.canonical_record.price_info();
        assert_eq!(price.current, Some(101.0));
        assert_eq!(price.volume, Some(1_000));
        assert_eq!(result.sources_used, vec!["secondary"]);
    }
}
