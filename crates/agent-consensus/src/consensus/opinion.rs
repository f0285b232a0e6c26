//! Turning an agent's reply into a normalised opinion
//!
//! Agents are asked for a structured JSON payload. When a field is not in the
//! payload, an ordered list of prose rules is tried and the first match wins.
//! Every value records which path produced it, and a field that neither path
//! found stays [`Extracted::Missing`] instead of defaulting to zero.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::error::{ConsensusError, Result};
use crate::payload::extract_json_object;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Recommendation {
    Buy,
    Sell,
    Hold,
}

impl Recommendation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
            Self::Hold => "hold",
        }
    }
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Recommendation {
    type Err = ConsensusError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "buy" => Ok(Self::Buy),
            "sell" => Ok(Self::Sell),
            "hold" => Ok(Self::Hold),
            other => Err(ConsensusError::agent_failure(
                "unknown",
                format!("recommendation '{other}' is not buy, sell or hold"),
            )),
        }
    }
}

/// The three fixed opinion roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    Technical,
    Fundamental,
    Sentiment,
}

impl AgentRole {
    pub const ALL: [AgentRole; 3] = [Self::Technical, Self::Fundamental, Self::Sentiment];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Technical => "technical",
            Self::Fundamental => "fundamental",
            Self::Sentiment => "sentiment",
        }
    }

    pub fn domain_label(&self) -> &'static str {
        match self {
            Self::Technical => "Technical Analysis",
            Self::Fundamental => "Fundamental Analysis",
            Self::Sentiment => "News Sentiment",
        }
    }

    /// The one-line request sent ahead of the serialised record
    pub fn instruction(&self) -> &'static str {
        match self {
            Self::Technical => {
                "As a technical analyst, judge the record below from its price action and indicators."
            }
            Self::Fundamental => {
                "As a fundamental analyst, judge the record below from its valuation and profitability."
            }
            Self::Sentiment => {
                "As a news sentiment analyst, judge the record below from its headlines and sentiment."
            }
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A value together with the path that produced it
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum Extracted<T> {
    /// Read from the structured payload
    Parsed(T),
    /// Recovered from prose by a fallback rule
    FallbackParsed(T),
    #[default]
    Missing,
}

impl<T> Extracted<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Parsed(v) | Self::FallbackParsed(v) => Some(v),
            Self::Missing => None,
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            Self::Parsed(v) | Self::FallbackParsed(v) => Some(v),
            Self::Missing => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::FallbackParsed(_))
    }

    /// Keep `self` unless it is missing
    pub fn or_else(self, f: impl FnOnce() -> Self) -> Self {
        match self {
            Self::Missing => f(),
            found => found,
        }
    }
}

/// One agent's unprocessed reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawOpinion {
    pub role: AgentRole,
    pub agent_name: String,
    pub text: String,
}

impl RawOpinion {
    pub fn new(role: AgentRole, agent_name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            role,
            agent_name: agent_name.into(),
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentOpinion {
    pub agent_name: String,
    pub role: AgentRole,
    pub domain_label: String,
    pub recommendation: Extracted<Recommendation>,
    /// 0.0 to 1.0
    pub confidence: Extracted<f64>,
    pub target_price_low: Extracted<f64>,
    pub target_price_high: Extracted<f64>,
    pub risks: Vec<String>,
    pub rationale: Option<String>,
}

impl AgentOpinion {
    /// Recommendation of a normalised opinion; normalisation rejects missing ones
    pub fn vote(&self) -> Option<Recommendation> {
        self.recommendation.value().copied()
    }

    pub fn confidence_value(&self) -> Option<f64> {
        self.confidence.value().copied()
    }

    pub fn has_target_range(&self) -> bool {
        !self.target_price_low.is_missing() && !self.target_price_high.is_missing()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Recommendation,
    Confidence,
    TargetRange,
    Risks,
}

struct FallbackRule {
    field: Field,
    pattern: Regex,
}

/// Ordered prose rules; earlier rules win for the same field
const FALLBACK_RULES: &[(Field, &str)] = &[
    (
        Field::Recommendation,
        r"(?i)\b(?:recommendation|rating|decision|verdict|signal)\b\s*(?:is)?\s*[:=\-]?\s*\**\s*(?P<rec>buy|sell|hold)\b",
    ),
    // a match carrying `neg` is a negated mention and never counts
    (
        Field::Recommendation,
        r"(?i)\b(?P<neg>(?:not|never|avoid|\w*n['’]t)\s+)?(?P<rec>buy|sell|hold)\b",
    ),
    (
        Field::Confidence,
        r"(?i)\bconfidence\b(?:\s+(?:level|score))?\s*(?:is|of)?\s*[:=\-]?\s*\**\s*(\d{1,3}(?:\.\d+)?)\b\s*%?",
    ),
    (Field::Confidence, r"(?i)\b(\d{1,3}(?:\.\d+)?)\s*%\s*confiden"),
    (
        Field::TargetRange,
        r"(?i)\btarget(?:\s+price)?(?:\s+range)?\s*(?:is|of)?\s*[:=\-]?\s*\$?\s*(\d+(?:\.\d+)?)\s*(?:-|–|to)\s*\$?\s*(\d+(?:\.\d+)?)",
    ),
    (Field::Risks, r"(?im)^\s*[*\-]?\s*risks?\s*[:\-]\s*(.+)$"),
];

/// Normalises raw agent replies; compiled once and shared
pub struct OpinionNormalizer {
    rules: Vec<FallbackRule>,
}

impl fmt::Debug for OpinionNormalizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpinionNormalizer")
            .field("rules", &self.rules.len())
            .finish()
    }
}

fn number(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

fn lookup<'a>(payload: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .find_map(|k| payload.get(*k))
        .filter(|v| !v.is_null())
}

/// 0-100 agent scale to 0-1
fn scale_confidence(raw: f64) -> f64 {
    raw.clamp(0.0, 100.0) / 100.0
}

impl OpinionNormalizer {
    pub fn new() -> Result<Self> {
        let rules = FALLBACK_RULES
            .iter()
            .map(|(field, pattern)| {
                Regex::new(pattern)
                    .map(|pattern| FallbackRule {
                        field: *field,
                        pattern,
                    })
                    .map_err(|e| ConsensusError::ConfigurationError(format!("fallback rule: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    fn first_match<'t>(&self, field: Field, text: &'t str) -> Option<regex::Captures<'t>> {
        self.rules
            .iter()
            .filter(|rule| rule.field == field)
            .find_map(|rule| {
                rule.pattern
                    .captures_iter(text)
                    .find(|caps| caps.name("neg").is_none())
            })
    }

    /// Normalise one reply; a missing recommendation or confidence is an
    /// [`ConsensusError::AgentFailure`]
    pub fn normalize(&self, raw: &RawOpinion) -> Result<AgentOpinion> {
        let fail = |reason: String| ConsensusError::agent_failure(&raw.agent_name, reason);
        let payload = extract_json_object(&raw.text).unwrap_or_default();

        let recommendation = match lookup(&payload, &["recommendation", "rating", "decision"]) {
            Some(Value::String(token)) => token
                .parse::<Recommendation>()
                .map(Extracted::Parsed)
                .map_err(|_| fail(format!("recommendation '{token}' is not buy, sell or hold")))?,
            Some(other) => return Err(fail(format!("recommendation {other} is not a string"))),
            None => Extracted::Missing,
        }
        .or_else(|| {
            self.first_match(Field::Recommendation, &raw.text)
                .and_then(|caps| caps["rec"].parse().ok())
                .map_or(Extracted::Missing, Extracted::FallbackParsed)
        });

        let confidence = lookup(&payload, &["confidence", "confidence_score"])
            .and_then(number)
            .map_or(Extracted::Missing, |c| Extracted::Parsed(scale_confidence(c)))
            .or_else(|| {
                self.first_match(Field::Confidence, &raw.text)
                    .and_then(|caps| caps[1].parse::<f64>().ok())
                    .map_or(Extracted::Missing, |c| {
                        Extracted::FallbackParsed(scale_confidence(c))
                    })
            });

        if recommendation.is_missing() {
            return Err(fail("no recommendation found".to_string()));
        }
        if confidence.is_missing() {
            return Err(fail("no confidence found".to_string()));
        }

        let mut target_price_low = lookup(&payload, &["target_price_low", "targetPriceLow"])
            .and_then(number)
            .map_or(Extracted::Missing, Extracted::Parsed);
        let mut target_price_high = lookup(&payload, &["target_price_high", "targetPriceHigh"])
            .and_then(number)
            .map_or(Extracted::Missing, Extracted::Parsed);

        if target_price_low.is_missing() && target_price_high.is_missing() {
            if let Some(caps) = self.first_match(Field::TargetRange, &raw.text) {
                let low = caps[1].parse::<f64>().ok();
                let high = caps[2].parse::<f64>().ok();
                if let (Some(low), Some(high)) = (low, high) {
                    target_price_low = Extracted::FallbackParsed(low.min(high));
                    target_price_high = Extracted::FallbackParsed(low.max(high));
                }
            }
        }

        let risks = match lookup(&payload, &["risks"]) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            Some(Value::String(line)) => split_list(line),
            _ => self
                .first_match(Field::Risks, &raw.text)
                .map(|caps| split_list(&caps[1]))
                .unwrap_or_default(),
        };

        let rationale = lookup(&payload, &["rationale", "reasoning"])
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| {
                let text = raw.text.trim();
                (payload.is_empty() && !text.is_empty()).then(|| text.to_string())
            });

        Ok(AgentOpinion {
            agent_name: raw.agent_name.clone(),
            role: raw.role,
            domain_label: raw.role.domain_label().to_string(),
            recommendation,
            confidence,
            target_price_low,
            target_price_high,
            risks,
            rationale,
        })
    }
}

fn split_list(line: &str) -> Vec<String> {
    line.split([',', ';'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Normalise a single reply with a freshly compiled rule set
pub fn normalize(raw: &RawOpinion) -> Result<AgentOpinion> {
    OpinionNormalizer::new()?.normalize(raw)
}
