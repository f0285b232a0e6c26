//! Rule-based opinion agents
//!
//! Each analyst reads the serialised canonical record from its input and
//! answers with the structured opinion payload. They stand in for model-backed
//! agents when none is configured.

use agent_core::{Agent, Context, Error, Result};
use async_trait::async_trait;
use serde_json::json;

use crate::payload::extract_json_object;
use crate::record::CanonicalRecord;

const BASE_CONFIDENCE: f64 = 50.0;
const CONFIDENCE_SPREAD: f64 = 40.0;

fn read_record(input: &str) -> Result<CanonicalRecord> {
    let payload = extract_json_object(input)
        .ok_or_else(|| Error::InvalidOutput("input carries no record".to_string()))?;
    serde_json::from_value(serde_json::Value::Object(payload))
        .map_err(|e| Error::InvalidOutput(format!("input is not a canonical record: {e}")))
}

/// Net bullish/bearish signal count
#[derive(Debug, Default)]
struct Signals {
    score: i32,
    count: u32,
    notes: Vec<String>,
    risks: Vec<String>,
}

impl Signals {
    fn bullish(&mut self, note: String) {
        self.score += 1;
        self.count += 1;
        self.notes.push(note);
    }

    fn bearish(&mut self, note: String) {
        self.score -= 1;
        self.count += 1;
        self.risks.push(note.clone());
        self.notes.push(note);
    }

    fn neutral(&mut self, note: String) {
        self.count += 1;
        self.notes.push(note);
    }

    fn opinion(self, target: Option<(f64, f64)>) -> Result<String> {
        if self.count == 0 {
            return Err(Error::ProcessingFailed("no usable inputs in record".to_string()));
        }

        let recommendation = match self.score {
            s if s > 0 => "buy",
            s if s < 0 => "sell",
            _ => "hold",
        };
        let strength = f64::from(self.score.unsigned_abs()) / f64::from(self.count);
        let confidence = (BASE_CONFIDENCE + CONFIDENCE_SPREAD * strength).round();
        let (low, high) = target.unzip();

        Ok(json!({
            "recommendation": recommendation,
            "confidence": confidence,
            "target_price_low": low,
            "target_price_high": high,
            "risks": self.risks,
            "rationale": self.notes.join("; "),
        })
        .to_string())
    }
}

/// Reads RSI, MACD, moving averages and Bollinger bands
#[derive(Debug, Default, Clone)]
pub struct TechnicalAnalyst;

impl TechnicalAnalyst {
    pub fn assess(record: &CanonicalRecord) -> Result<String> {
        let tech = record.technical_indicators();
        let price = record.price_info().reference_price();
        let mut signals = Signals::default();

        match tech.rsi {
            Some(rsi) if rsi < 30.0 => signals.bullish(format!("RSI {rsi:.1} oversold")),
            Some(rsi) if rsi > 70.0 => signals.bearish(format!("RSI {rsi:.1} overbought")),
            Some(rsi) => signals.neutral(format!("RSI {rsi:.1} neutral")),
            None => {}
        }

        if let (Some(macd), Some(signal)) = (tech.macd, tech.macd_signal) {
            if macd > signal {
                signals.bullish("MACD above signal line".to_string());
            } else {
                signals.bearish("MACD below signal line".to_string());
            }
        }

        if let (Some(price), Some(sma)) = (price, tech.sma_50) {
            if price >= sma {
                signals.bullish(format!("price above 50-day SMA {sma:.2}"));
            } else {
                signals.bearish(format!("price below 50-day SMA {sma:.2}"));
            }
        }

        let bands = tech.bollinger_lower.zip(tech.bollinger_upper);
        if let (Some(price), Some((lower, upper))) = (price, bands) {
            if price < lower {
                signals.bullish("price below lower Bollinger band".to_string());
            } else if price > upper {
                signals.bearish("price above upper Bollinger band".to_string());
            }
        }

        signals.opinion(bands)
    }
}

#[async_trait]
impl Agent for TechnicalAnalyst {
    async fn process(&self, input: String, _context: &mut Context) -> Result<String> {
        Self::assess(&read_record(&input)?)
    }

    fn name(&self) -> &str {
        "technical-analyst"
    }
}

/// Reads valuation and profitability ratios
#[derive(Debug, Default, Clone)]
pub struct FundamentalAnalyst;

impl FundamentalAnalyst {
    /// Fair value band as multiples of earnings
    const FAIR_PER: (f64, f64) = (15.0, 20.0);

    pub fn assess(record: &CanonicalRecord) -> Result<String> {
        let metrics = record.financial_metrics();
        let mut signals = Signals::default();

        match metrics.per {
            Some(per) if per > 0.0 && per < 15.0 => signals.bullish(format!("PER {per:.1} is cheap")),
            Some(per) if per > 35.0 => signals.bearish(format!("PER {per:.1} is rich")),
            Some(per) => signals.neutral(format!("PER {per:.1}")),
            None => {}
        }

        match metrics.pbr {
            Some(pbr) if pbr < 1.0 => signals.bullish(format!("PBR {pbr:.2} below book")),
            Some(pbr) if pbr > 5.0 => signals.bearish(format!("PBR {pbr:.2} well above book")),
            Some(pbr) => signals.neutral(format!("PBR {pbr:.2}")),
            None => {}
        }

        match metrics.roe {
            Some(roe) if roe >= 15.0 => signals.bullish(format!("ROE {roe:.1}% strong")),
            Some(roe) if roe < 5.0 => signals.bearish(format!("ROE {roe:.1}% weak")),
            Some(roe) => signals.neutral(format!("ROE {roe:.1}%")),
            None => {}
        }

        if let Some(dividend) = metrics.dividend_yield.filter(|d| *d >= 3.0) {
            signals.bullish(format!("dividend yield {dividend:.2}%"));
        }

        let (low, high) = Self::FAIR_PER;
        let target = metrics
            .eps
            .filter(|eps| *eps > 0.0)
            .map(|eps| (eps * low, eps * high));

        signals.opinion(target)
    }
}

#[async_trait]
impl Agent for FundamentalAnalyst {
    async fn process(&self, input: String, _context: &mut Context) -> Result<String> {
        Self::assess(&read_record(&input)?)
    }

    fn name(&self) -> &str {
        "fundamental-analyst"
    }
}

/// Reads the sentiment summary, falling back to headline counts
#[derive(Debug, Default, Clone)]
pub struct SentimentAnalyst;

impl SentimentAnalyst {
    const THRESHOLD: f64 = 0.15;

    pub fn assess(record: &CanonicalRecord) -> Result<String> {
        let sentiment = record.sentiment_summary();
        let mut signals = Signals::default();

        let score = sentiment.score.or_else(|| {
            let positive = f64::from(sentiment.positive?);
            let negative = f64::from(sentiment.negative?);
            let total = positive + negative + f64::from(sentiment.neutral.unwrap_or(0));
            (total > 0.0).then(|| (positive - negative) / total)
        });

        match score {
            Some(s) if s >= Self::THRESHOLD => signals.bullish(format!("sentiment {s:.2} positive")),
            Some(s) if s <= -Self::THRESHOLD => signals.bearish(format!("sentiment {s:.2} negative")),
            Some(s) => signals.neutral(format!("sentiment {s:.2} neutral")),
            None => {}
        }

        if let Some(latest) = record.news_items().first() {
            signals.notes.push(format!("latest headline: {}", latest.title));
        }

        signals.opinion(None)
    }
}

#[async_trait]
impl Agent for SentimentAnalyst {
    async fn process(&self, input: String, _context: &mut Context) -> Result<String> {
        Self::assess(&read_record(&input)?)
    }

    fn name(&self) -> &str {
        "sentiment-analyst"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{FinancialMetrics, PriceInfo, RecordData, SentimentSummary, TechnicalIndicators};
    use serde_json::Value;

    fn record(data: RecordData) -> CanonicalRecord {
        CanonicalRecord::assemble("AAPL", data, vec!["yahoo".to_string()], 80)
    }

    fn answer(reply: &str) -> Value {
        serde_json::from_str(reply).unwrap()
    }

    #[tokio::test]
    async fn test_technical_reads_serialised_record() {
        let canonical = record(RecordData {
            price_info: Some(PriceInfo {
                current: Some(95.0),
                ..Default::default()
            }),
            technical_indicators: Some(TechnicalIndicators {
                rsi: Some(25.0),
                macd: Some(1.2),
                macd_signal: Some(0.8),
                sma_50: Some(90.0),
                bollinger_lower: Some(96.0),
                bollinger_upper: Some(110.0),
                ..Default::default()
            }),
            ..Default::default()
        });
        let input = format!("Judge this.\n\n{}", canonical.to_json().unwrap());

        let reply = TechnicalAnalyst
            .process(input, &mut Context::new())
            .await
            .unwrap();
        let json = answer(&reply);

        assert_eq!(json["recommendation"], "buy");
        assert_eq!(json["confidence"], 90.0);
        assert_eq!(json["target_price_low"], 96.0);
        assert_eq!(json["target_price_high"], 110.0);
    }

    #[test]
    fn test_fundamental_targets_from_eps() {
        let canonical = record(RecordData {
            financial_metrics: Some(FinancialMetrics {
                per: Some(45.0),
                pbr: Some(8.0),
                roe: Some(20.0),
                eps: Some(6.0),
                ..Default::default()
            }),
            ..Default::default()
        });
        let json = answer(&FundamentalAnalyst::assess(&canonical).unwrap());

        assert_eq!(json["recommendation"], "sell");
        assert_eq!(json["confidence"], 63.0);
        assert_eq!(json["target_price_low"], 90.0);
        assert_eq!(json["target_price_high"], 120.0);
        assert_eq!(json["risks"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_sentiment_from_counts_and_empty_record() {
        let canonical = record(RecordData {
            sentiment_summary: Some(SentimentSummary {
                positive: Some(1),
                negative: Some(1),
                neutral: Some(2),
                ..Default::default()
            }),
            ..Default::default()
        });
        let json = answer(&SentimentAnalyst::assess(&canonical).unwrap());
        assert_eq!(json["recommendation"], "hold");
        assert_eq!(json["confidence"], 50.0);
        assert!(json["target_price_low"].is_null());

        let err = SentimentAnalyst::assess(&CanonicalRecord::empty("AAPL")).unwrap_err();
        assert!(matches!(err, Error::ProcessingFailed(_)));
    }

    #[tokio::test]
    async fn test_input_without_record_is_rejected() {
        let err = FundamentalAnalyst
            .process("no record here".to_string(), &mut Context::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidOutput(_)));
    }
}
