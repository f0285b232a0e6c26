//! Yahoo Finance collector: price info plus indicators computed from daily closes

use async_trait::async_trait;
use ta::Next;
use ta::indicators::{
    BollingerBands, MovingAverageConvergenceDivergence, RelativeStrengthIndex,
    SimpleMovingAverage,
};

use super::{Collector, CollectorMetadata};
use crate::api::{DailyBar, YahooFinanceClient};
use crate::error::{ConsensusError, Result};
use crate::identifier::Identifier;
use crate::record::{PriceInfo, RecordData, ReliabilityTier, SourceRecord, TechnicalIndicators};

const SOURCE_NAME: &str = "yahoo";
const HISTORY_DAYS: i64 = 120;
const CONFIDENCE: u8 = 85;

pub struct YahooCollector {
    client: YahooFinanceClient,
    metadata: CollectorMetadata,
}

impl YahooCollector {
    pub fn new() -> Self {
        Self {
            client: YahooFinanceClient::new(),
            metadata: CollectorMetadata::new(SOURCE_NAME, 1, ReliabilityTier::High),
        }
    }
}

impl Default for YahooCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Price group from the latest bar, with change measured against the prior close
pub fn price_from_bars(latest: &DailyBar, history: &[DailyBar]) -> PriceInfo {
    let previous_close = history
        .iter()
        .rev()
        .find(|bar| bar.timestamp.date_naive() < latest.timestamp.date_naive())
        .map(|bar| bar.close);
    let change = previous_close.map(|prev| latest.close - prev);
    let change_percent = previous_close
        .filter(|prev| *prev != 0.0)
        .zip(change)
        .map(|(prev, change)| change / prev * 100.0);

    PriceInfo {
        current: Some(latest.close),
        open: Some(latest.open),
        high: Some(latest.high),
        low: Some(latest.low),
        previous_close,
        change,
        change_percent,
        volume: i64::try_from(latest.volume).ok(),
        currency: None,
        as_of: Some(latest.timestamp.to_rfc3339()),
    }
}

fn last_value<I: Next<f64>>(mut indicator: I, closes: &[f64], period: usize) -> Option<I::Output> {
    if closes.len() < period {
        return None;
    }
    closes.iter().map(|c| indicator.next(*c)).last()
}

fn indicator_error(e: impl std::fmt::Display) -> ConsensusError {
    ConsensusError::Indicator(e.to_string())
}

/// RSI-14, MACD 12/26/9, SMA-20/50 and Bollinger 20/2; indicators lacking history stay null
pub fn compute_indicators(closes: &[f64]) -> Result<TechnicalIndicators> {
    let rsi = RelativeStrengthIndex::new(14).map_err(indicator_error)?;
    let macd = MovingAverageConvergenceDivergence::new(12, 26, 9).map_err(indicator_error)?;
    let sma_20 = SimpleMovingAverage::new(20).map_err(indicator_error)?;
    let sma_50 = SimpleMovingAverage::new(50).map_err(indicator_error)?;
    let bollinger = BollingerBands::new(20, 2.0).map_err(indicator_error)?;

    let macd = last_value(macd, closes, 26);
    let bands = last_value(bollinger, closes, 20);

    Ok(TechnicalIndicators {
        rsi: last_value(rsi, closes, 15),
        macd: macd.as_ref().map(|m| m.macd),
        macd_signal: macd.as_ref().map(|m| m.signal),
        sma_20: last_value(sma_20, closes, 20),
        sma_50: last_value(sma_50, closes, 50),
        bollinger_upper: bands.as_ref().map(|b| b.upper),
        bollinger_lower: bands.as_ref().map(|b| b.lower),
    })
}

#[async_trait]
impl Collector for YahooCollector {
    fn metadata(&self) -> &CollectorMetadata {
        &self.metadata
    }

    async fn fetch(&self, identifier: &Identifier) -> SourceRecord {
        let symbol = YahooFinanceClient::symbol_for(identifier);

        let (latest, history) = tokio::join!(
            self.client.latest_bar(&symbol),
            self.client.daily_history(&symbol, HISTORY_DAYS),
        );

        let latest = match latest {
            Ok(bar) => bar,
            Err(e) => return SourceRecord::failure(identifier, SOURCE_NAME, e.to_string()),
        };

        let mut errors = Vec::new();
        let history = history.unwrap_or_else(|e| {
            errors.push(format!("history: {e}"));
            Vec::new()
        });

        let mut data = RecordData {
            price_info: Some(price_from_bars(&latest, &history)),
            ..Default::default()
        };

        if !history.is_empty() {
            let closes: Vec<f64> = history.iter().map(|bar| bar.close).collect();
            match compute_indicators(&closes) {
                Ok(indicators) => data.technical_indicators = Some(indicators),
                Err(e) => errors.push(format!("technicalIndicators: {e}")),
            }
        }

        let mut record = SourceRecord::success(identifier, SOURCE_NAME, data, CONFIDENCE);
        if !errors.is_empty() {
            record.success = false;
            record.errors = errors;
        }
        record
    }
}
