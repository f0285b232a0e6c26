//! Yahoo Finance client

use crate::error::{ConsensusError, Result};
use crate::identifier::{Identifier, Market};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use yahoo_finance_api as yahoo;

/// Suffix Yahoo uses for Tokyo-listed codes
const DOMESTIC_SUFFIX: &str = ".T";

/// Yahoo Finance API client
#[derive(Debug, Clone, Default)]
pub struct YahooFinanceClient {}

/// One daily OHLCV bar
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyBar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

fn yahoo_error(e: impl std::fmt::Display) -> ConsensusError {
    ConsensusError::Api(format!("Yahoo Finance: {e}"))
}

impl YahooFinanceClient {
    pub fn new() -> Self {
        Self {}
    }

    /// Yahoo ticker for an identifier
    pub fn symbol_for(identifier: &Identifier) -> String {
        match identifier.market() {
            Market::Domestic => format!("{identifier}{DOMESTIC_SUFFIX}"),
            Market::Foreign => identifier.to_string(),
        }
    }

    /// Latest daily bar
    pub async fn latest_bar(&self, symbol: &str) -> Result<DailyBar> {
        let provider = yahoo::YahooConnector::new().map_err(yahoo_error)?;

        let response = provider
            .get_latest_quotes(symbol, "1d")
            .await
            .map_err(yahoo_error)?;

        let quote = response.last_quote().map_err(yahoo_error)?;
        Ok(to_bar(&quote))
    }

    /// Daily bars for the last `days` calendar days, oldest first
    pub async fn daily_history(&self, symbol: &str, days: i64) -> Result<Vec<DailyBar>> {
        let provider = yahoo::YahooConnector::new().map_err(yahoo_error)?;

        let end = Utc::now();
        let start = end - chrono::Duration::days(days);
        let start_odt = OffsetDateTime::from_unix_timestamp(start.timestamp())
            .map_err(|e| yahoo_error(format!("invalid start timestamp: {e}")))?;
        let end_odt = OffsetDateTime::from_unix_timestamp(end.timestamp())
            .map_err(|e| yahoo_error(format!("invalid end timestamp: {e}")))?;

        let response = provider
            .get_quote_history(symbol, start_odt, end_odt)
            .await
            .map_err(yahoo_error)?;

        let quotes = response.quotes().map_err(yahoo_error)?;
        Ok(quotes.iter().map(to_bar).collect())
    }
}

fn to_bar(quote: &yahoo::Quote) -> DailyBar {
    DailyBar {
        timestamp: DateTime::from_timestamp(quote.timestamp as i64, 0).unwrap_or_else(Utc::now),
        open: quote.open,
        high: quote.high,
        low: quote.low,
        close: quote.close,
        volume: quote.volume,
    }
}
