//! Alpha Vantage API client

use crate::error::{ConsensusError, Result};
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::num::NonZeroU32;
use std::sync::Arc;

const BASE_URL: &str = "https://www.alphavantage.co/query";
const FREE_TIER_PER_MINUTE: NonZeroU32 = NonZeroU32::MIN.saturating_add(4);

type SharedRateLimiter = Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>;

/// Alpha Vantage API client
#[derive(Debug, Clone)]
pub struct AlphaVantageClient {
    client: Client,
    api_key: String,
    rate_limiter: SharedRateLimiter,
}

/// GLOBAL_QUOTE payload; every value arrives as a string
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalQuote {
    #[serde(rename = "02. open")]
    pub open: Option<String>,
    #[serde(rename = "03. high")]
    pub high: Option<String>,
    #[serde(rename = "04. low")]
    pub low: Option<String>,
    #[serde(rename = "05. price")]
    pub price: Option<String>,
    #[serde(rename = "06. volume")]
    pub volume: Option<String>,
    #[serde(rename = "07. latest trading day")]
    pub latest_trading_day: Option<String>,
    #[serde(rename = "08. previous close")]
    pub previous_close: Option<String>,
    #[serde(rename = "09. change")]
    pub change: Option<String>,
    #[serde(rename = "10. change percent")]
    pub change_percent: Option<String>,
}

/// Company overview data
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CompanyOverview {
    pub symbol: Option<String>,
    pub currency: Option<String>,
    #[serde(rename = "MarketCapitalization")]
    pub market_cap: Option<String>,
    #[serde(rename = "PERatio")]
    pub pe_ratio: Option<String>,
    #[serde(rename = "PriceToBookRatio")]
    pub price_to_book: Option<String>,
    #[serde(rename = "ReturnOnEquityTTM")]
    pub return_on_equity: Option<String>,
    #[serde(rename = "EPS")]
    pub eps: Option<String>,
    pub dividend_yield: Option<String>,
}

/// One article from NEWS_SENTIMENT
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsFeedItem {
    pub title: String,
    pub url: Option<String>,
    /// `YYYYMMDDTHHMMSS`
    pub time_published: String,
    pub summary: Option<String>,
    pub source: Option<String>,
    #[serde(default)]
    pub ticker_sentiment: Vec<TickerSentiment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickerSentiment {
    pub ticker: String,
    pub ticker_sentiment_score: String,
    #[serde(default)]
    pub relevance_score: Option<String>,
}

/// Parse an Alpha Vantage numeric string; "None", "-" and empty mean absent
pub fn parse_number(raw: Option<&str>) -> Option<f64> {
    let raw = raw?.trim().trim_end_matches('%');
    match raw {
        "" | "None" | "-" => None,
        value => value.parse().ok(),
    }
}

impl AlphaVantageClient {
    /// Create a new client with API key and per-minute request budget
    pub fn new(api_key: impl Into<String>, rate_limit: u32) -> Self {
        let quota = Quota::per_minute(NonZeroU32::new(rate_limit).unwrap_or(FREE_TIER_PER_MINUTE));
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
        }
    }

    /// Issue one query and unwrap Alpha Vantage's in-band error conventions
    async fn query(&self, function: &str, params: &[(&str, &str)]) -> Result<Value> {
        self.rate_limiter.until_ready().await;

        let mut query: Vec<(&str, &str)> = vec![("function", function), ("apikey", self.api_key.as_str())];
        query.extend_from_slice(params);

        let response = self.client.get(BASE_URL).query(&query).send().await?;
        if !response.status().is_success() {
            return Err(ConsensusError::Api(format!(
                "Alpha Vantage {function}: HTTP {}",
                response.status()
            )));
        }

        let data: Value = response.json().await?;

        if let Some(error) = data.get("Error Message") {
            return Err(ConsensusError::Api(format!("Alpha Vantage {function}: {error}")));
        }
        if data.get("Note").is_some() || data.get("Information").is_some() {
            return Err(ConsensusError::Api(format!(
                "Alpha Vantage {function}: request budget exhausted"
            )));
        }

        Ok(data)
    }

    pub async fn global_quote(&self, symbol: &str) -> Result<GlobalQuote> {
        let data = self.query("GLOBAL_QUOTE", &[("symbol", symbol)]).await?;
        let quote = data
            .get("Global Quote")
            .cloned()
            .ok_or_else(|| ConsensusError::Api(format!("no quote for {symbol}")))?;
        Ok(serde_json::from_value(quote)?)
    }

    pub async fn company_overview(&self, symbol: &str) -> Result<CompanyOverview> {
        let data = self.query("OVERVIEW", &[("symbol", symbol)]).await?;
        if data.as_object().is_none_or(serde_json::Map::is_empty) {
            return Err(ConsensusError::Api(format!("no overview for {symbol}")));
        }
        Ok(serde_json::from_value(data)?)
    }

    pub async fn news_sentiment(&self, symbol: &str, limit: usize) -> Result<Vec<NewsFeedItem>> {
        let limit = limit.to_string();
        let data = self
            .query("NEWS_SENTIMENT", &[("tickers", symbol), ("limit", &limit)])
            .await?;
        let feed = data.get("feed").cloned().unwrap_or(Value::Array(Vec::new()));
        Ok(serde_json::from_value(feed)?)
    }
}
