//! Alpha Vantage collector: quote, fundamentals, news and sentiment

use async_trait::async_trait;
use chrono::NaiveDateTime;

use super::{Collector, CollectorMetadata};
use crate::api::alpha_vantage::{
    AlphaVantageClient, CompanyOverview, GlobalQuote, NewsFeedItem, parse_number,
};
use crate::identifier::{Identifier, Market};
use crate::record::{
    FinancialMetrics, NewsItem, PriceInfo, RecordData, ReliabilityTier, SentimentSummary,
    SourceRecord,
};

const SOURCE_NAME: &str = "alpha_vantage";
const CONFIDENCE: u8 = 75;
const NEWS_LIMIT: usize = 20;
/// Alpha Vantage's own neutral band for sentiment scores
const NEUTRAL_BAND: f64 = 0.15;
const STRONG_BAND: f64 = 0.35;

pub struct AlphaVantageCollector {
    client: AlphaVantageClient,
    metadata: CollectorMetadata,
}

impl AlphaVantageCollector {
    pub fn new(api_key: impl Into<String>, rate_limit: u32) -> Self {
        Self {
            client: AlphaVantageClient::new(api_key, rate_limit),
            metadata: CollectorMetadata::new(SOURCE_NAME, 2, ReliabilityTier::Medium)
                .with_markets(vec![Market::Foreign]),
        }
    }
}

pub fn price_from_quote(quote: &GlobalQuote) -> PriceInfo {
    let volume = parse_number(quote.volume.as_deref()).map(|v| v.round() as i64);
    PriceInfo {
        current: parse_number(quote.price.as_deref()),
        open: parse_number(quote.open.as_deref()),
        high: parse_number(quote.high.as_deref()),
        low: parse_number(quote.low.as_deref()),
        previous_close: parse_number(quote.previous_close.as_deref()),
        change: parse_number(quote.change.as_deref()),
        change_percent: parse_number(quote.change_percent.as_deref()),
        volume,
        currency: None,
        as_of: quote.latest_trading_day.clone(),
    }
}

pub fn metrics_from_overview(overview: &CompanyOverview) -> FinancialMetrics {
    FinancialMetrics {
        market_cap: parse_number(overview.market_cap.as_deref()),
        per: parse_number(overview.pe_ratio.as_deref()),
        pbr: parse_number(overview.price_to_book.as_deref()),
        // reported as a fraction
        roe: parse_number(overview.return_on_equity.as_deref()).map(|r| r * 100.0),
        eps: parse_number(overview.eps.as_deref()),
        dividend_yield: parse_number(overview.dividend_yield.as_deref()).map(|d| d * 100.0),
    }
}

/// `20240508T063000` to RFC 3339; unrecognised values are passed through
fn published_at(raw: &str) -> String {
    NaiveDateTime::parse_from_str(raw, "%Y%m%dT%H%M%S")
        .map(|dt| dt.and_utc().to_rfc3339())
        .unwrap_or_else(|_| raw.to_string())
}

pub fn news_from_feed(feed: &[NewsFeedItem]) -> Vec<NewsItem> {
    feed.iter()
        .map(|item| NewsItem {
            title: item.title.clone(),
            published_at: published_at(&item.time_published),
            url: item.url.clone(),
            source: item.source.clone(),
            summary: item.summary.clone(),
        })
        .collect()
}

fn sentiment_label(score: f64) -> &'static str {
    match score {
        s if s <= -STRONG_BAND => "bearish",
        s if s < -NEUTRAL_BAND => "somewhat_bearish",
        s if s < NEUTRAL_BAND => "neutral",
        s if s < STRONG_BAND => "somewhat_bullish",
        _ => "bullish",
    }
}

/// Mean per-ticker sentiment over the feed; `None` when the ticker never appears
pub fn sentiment_from_feed(feed: &[NewsFeedItem], ticker: &str) -> Option<SentimentSummary> {
    let scores: Vec<f64> = feed
        .iter()
        .flat_map(|item| item.ticker_sentiment.iter())
        .filter(|ts| ts.ticker.eq_ignore_ascii_case(ticker))
        .filter_map(|ts| parse_number(Some(&ts.ticker_sentiment_score)))
        .collect();

    if scores.is_empty() {
        return None;
    }

    let count = |pred: fn(f64) -> bool| {
        u32::try_from(scores.iter().filter(|s| pred(**s)).count()).unwrap_or(u32::MAX)
    };
    let mean = scores.iter().sum::<f64>() / scores.len() as f64;

    Some(SentimentSummary {
        score: Some(mean.clamp(-1.0, 1.0)),
        label: Some(sentiment_label(mean).to_string()),
        positive: Some(count(|s| s >= NEUTRAL_BAND)),
        negative: Some(count(|s| s <= -NEUTRAL_BAND)),
        neutral: Some(count(|s| s.abs() < NEUTRAL_BAND)),
    })
}

#[async_trait]
impl Collector for AlphaVantageCollector {
    fn metadata(&self) -> &CollectorMetadata {
        &self.metadata
    }

    async fn fetch(&self, identifier: &Identifier) -> SourceRecord {
        let symbol = identifier.as_str();
        let (quote, overview, news) = tokio::join!(
            self.client.global_quote(symbol),
            self.client.company_overview(symbol),
            self.client.news_sentiment(symbol, NEWS_LIMIT),
        );

        let mut errors = Vec::new();
        let mut data = RecordData::default();

        match quote {
            Ok(quote) => data.price_info = Some(price_from_quote(&quote)),
            Err(e) => errors.push(format!("priceInfo: {e}")),
        }
        match overview {
            Ok(overview) => data.financial_metrics = Some(metrics_from_overview(&overview)),
            Err(e) => errors.push(format!("financialMetrics: {e}")),
        }
        match news {
            Ok(feed) => {
                data.sentiment_summary = sentiment_from_feed(&feed, symbol);
                data.news_items = Some(news_from_feed(&feed));
            }
            Err(e) => errors.push(format!("newsItems: {e}")),
        }

        if data.is_empty() {
            let mut record = SourceRecord::failure(identifier, SOURCE_NAME, "no data returned");
            record.errors.extend(errors);
            return record;
        }

        let mut record = SourceRecord::success(identifier, SOURCE_NAME, data, CONFIDENCE);
        if !errors.is_empty() {
            record.success = false;
            record.errors = errors;
        }
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::alpha_vantage::TickerSentiment;

    fn feed_item(title: &str, scores: &[(&str, &str)]) -> NewsFeedItem {
        NewsFeedItem {
            title: title.to_string(),
            url: None,
            time_published: "20240508T063000".to_string(),
            summary: None,
            source: Some("Reuters".to_string()),
            ticker_sentiment: scores
                .iter()
                .map(|(ticker, score)| TickerSentiment {
                    ticker: (*ticker).to_string(),
                    ticker_sentiment_score: (*score).to_string(),
                    relevance_score: None,
                })
                .collect(),
        }
    }

    #[test]
    fn test_price_from_quote() {
        let quote = GlobalQuote {
            price: Some("187.44".to_string()),
            volume: Some("3514519".to_string()),
            change_percent: Some("-0.4502%".to_string()),
            previous_close: Some("None".to_string()),
            ..Default::default()
        };
        let price = price_from_quote(&quote);
        assert_eq!(price.current, Some(187.44));
        assert_eq!(price.volume, Some(3_514_519));
        assert_eq!(price.change_percent, Some(-0.4502));
        assert_eq!(price.previous_close, None);
    }

    #[test]
    fn test_metrics_scale_fractions_to_percent() {
        let overview = CompanyOverview {
            pe_ratio: Some("22.5".to_string()),
            return_on_equity: Some("0.35".to_string()),
            dividend_yield: Some("0.0125".to_string()),
            ..Default::default()
        };
        let metrics = metrics_from_overview(&overview);
        assert_eq!(metrics.per, Some(22.5));
        assert!((metrics.roe.unwrap() - 35.0).abs() < 1e-9);
        assert!((metrics.dividend_yield.unwrap() - 1.25).abs() < 1e-9);
    }

    #[test]
    fn test_news_timestamps_become_rfc3339() {
        let news = news_from_feed(&[feed_item("IBM beats estimates", &[])]);
        assert_eq!(news[0].published_at, "2024-05-08T06:30:00+00:00");
        assert!(news[0].published().is_some());
    }

    #[test]
    fn test_sentiment_for_ticker_only() {
        let feed = vec![
            feed_item("a", &[("IBM", "0.40"), ("MSFT", "-0.9")]),
            feed_item("b", &[("IBM", "0.20")]),
            feed_item("c", &[("IBM", "-0.05")]),
        ];
        let summary = sentiment_from_feed(&feed, "ibm").unwrap();

        assert!((summary.score.unwrap() - 0.183_333).abs() < 1e-3);
        assert_eq!(summary.label.as_deref(), Some("somewhat_bullish"));
        assert_eq!(summary.positive, Some(2));
        assert_eq!(summary.negative, Some(0));
        assert_eq!(summary.neutral, Some(1));
        assert!(sentiment_from_feed(&feed, "AAPL").is_none());
    }
}
