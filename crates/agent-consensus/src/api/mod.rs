//! HTTP/SDK clients for the concrete collectors

pub mod alpha_vantage;
pub mod yahoo;

pub use alpha_vantage::{AlphaVantageClient, CompanyOverview, GlobalQuote, NewsFeedItem};
pub use yahoo::{DailyBar, YahooFinanceClient};
