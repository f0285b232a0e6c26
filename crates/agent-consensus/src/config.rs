//! Pipeline configuration

use crate::aggregator::DEFAULT_MAX_NEWS_ITEMS;
use crate::error::{ConsensusError, Result};
use crate::quorum::Quorum;
use crate::rate_limit::RateLimitPolicy;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Number of opinion agents; the consensus quorum must cover all of them
pub const CONSENSUS_AGENTS: usize = 3;

/// Tunables for one [`Pipeline`](crate::pipeline::Pipeline)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Requests admitted per caller per window
    pub rate_limit_max_requests: u32,

    /// Fixed admission window
    pub rate_limit_window: Duration,

    /// Budget for a single collector fetch
    pub collector_timeout: Duration,

    /// Budget for a single opinion agent call
    pub agent_timeout: Duration,

    /// Successful collectors needed to merge. A `total` of 0 stands for
    /// however many collectors the pipeline is built with.
    pub collector_quorum: Quorum,

    /// Successful opinions needed to vote
    pub consensus_quorum: Quorum,

    /// How long a successful collector record is reused
    pub cache_ttl: Duration,

    /// News items kept in the canonical record
    pub max_news_items: usize,

    /// Alpha Vantage API key (optional)
    pub alpha_vantage_api_key: Option<String>,

    /// Alpha Vantage requests per minute
    pub alpha_vantage_rate_limit: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            rate_limit_max_requests: 10,
            rate_limit_window: Duration::from_secs(60),
            collector_timeout: Duration::from_secs(15),
            agent_timeout: Duration::from_secs(60),
            collector_quorum: Quorum::at_least(1, 0),
            consensus_quorum: Quorum::all(CONSENSUS_AGENTS),
            cache_ttl: Duration::from_secs(60),
            max_news_items: DEFAULT_MAX_NEWS_ITEMS,
            alpha_vantage_api_key: None,
            alpha_vantage_rate_limit: 5,
        }
    }
}

fn parse_env<T: FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| ConsensusError::ConfigurationError(format!("{key}={raw} is not valid")))
}

fn parse_millis(key: &str, raw: &str) -> Result<Duration> {
    parse_env::<u64>(key, raw).map(Duration::from_millis)
}

/// `"2"` means two of however many; `"2/3"` and `"2-of-3"` are explicit
fn parse_quorum(key: &str, raw: &str) -> Result<Quorum> {
    match raw.trim().parse::<usize>() {
        Ok(required) => Ok(Quorum::at_least(required, 0)),
        Err(_) => raw
            .parse()
            .map_err(|e| ConsensusError::ConfigurationError(format!("{key}: {e}"))),
    }
}

impl PipelineConfig {
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }

    /// Defaults overridden by whichever variables are set
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(raw) = lookup("RATE_LIMIT_MAX_REQUESTS") {
            config.rate_limit_max_requests = parse_env("RATE_LIMIT_MAX_REQUESTS", &raw)?;
        }
        if let Some(raw) = lookup("RATE_LIMIT_WINDOW_MS") {
            config.rate_limit_window = parse_millis("RATE_LIMIT_WINDOW_MS", &raw)?;
        }
        if let Some(raw) = lookup("COLLECTOR_TIMEOUT_MS") {
            config.collector_timeout = parse_millis("COLLECTOR_TIMEOUT_MS", &raw)?;
        }
        if let Some(raw) = lookup("AGENT_TIMEOUT_MS") {
            config.agent_timeout = parse_millis("AGENT_TIMEOUT_MS", &raw)?;
        }
        if let Some(raw) = lookup("COLLECTOR_QUORUM") {
            config.collector_quorum = parse_quorum("COLLECTOR_QUORUM", &raw)?;
        }
        if let Some(raw) = lookup("CONSENSUS_QUORUM") {
            let quorum = parse_quorum("CONSENSUS_QUORUM", &raw)?;
            config.consensus_quorum = if quorum.total == 0 {
                quorum.with_total(CONSENSUS_AGENTS)
            } else {
                quorum
            };
        }
        if let Some(raw) = lookup("COLLECTOR_CACHE_TTL_SECS") {
            config.cache_ttl = Duration::from_secs(parse_env("COLLECTOR_CACHE_TTL_SECS", &raw)?);
        }
        if let Some(raw) = lookup("ALPHA_VANTAGE_RATE_LIMIT") {
            config.alpha_vantage_rate_limit = parse_env("ALPHA_VANTAGE_RATE_LIMIT", &raw)?;
        }
        config.alpha_vantage_api_key = lookup("ALPHA_VANTAGE_API_KEY").filter(|k| !k.trim().is_empty());

        config.validate()?;
        Ok(config)
    }

    pub fn rate_limit_policy(&self) -> RateLimitPolicy {
        RateLimitPolicy::new(self.rate_limit_max_requests, self.rate_limit_window)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.rate_limit_policy().validate()?;

        if self.collector_timeout.is_zero() || self.agent_timeout.is_zero() {
            return Err(ConsensusError::ConfigurationError(
                "timeouts must be greater than 0".to_string(),
            ));
        }

        if self.collector_quorum.required == 0 {
            return Err(ConsensusError::ConfigurationError(
                "collector quorum must require at least one success".to_string(),
            ));
        }
        if self.collector_quorum.total != 0 {
            self.collector_quorum.validate()?;
        }

        if self.consensus_quorum.total != CONSENSUS_AGENTS {
            return Err(ConsensusError::ConfigurationError(format!(
                "consensus quorum {} must cover exactly {CONSENSUS_AGENTS} agents",
                self.consensus_quorum
            )));
        }
        self.consensus_quorum.validate()?;

        if self.max_news_items == 0 {
            return Err(ConsensusError::ConfigurationError(
                "max_news_items must be greater than 0".to_string(),
            ));
        }

        if self.cache_ttl.is_zero() {
            return Err(ConsensusError::ConfigurationError(
                "cache_ttl must be greater than 0".to_string(),
            ));
        }

        if self.alpha_vantage_rate_limit == 0 {
            return Err(ConsensusError::ConfigurationError(
                "alpha_vantage_rate_limit must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Builder for PipelineConfig
#[derive(Debug, Default)]
pub struct PipelineConfigBuilder {
    rate_limit_max_requests: Option<u32>,
    rate_limit_window: Option<Duration>,
    collector_timeout: Option<Duration>,
    agent_timeout: Option<Duration>,
    collector_quorum: Option<Quorum>,
    consensus_quorum: Option<Quorum>,
    cache_ttl: Option<Duration>,
    max_news_items: Option<usize>,
    alpha_vantage_api_key: Option<String>,
    alpha_vantage_rate_limit: Option<u32>,
}

impl PipelineConfigBuilder {
    pub fn rate_limit(mut self, max_requests: u32, window: Duration) -> Self {
        self.rate_limit_max_requests = Some(max_requests);
        self.rate_limit_window = Some(window);
        self
    }

    pub fn collector_timeout(mut self, timeout: Duration) -> Self {
        self.collector_timeout = Some(timeout);
        self
    }

    pub fn agent_timeout(mut self, timeout: Duration) -> Self {
        self.agent_timeout = Some(timeout);
        self
    }

    pub fn collector_quorum(mut self, quorum: Quorum) -> Self {
        self.collector_quorum = Some(quorum);
        self
    }

    pub fn consensus_quorum(mut self, quorum: Quorum) -> Self {
        self.consensus_quorum = Some(quorum);
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    pub fn max_news_items(mut self, max: usize) -> Self {
        self.max_news_items = Some(max);
        self
    }

    pub fn alpha_vantage_api_key(mut self, key: impl Into<String>) -> Self {
        self.alpha_vantage_api_key = Some(key.into());
        self
    }

    pub fn alpha_vantage_rate_limit(mut self, per_minute: u32) -> Self {
        self.alpha_vantage_rate_limit = Some(per_minute);
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<PipelineConfig> {
        let defaults = PipelineConfig::default();

        let config = PipelineConfig {
            rate_limit_max_requests: self
                .rate_limit_max_requests
                .unwrap_or(defaults.rate_limit_max_requests),
            rate_limit_window: self.rate_limit_window.unwrap_or(defaults.rate_limit_window),
            collector_timeout: self.collector_timeout.unwrap_or(defaults.collector_timeout),
            agent_timeout: self.agent_timeout.unwrap_or(defaults.agent_timeout),
            collector_quorum: self.collector_quorum.unwrap_or(defaults.collector_quorum),
            consensus_quorum: self.consensus_quorum.unwrap_or(defaults.consensus_quorum),
            cache_ttl: self.cache_ttl.unwrap_or(defaults.cache_ttl),
            max_news_items: self.max_news_items.unwrap_or(defaults.max_news_items),
            alpha_vantage_api_key: self.alpha_vantage_api_key,
            alpha_vantage_rate_limit: self
                .alpha_vantage_rate_limit
                .unwrap_or(defaults.alpha_vantage_rate_limit),
        };

        config.validate()?;
        Ok(config)
    }
}
