//! One request end to end: admit, validate, collect, merge, vote

use agent_core::{Agent, Context};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::aggregator::{AggregationResult, Aggregator, SelectionPolicy};
use crate::collector::{
    AlphaVantageCollector, CachedCollector, Collector, YahooCollector, collect_all,
};
use crate::config::PipelineConfig;
use crate::consensus::{
    AgentRole, ConsensusDecision, ConsensusReducer, FundamentalAnalyst, SentimentAnalyst,
    TechnicalAnalyst,
};
use crate::error::{ConsensusError, ErrorCode, Result};
use crate::identifier::Identifier;
use crate::rate_limit::{Admission, Clock, InMemoryWindowStore, RateGovernor, SystemClock, WindowStore};
use crate::record::CanonicalRecord;

/// Aggregation outcome without the record itself
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregationReport {
    pub success: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub sources_used: Vec<String>,
    pub confidence: u8,
    pub validation_score: u8,
}

impl From<&AggregationResult> for AggregationReport {
    fn from(result: &AggregationResult) -> Self {
        Self {
            success: result.success,
            errors: result.errors.clone(),
            warnings: result.warnings.clone(),
            sources_used: result.sources_used.clone(),
            confidence: result.confidence,
            validation_score: result.validation.score,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineResponse {
    pub identifier: Identifier,
    pub canonical_record: Arc<CanonicalRecord>,
    pub decision: ConsensusDecision,
    pub aggregation: AggregationReport,
    pub admission: Admission,
    pub elapsed_ms: u64,
}

impl PipelineResponse {
    pub fn headers(&self) -> [(&'static str, String); 2] {
        self.admission.headers()
    }
}

/// A run that stopped early, with whatever was produced before the stop
#[derive(Debug)]
pub struct PipelineFailure {
    pub error: ConsensusError,
    pub code: ErrorCode,
    pub status: u16,
    pub admission: Option<Admission>,
    /// The merged record, or its all-null shape when aggregation failed; absent
    /// when the run stopped before collection
    pub canonical_record: Option<Arc<CanonicalRecord>>,
    pub aggregation: Option<AggregationReport>,
}

impl PipelineFailure {
    pub fn new(error: ConsensusError) -> Self {
        Self {
            code: error.code(),
            status: error.http_status(),
            error,
            admission: None,
            canonical_record: None,
            aggregation: None,
        }
    }

    fn with_admission(mut self, admission: Admission) -> Self {
        self.admission = Some(admission);
        self
    }

    fn with_aggregation(mut self, aggregation: &AggregationResult) -> Self {
        self.aggregation = Some(AggregationReport::from(aggregation));
        self
    }

    fn with_canonical_record(mut self, record: Arc<CanonicalRecord>) -> Self {
        self.canonical_record = Some(record);
        self
    }

    /// Response headers; empty when the request never reached admission
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        self.admission
            .map(|a| a.headers().to_vec())
            .unwrap_or_default()
    }

    /// Machine-readable body for HTTP-facing callers
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "error": {
                "code": self.code,
                "message": self.error.to_string(),
            },
            "status": self.status,
            "admission": self.admission,
            "canonicalRecord": self.canonical_record,
            "aggregation": self.aggregation,
        })
    }
}

impl fmt::Display for PipelineFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.error)
    }
}

impl std::error::Error for PipelineFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

impl From<ConsensusError> for PipelineFailure {
    fn from(error: ConsensusError) -> Self {
        Self::new(error)
    }
}

pub struct Pipeline {
    config: PipelineConfig,
    collectors: Vec<Arc<dyn Collector>>,
    aggregator: Aggregator,
    reducer: ConsensusReducer,
    governor: RateGovernor,
    requests: AtomicU64,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .field("collectors", &self.collector_names())
            .field("governor", &self.governor)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn collector_names(&self) -> Vec<&str> {
        self.collectors
            .iter()
            .map(|c| c.metadata().source_name.as_str())
            .collect()
    }

    pub fn governor(&self) -> &RateGovernor {
        &self.governor
    }

    /// Run one request for `caller_key`
    ///
    /// Admission is checked first and the identifier second, so neither a
    /// denied caller nor a malformed identifier ever reaches a collector or
    /// agent.
    pub async fn run(
        &self,
        caller_key: &str,
        raw_identifier: &str,
    ) -> std::result::Result<PipelineResponse, PipelineFailure> {
        let started = Instant::now();
        let request_id = format!("req-{}", self.requests.fetch_add(1, Ordering::Relaxed) + 1);

        let admission = self.governor.admit(caller_key).await?;
        if !admission.allowed {
            return Err(PipelineFailure::new(admission.to_error(caller_key)).with_admission(admission));
        }

        let identifier = Identifier::parse(raw_identifier)
            .map_err(|e| PipelineFailure::new(e).with_admission(admission))?;

        tracing::info!(%request_id, caller = caller_key, %identifier, "pipeline run started");

        let records = collect_all(&self.collectors, &identifier, self.config.collector_timeout).await;
        let aggregation = self.aggregator.aggregate(&records, &identifier);

        if let Some(error) = aggregation.failure() {
            tracing::warn!(%request_id, %identifier, error = %error, "aggregation unusable");
            return Err(PipelineFailure::new(error)
                .with_admission(admission)
                .with_aggregation(&aggregation)
                .with_canonical_record(Arc::clone(&aggregation.canonical_record)));
        }
        if let Some(degraded) = aggregation.degradation() {
            tracing::warn!(%request_id, %identifier, "{degraded}");
        }

        let canonical = Arc::clone(&aggregation.canonical_record);
        let context = Context::new()
            .with_caller(caller_key)
            .with_request_id(request_id.clone());

        let decision = match self.reducer.gather_in(&canonical, &context).await {
            Ok(decision) => decision,
            Err(error) => {
                tracing::warn!(%request_id, %identifier, error = %error, "consensus failed");
                return Err(PipelineFailure::new(error)
                    .with_admission(admission)
                    .with_aggregation(&aggregation)
                    .with_canonical_record(canonical));
            }
        };

        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        tracing::info!(
            %request_id,
            %identifier,
            decision = %decision.decision,
            confidence = decision.confidence,
            elapsed_ms,
            "pipeline run complete"
        );

        Ok(PipelineResponse {
            identifier,
            aggregation: AggregationReport::from(&aggregation),
            canonical_record: canonical,
            decision,
            admission,
            elapsed_ms,
        })
    }

    /// Drop rate windows that have already closed
    pub async fn purge_expired(&self) -> Result<usize> {
        self.governor.purge_expired().await
    }
}

/// Builder for Pipeline
#[derive(Default)]
pub struct PipelineBuilder {
    config: Option<PipelineConfig>,
    collectors: Vec<Arc<dyn Collector>>,
    yahoo: bool,
    alpha_vantage: bool,
    agents: BTreeMap<AgentRole, Arc<dyn Agent>>,
    selection_policy: Option<SelectionPolicy>,
    store: Option<Arc<dyn WindowStore>>,
    clock: Option<Arc<dyn Clock>>,
}

impl PipelineBuilder {
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn collector(mut self, collector: Arc<dyn Collector>) -> Self {
        self.collectors.push(collector);
        self
    }

    /// Add the cached Yahoo Finance collector
    pub fn yahoo(mut self) -> Self {
        self.yahoo = true;
        self
    }

    /// Add the cached Alpha Vantage collector; needs an API key in the config
    pub fn alpha_vantage(mut self) -> Self {
        self.alpha_vantage = true;
        self
    }

    pub fn agent(mut self, role: AgentRole, agent: Arc<dyn Agent>) -> Self {
        self.agents.insert(role, agent);
        self
    }

    /// Fill every role without an agent with the built-in rule-based analyst
    pub fn default_analysts(mut self) -> Self {
        self.agents
            .entry(AgentRole::Technical)
            .or_insert_with(|| Arc::new(TechnicalAnalyst));
        self.agents
            .entry(AgentRole::Fundamental)
            .or_insert_with(|| Arc::new(FundamentalAnalyst));
        self.agents
            .entry(AgentRole::Sentiment)
            .or_insert_with(|| Arc::new(SentimentAnalyst));
        self
    }

    pub fn selection_policy(mut self, policy: SelectionPolicy) -> Self {
        self.selection_policy = Some(policy);
        self
    }

    pub fn window_store(mut self, store: Arc<dyn WindowStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Validate everything and assemble the pipeline
    pub fn build(self) -> Result<Pipeline> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let mut collectors = self.collectors;
        if self.yahoo {
            collectors.push(Arc::new(CachedCollector::new(
                YahooCollector::new(),
                config.cache_ttl,
            )));
        }
        if self.alpha_vantage {
            let key = config.alpha_vantage_api_key.clone().ok_or_else(|| {
                ConsensusError::ConfigurationError(
                    "Alpha Vantage collector enabled without ALPHA_VANTAGE_API_KEY".to_string(),
                )
            })?;
            collectors.push(Arc::new(CachedCollector::new(
                AlphaVantageCollector::new(key, config.alpha_vantage_rate_limit),
                config.cache_ttl,
            )));
        }
        if collectors.is_empty() {
            return Err(ConsensusError::ConfigurationError(
                "pipeline needs at least one collector".to_string(),
            ));
        }

        let collector_quorum = config.collector_quorum.with_total(collectors.len());
        collector_quorum.validate()?;

        let mut aggregator = Aggregator::new()
            .with_quorum(collector_quorum)
            .with_max_news_items(config.max_news_items);
        if let Some(policy) = self.selection_policy {
            aggregator = aggregator.with_policy(policy);
        }

        let mut reducer = ConsensusReducer::new()?
            .with_timeout(config.agent_timeout)
            .with_quorum(config.consensus_quorum);
        for (role, agent) in self.agents {
            reducer = reducer.with_agent(role, agent);
        }
        reducer.validate()?;

        let governor = RateGovernor::new(
            config.rate_limit_policy(),
            self.store
                .unwrap_or_else(|| Arc::new(InMemoryWindowStore::new())),
            self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
        )?;

        tracing::debug!(
            collectors = collectors.len(),
            quorum = %collector_quorum,
            "pipeline built"
        );

        Ok(Pipeline {
            config,
            collectors,
            aggregator,
            reducer,
            governor,
            requests: AtomicU64::new(0),
        })
    }
}
