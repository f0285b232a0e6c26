//! Error taxonomy for the reconciliation and consensus pipeline

use serde::Serialize;
use thiserror::Error;

/// Machine-readable failure code surfaced to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    SourceUnavailable,
    AggregationFailure,
    ValidationDegradation,
    AgentFailure,
    RateLimitExceeded,
    ConfigurationError,
    InvalidIdentifier,
    Timeout,
    UpstreamError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SourceUnavailable => "SOURCE_UNAVAILABLE",
            Self::AggregationFailure => "AGGREGATION_FAILURE",
            Self::ValidationDegradation => "VALIDATION_DEGRADATION",
            Self::AgentFailure => "AGENT_FAILURE",
            Self::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            Self::ConfigurationError => "CONFIGURATION_ERROR",
            Self::InvalidIdentifier => "INVALID_IDENTIFIER",
            Self::Timeout => "TIMEOUT",
            Self::UpstreamError => "UPSTREAM_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by the pipeline and its components
#[derive(Debug, Error)]
pub enum ConsensusError {
    /// One collector failed; absorbed by the aggregator
    #[error("Source {source_name} unavailable: {reason}")]
    SourceUnavailable { source_name: String, reason: String },

    /// No usable source record survived
    #[error("Aggregation failed: {0}")]
    AggregationFailure(String),

    /// The merged record broke validator rules
    #[error("Validation degraded: {0}")]
    ValidationDegradation(String),

    /// An opinion agent failed, timed out or answered with an unusable opinion
    #[error("Agent {agent} failed: {reason}")]
    AgentFailure { agent: String, reason: String },

    /// Admission denied before any work began
    #[error("Rate limit exceeded for {key}, retry in {reset_in_seconds}s")]
    RateLimitExceeded { key: String, reset_in_seconds: u64 },

    /// Missing or inconsistent configuration
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Identifier rejected before any collector or agent call
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// A bounded call exceeded its budget
    #[error("{operation} timed out after {after_ms} ms")]
    Timeout { operation: String, after_ms: u64 },

    /// Upstream API answered with an error payload
    #[error("API error: {0}")]
    Api(String),

    /// Network or HTTP error
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Technical indicator calculation error
    #[error("Technical indicator error: {0}")]
    Indicator(String),
}

impl ConsensusError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::SourceUnavailable { .. } => ErrorCode::SourceUnavailable,
            Self::AggregationFailure(_) => ErrorCode::AggregationFailure,
            Self::ValidationDegradation(_) => ErrorCode::ValidationDegradation,
            Self::AgentFailure { .. } => ErrorCode::AgentFailure,
            Self::RateLimitExceeded { .. } => ErrorCode::RateLimitExceeded,
            Self::ConfigurationError(_) => ErrorCode::ConfigurationError,
            Self::InvalidIdentifier(_) => ErrorCode::InvalidIdentifier,
            Self::Timeout { .. } => ErrorCode::Timeout,
            Self::Api(_) | Self::Network(_) | Self::Json(_) | Self::Indicator(_) => {
                ErrorCode::UpstreamError
            }
        }
    }

    /// HTTP status an HTTP-facing caller should answer with
    pub fn http_status(&self) -> u16 {
        match self.code() {
            ErrorCode::RateLimitExceeded => 429,
            ErrorCode::InvalidIdentifier => 400,
            ErrorCode::AggregationFailure | ErrorCode::ValidationDegradation => 422,
            ErrorCode::ConfigurationError => 500,
            ErrorCode::Timeout => 504,
            ErrorCode::SourceUnavailable | ErrorCode::AgentFailure | ErrorCode::UpstreamError => {
                502
            }
        }
    }

    pub fn agent_failure(agent: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::AgentFailure {
            agent: agent.into(),
            reason: reason.into(),
        }
    }
}

impl From<agent_utils::TimedOut> for ConsensusError {
    fn from(err: agent_utils::TimedOut) -> Self {
        Self::Timeout {
            operation: err.operation,
            after_ms: u64::try_from(err.after.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, ConsensusError>;
