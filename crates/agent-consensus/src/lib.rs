//! Multi-source data reconciliation and opinion consensus
//!
//! One pipeline run takes a caller key and a raw instrument identifier and
//! produces either a Buy/Sell/Hold decision with the merged record behind it,
//! or a structured failure carrying a taxonomy code.
//!
//! - Admission: fixed-window rate limiting per caller ([`rate_limit`])
//! - Collection: concurrent fan-out to every [`Collector`], each bounded by a
//!   timeout and never failing across its boundary
//! - Validation: a pure rule table scoring records 0-100 ([`validator`])
//! - Aggregation: per-field-group selection into one [`CanonicalRecord`]
//! - Consensus: three role-specific agents vote ([`consensus`])
//!
//! # Example
//!
//! ```rust,ignore
//! use agent_consensus::{Pipeline, PipelineConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let pipeline = Pipeline::builder()
//!         .config(PipelineConfig::from_env()?)
//!         .yahoo()
//!         .default_analysts()
//!         .build()?;
//!
//!     match pipeline.run("cli", "AAPL").await {
//!         Ok(response) => println!("{}: {}", response.decision.decision, response.decision.reasoning),
//!         Err(failure) => eprintln!("{}", failure.to_json()),
//!     }
//!     Ok(())
//! }
//! ```

pub mod aggregator;
pub mod api;
pub mod collector;
pub mod config;
pub mod consensus;
pub mod error;
pub mod identifier;
pub mod payload;
pub mod pipeline;
pub mod quorum;
pub mod rate_limit;
pub mod record;
pub mod validator;

// Re-export main types for convenience
pub use aggregator::{AggregationResult, Aggregator, SelectionPolicy, SelectionStrategy};
pub use collector::{Collector, CollectorMetadata, collect_all};
pub use config::PipelineConfig;
pub use consensus::{
    AgentOpinion, AgentRole, ConsensusDecision, ConsensusReducer, DecisionBasis, Extracted,
    RawOpinion, Recommendation,
};
pub use error::{ConsensusError, ErrorCode, Result};
pub use identifier::{Identifier, Market};
pub use pipeline::{Pipeline, PipelineFailure, PipelineResponse};
pub use quorum::Quorum;
pub use rate_limit::{Admission, RateGovernor, RateLimitPolicy};
pub use record::{CanonicalRecord, FieldGroup, ReliabilityTier, SourceRecord};
pub use validator::{ValidationResult, Validator};
