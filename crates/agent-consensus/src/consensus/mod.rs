//! Opinion gathering and the three-agent vote

pub mod analysts;
pub mod opinion;
pub mod reducer;

pub use analysts::{FundamentalAnalyst, SentimentAnalyst, TechnicalAnalyst};
pub use opinion::{
    AgentOpinion, AgentRole, Extracted, OpinionNormalizer, RawOpinion, Recommendation, normalize,
};
pub use reducer::{
    ConsensusDecision, ConsensusReducer, DecisionBasis, TargetPriceRange, VoteCounts, vote,
};
