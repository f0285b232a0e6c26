//! Three-agent vote

use agent_core::{Agent, Context};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use super::opinion::{AgentOpinion, AgentRole, OpinionNormalizer, RawOpinion, Recommendation};
use crate::error::{ConsensusError, Result};
use crate::quorum::Quorum;
use crate::record::CanonicalRecord;

pub const DEFAULT_AGENT_TIMEOUT: Duration = Duration::from_secs(60);
/// Confidence of every outcome without a buy or sell majority
pub const HOLD_CONFIDENCE: f64 = 0.5;
const MAJORITY: u32 = 2;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteCounts {
    pub buy: u32,
    pub sell: u32,
    pub hold: u32,
}

impl VoteCounts {
    pub fn tally<'a>(votes: impl IntoIterator<Item = &'a Recommendation>) -> Self {
        votes.into_iter().fold(Self::default(), |mut counts, vote| {
            match vote {
                Recommendation::Buy => counts.buy += 1,
                Recommendation::Sell => counts.sell += 1,
                Recommendation::Hold => counts.hold += 1,
            }
            counts
        })
    }

    pub fn total(&self) -> u32 {
        self.buy + self.sell + self.hold
    }
}

/// Why the decision came out the way it did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionBasis {
    /// At least two buy or two sell votes
    Majority,
    /// At least two agents explicitly recommended hold
    HoldMajority,
    /// No recommendation reached two votes
    Split,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetPriceRange {
    pub low: f64,
    pub high: f64,
    pub mean_low: f64,
    pub mean_high: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsensusDecision {
    pub decision: Recommendation,
    pub reasoning: String,
    /// 0.0 to 1.0
    pub confidence: f64,
    pub vote_counts: VoteCounts,
    pub basis: DecisionBasis,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_price: Option<TargetPriceRange>,
    pub opinions: Vec<AgentOpinion>,
}

fn mean(values: &[f64]) -> Option<f64> {
    (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
}

/// Merged target range, present only when some opinion gave both bounds
pub fn merge_targets(opinions: &[AgentOpinion]) -> Option<TargetPriceRange> {
    if !opinions.iter().any(AgentOpinion::has_target_range) {
        return None;
    }

    let lows: Vec<f64> = opinions
        .iter()
        .filter_map(|o| o.target_price_low.value().copied())
        .collect();
    let highs: Vec<f64> = opinions
        .iter()
        .filter_map(|o| o.target_price_high.value().copied())
        .collect();

    Some(TargetPriceRange {
        low: lows.iter().copied().fold(f64::INFINITY, f64::min),
        high: highs.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        mean_low: mean(&lows)?,
        mean_high: mean(&highs)?,
    })
}

/// Count votes over normalised opinions and apply the decision rule
pub fn vote(opinions: Vec<AgentOpinion>) -> ConsensusDecision {
    let votes: Vec<Recommendation> = opinions.iter().filter_map(AgentOpinion::vote).collect();
    let counts = VoteCounts::tally(&votes);
    let total = counts.total();

    let majority = |decision: Recommendation, n: u32| {
        let confidences: Vec<f64> = opinions
            .iter()
            .filter_map(AgentOpinion::confidence_value)
            .collect();
        (
            decision,
            format!("{n} of {total} recommend {decision}"),
            mean(&confidences).unwrap_or(0.0),
            DecisionBasis::Majority,
        )
    };

    let (decision, reasoning, confidence, basis) = if counts.buy >= MAJORITY {
        majority(Recommendation::Buy, counts.buy)
    } else if counts.sell >= MAJORITY {
        majority(Recommendation::Sell, counts.sell)
    } else if counts.hold >= MAJORITY {
        (
            Recommendation::Hold,
            format!("{} of {total} recommend hold", counts.hold),
            HOLD_CONFIDENCE,
            DecisionBasis::HoldMajority,
        )
    } else {
        (
            Recommendation::Hold,
            "agents disagree".to_string(),
            HOLD_CONFIDENCE,
            DecisionBasis::Split,
        )
    };

    ConsensusDecision {
        decision,
        reasoning,
        confidence: confidence.clamp(0.0, 1.0),
        vote_counts: counts,
        basis,
        target_price: merge_targets(&opinions),
        opinions,
    }
}

/// Fans the canonical record out to one agent per role and reduces the replies
pub struct ConsensusReducer {
    agents: BTreeMap<AgentRole, Arc<dyn Agent>>,
    normalizer: OpinionNormalizer,
    timeout: Duration,
    quorum: Quorum,
}

impl ConsensusReducer {
    pub fn new() -> Result<Self> {
        Ok(Self {
            agents: BTreeMap::new(),
            normalizer: OpinionNormalizer::new()?,
            timeout: DEFAULT_AGENT_TIMEOUT,
            quorum: Quorum::all(AgentRole::ALL.len()),
        })
    }

    pub fn with_agent(mut self, role: AgentRole, agent: Arc<dyn Agent>) -> Self {
        self.agents.insert(role, agent);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_quorum(mut self, quorum: Quorum) -> Self {
        self.quorum = quorum;
        self
    }

    pub fn quorum(&self) -> Quorum {
        self.quorum
    }

    /// Every role has an agent and the quorum is satisfiable
    pub fn validate(&self) -> Result<()> {
        let missing: Vec<&str> = AgentRole::ALL
            .iter()
            .filter(|role| !self.agents.contains_key(*role))
            .map(AgentRole::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(ConsensusError::ConfigurationError(format!(
                "no agent configured for role(s): {}",
                missing.join(", ")
            )));
        }
        if self.quorum.total != AgentRole::ALL.len() {
            return Err(ConsensusError::ConfigurationError(format!(
                "consensus quorum {} must cover exactly {} agents",
                self.quorum,
                AgentRole::ALL.len()
            )));
        }
        self.quorum.validate()
    }

    /// Normalise and vote over the replies that came back
    pub fn reduce(&self, raw: &[RawOpinion]) -> Result<ConsensusDecision> {
        for (i, opinion) in raw.iter().enumerate() {
            if raw[..i].iter().any(|earlier| earlier.role == opinion.role) {
                return Err(ConsensusError::agent_failure(
                    &opinion.agent_name,
                    format!("duplicate opinion for role {}", opinion.role),
                ));
            }
        }

        if raw.len() > AgentRole::ALL.len() || !self.quorum.is_met(raw.len()) {
            let missing: Vec<&str> = AgentRole::ALL
                .iter()
                .filter(|role| raw.iter().all(|o| o.role != **role))
                .map(AgentRole::as_str)
                .collect();
            return Err(ConsensusError::agent_failure(
                missing.join(", "),
                format!(
                    "{} of {} opinions returned, quorum {}",
                    raw.len(),
                    AgentRole::ALL.len(),
                    self.quorum
                ),
            ));
        }

        let opinions = raw
            .iter()
            .map(|r| self.normalizer.normalize(r))
            .collect::<Result<Vec<_>>>()?;

        let decision = vote(opinions);
        tracing::info!(
            decision = %decision.decision,
            basis = ?decision.basis,
            buy = decision.vote_counts.buy,
            sell = decision.vote_counts.sell,
            hold = decision.vote_counts.hold,
            confidence = decision.confidence,
            "consensus reached"
        );
        Ok(decision)
    }

    /// Ask every agent concurrently, then reduce
    ///
    /// Siblings are never cancelled; each call is bounded by its own timeout
    /// and a timeout counts as that agent failing.
    pub async fn gather(&self, record: &Arc<CanonicalRecord>) -> Result<ConsensusDecision> {
        self.gather_in(record, &Context::new()).await
    }

    /// As [`gather`](Self::gather), with every agent's context seeded from `base`
    pub async fn gather_in(
        &self,
        record: &Arc<CanonicalRecord>,
        base: &Context,
    ) -> Result<ConsensusDecision> {
        self.validate()?;
        let serialized = record.to_json()?;

        let calls = self.agents.iter().map(|(role, agent)| {
            let input = format!("{}\n\n{}", role.instruction(), serialized);
            let identifier = record.identifier().to_string();
            async move {
                let mut context = base
                    .clone()
                    .with_role(role.as_str())
                    .with_identifier(identifier);
                let operation = format!("{} opinion from {}", role, agent.name());
                let reply =
                    agent_utils::with_timeout(operation, self.timeout, agent.process(input, &mut context))
                        .await;

                match reply {
                    Ok(Ok(text)) => Ok(RawOpinion::new(*role, agent.name(), text)),
                    Ok(Err(e)) => Err(ConsensusError::agent_failure(agent.name(), e.to_string())),
                    Err(elapsed) => Err(ConsensusError::agent_failure(agent.name(), elapsed.to_string())),
                }
            }
        });

        let mut raws = Vec::new();
        let mut failures = Vec::new();
        for outcome in join_all(calls).await {
            match outcome {
                Ok(raw) => raws.push(raw),
                Err(e) => {
                    tracing::warn!(error = %e, "opinion agent failed");
                    failures.push(e);
                }
            }
        }

        if !self.quorum.is_met(raws.len()) {
            if let Some(first) = failures.into_iter().next() {
                return Err(first);
            }
        }

        self.reduce(&raws)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::opinion::Extracted;
    use agent_core::Result as AgentResult;
    use async_trait::async_trait;
    use mockall::mock;

    mock! {
        pub Analyst {}

        #[async_trait]
        impl Agent for Analyst {
            async fn process(&self, input: String, context: &mut Context) -> AgentResult<String>;
            fn name(&self) -> &str;
        }
    }

    fn opinion(role: AgentRole, rec: Recommendation, confidence: f64) -> AgentOpinion {
        AgentOpinion {
            agent_name: role.as_str().to_string(),
            role,
            domain_label: role.domain_label().to_string(),
            recommendation: Extracted::Parsed(rec),
            confidence: Extracted::Parsed(confidence),
            target_price_low: Extracted::Missing,
            target_price_high: Extracted::Missing,
            risks: Vec::new(),
            rationale: None,
        }
    }

    fn three(votes: [(Recommendation, f64); 3]) -> Vec<AgentOpinion> {
        AgentRole::ALL
            .iter()
            .zip(votes)
            .map(|(role, (rec, c))| opinion(*role, rec, c))
            .collect()
    }

    fn reply(recommendation: &str, confidence: u32) -> String {
        format!(r#"{{"recommendation": "{recommendation}", "confidence": {confidence}}}"#)
    }

    fn analyst(name: &'static str, answer: Option<String>) -> Arc<dyn Agent> {
        let mut mock = MockAnalyst::new();
        mock.expect_name().return_const(name.to_string());
        mock.expect_process()
            .times(1)
            .returning(move |input, context| {
                assert!(input.contains(r#""identifier":"AAPL""#));
                assert_eq!(context.identifier(), Some("AAPL"));
                answer
                    .clone()
                    .ok_or_else(|| agent_core::Error::ProcessingFailed("model overloaded".into()))
            });
        Arc::new(mock)
    }

    fn idle(name: &'static str) -> Arc<dyn Agent> {
        let mut mock = MockAnalyst::new();
        mock.expect_name().return_const(name.to_string());
        mock.expect_process().never();
        Arc::new(mock)
    }

    fn reducer_with(answers: [Option<String>; 3]) -> ConsensusReducer {
        let [technical, fundamental, sentiment] = answers;
        ConsensusReducer::new()
            .unwrap()
            .with_agent(AgentRole::Technical, analyst("tech", technical))
            .with_agent(AgentRole::Fundamental, analyst("fund", fundamental))
            .with_agent(AgentRole::Sentiment, analyst("news", sentiment))
    }

    fn record() -> Arc<CanonicalRecord> {
        Arc::new(CanonicalRecord::empty("AAPL"))
    }

    #[test]
    fn test_buy_majority_averages_all_three() {
        use Recommendation::*;
        let decision = vote(three([(Buy, 0.8), (Hold, 0.6), (Buy, 0.9)]));

        assert_eq!(decision.decision, Buy);
        assert_eq!(decision.basis, DecisionBasis::Majority);
        assert_eq!(decision.reasoning, "2 of 3 recommend buy");
        assert!((decision.confidence - 0.766_666).abs() < 1e-4);
        assert_eq!(decision.vote_counts, VoteCounts { buy: 2, sell: 0, hold: 1 });
        assert!(decision.target_price.is_none());
    }

    #[test]
    fn test_split_is_hold_at_fixed_confidence() {
        use Recommendation::*;
        let decision = vote(three([(Buy, 0.8), (Sell, 0.7), (Hold, 0.6)]));

        assert_eq!(decision.decision, Hold);
        assert_eq!(decision.confidence, 0.5);
        assert_eq!(decision.reasoning, "agents disagree");
        assert_eq!(decision.basis, DecisionBasis::Split);
        assert_eq!(decision.vote_counts.total(), 3);
    }

    #[test]
    fn test_hold_majority_is_distinguished_from_split() {
        use Recommendation::*;
        let decision = vote(three([(Hold, 0.9), (Hold, 0.9), (Sell, 0.9)]));

        assert_eq!(decision.decision, Hold);
        assert_eq!(decision.confidence, 0.5);
        assert_eq!(decision.basis, DecisionBasis::HoldMajority);
        assert_eq!(decision.reasoning, "2 of 3 recommend hold");

        let unanimous = vote(three([(Sell, 0.4), (Sell, 0.6), (Sell, 0.5)]));
        assert_eq!(unanimous.decision, Sell);
        assert_eq!(unanimous.reasoning, "3 of 3 recommend sell");
        assert!((unanimous.confidence - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_target_range_needs_one_complete_opinion() {
        use Recommendation::*;
        let mut opinions = three([(Buy, 0.8), (Buy, 0.7), (Hold, 0.6)]);
        opinions[0].target_price_low = Extracted::Parsed(100.0);
        assert!(merge_targets(&opinions).is_none());

        opinions[0].target_price_high = Extracted::Parsed(120.0);
        opinions[1].target_price_low = Extracted::FallbackParsed(90.0);
        opinions[1].target_price_high = Extracted::FallbackParsed(130.0);
        opinions[2].target_price_high = Extracted::Parsed(140.0);

        let range = merge_targets(&opinions).unwrap();
        assert_eq!(range.low, 90.0);
        assert_eq!(range.high, 140.0);
        assert_eq!(range.mean_low, 95.0);
        assert_eq!(range.mean_high, 130.0);
    }

    #[test]
    fn test_reduce_requires_full_quorum() {
        let reducer = ConsensusReducer::new().unwrap();
        let raws = vec![
            RawOpinion::new(AgentRole::Technical, "tech", reply("buy", 80)),
            RawOpinion::new(AgentRole::Sentiment, "news", reply("buy", 70)),
        ];
        let err = reducer.reduce(&raws).unwrap_err();
        assert!(matches!(err, ConsensusError::AgentFailure { ref agent, .. } if agent == "fundamental"));

        let relaxed = ConsensusReducer::new()
            .unwrap()
            .with_quorum(Quorum::at_least(2, 3));
        let decision = relaxed.reduce(&raws).unwrap();
        assert_eq!(decision.decision, Recommendation::Buy);
        assert_eq!(decision.reasoning, "2 of 2 recommend buy");
        assert!((decision.confidence - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_reduce_rejects_duplicate_roles() {
        let raws = vec![
            RawOpinion::new(AgentRole::Technical, "a", reply("buy", 80)),
            RawOpinion::new(AgentRole::Technical, "b", reply("buy", 80)),
            RawOpinion::new(AgentRole::Sentiment, "c", reply("buy", 80)),
        ];
        assert!(ConsensusReducer::new().unwrap().reduce(&raws).is_err());
    }

    #[tokio::test]
    async fn test_gather_votes_over_all_agents() {
        let reducer = reducer_with([
            Some(reply("buy", 80)),
            Some(reply("hold", 60)),
            Some(reply("buy", 90)),
        ]);
        let decision = reducer.gather(&record()).await.unwrap();

        assert_eq!(decision.decision, Recommendation::Buy);
        assert_eq!(decision.opinions.len(), 3);
        assert_eq!(decision.opinions[0].agent_name, "tech");
    }

    #[tokio::test]
    async fn test_gather_fails_when_one_agent_fails() {
        let reducer = reducer_with([Some(reply("buy", 80)), None, Some(reply("buy", 90))]);
        let err = reducer.gather(&record()).await.unwrap_err();

        assert!(matches!(err, ConsensusError::AgentFailure { ref agent, .. } if agent == "fund"));
        assert!(err.to_string().contains("model overloaded"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_agent_times_out() {
        struct Stalled;

        #[async_trait]
        impl Agent for Stalled {
            async fn process(&self, _input: String, _context: &mut Context) -> AgentResult<String> {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(reply("buy", 99))
            }

            fn name(&self) -> &str {
                "stalled"
            }
        }

        let mut fast = MockAnalyst::new();
        fast.expect_name().return_const("fast".to_string());
        fast.expect_process().returning(|_, _| Ok(reply("sell", 70)));
        let fast: Arc<dyn Agent> = Arc::new(fast);

        let reducer = ConsensusReducer::new()
            .unwrap()
            .with_timeout(Duration::from_secs(5))
            .with_agent(AgentRole::Technical, Arc::new(Stalled))
            .with_agent(AgentRole::Fundamental, Arc::clone(&fast))
            .with_agent(AgentRole::Sentiment, fast);

        let err = reducer.gather(&record()).await.unwrap_err();
        assert!(matches!(err, ConsensusError::AgentFailure { ref agent, .. } if agent == "stalled"));
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn test_validate_reports_missing_roles() {
        let reducer = ConsensusReducer::new()
            .unwrap()
            .with_agent(AgentRole::Technical, idle("tech"));
        let err = reducer.validate().unwrap_err();
        assert!(err.to_string().contains("fundamental, sentiment"));

        let bad_quorum = ConsensusReducer::new().unwrap().with_quorum(Quorum::all(2));
        assert!(bad_quorum.validate().is_err());
    }
}
