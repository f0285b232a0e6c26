//! Collector backed by a free-text information agent

use agent_core::{Agent, Context};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::sync::Arc;

use super::{Collector, CollectorMetadata};
use crate::identifier::Identifier;
use crate::payload::extract_json_object;
use crate::record::{FieldGroup, RecordData, SourceRecord};

const DEFAULT_CONFIDENCE: u8 = 50;

/// Asks an [`Agent`] for a JSON description of the instrument and parses
/// each field group independently
pub struct AgentCollector {
    agent: Arc<dyn Agent>,
    metadata: CollectorMetadata,
    default_confidence: u8,
}

impl AgentCollector {
    pub fn new(agent: Arc<dyn Agent>, metadata: CollectorMetadata) -> Self {
        Self {
            agent,
            metadata,
            default_confidence: DEFAULT_CONFIDENCE,
        }
    }

    /// Confidence asserted when the payload carries none
    pub fn with_default_confidence(mut self, confidence: u8) -> Self {
        self.default_confidence = confidence.min(100);
        self
    }

    fn request(identifier: &Identifier) -> String {
        format!(
            "Describe instrument {identifier} as one JSON object with the keys \
             priceInfo, financialMetrics, technicalIndicators, newsItems, sentimentSummary \
             and confidence (0-100). Use null for anything you do not know."
        )
    }

    /// Turn the agent's reply into a record, keeping every group that parsed
    fn parse_reply(&self, identifier: &Identifier, reply: &str) -> SourceRecord {
        let source = &self.metadata.source_name;

        let Some(payload) = extract_json_object(reply) else {
            return SourceRecord::failure(identifier, source, "reply contains no JSON object");
        };

        let mut errors = Vec::new();
        let data = RecordData {
            price_info: parse_group(&payload, FieldGroup::PriceInfo, &mut errors),
            financial_metrics: parse_group(&payload, FieldGroup::FinancialMetrics, &mut errors),
            technical_indicators: parse_group(&payload, FieldGroup::TechnicalIndicators, &mut errors),
            news_items: parse_group(&payload, FieldGroup::NewsItems, &mut errors),
            sentiment_summary: parse_group(&payload, FieldGroup::SentimentSummary, &mut errors),
        };

        if data.is_empty() && errors.is_empty() {
            return SourceRecord::failure(identifier, source, "reply contains no field groups");
        }

        let confidence = payload
            .get("confidence")
            .and_then(Value::as_f64)
            .map_or(self.default_confidence, |c| c.clamp(0.0, 100.0).round() as u8);

        let mut record = SourceRecord::success(identifier, source, data, confidence);
        if !errors.is_empty() {
            record.success = false;
            record.errors = errors;
        }
        record
    }
}

fn parse_group<T: DeserializeOwned>(
    payload: &Map<String, Value>,
    group: FieldGroup,
    errors: &mut Vec<String>,
) -> Option<T> {
    match payload.get(group.as_str()) {
        None | Some(Value::Null) => None,
        Some(value) => match serde_json::from_value(value.clone()) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                errors.push(format!("{group}: {e}"));
                None
            }
        },
    }
}

#[async_trait]
impl Collector for AgentCollector {
    fn metadata(&self) -> &CollectorMetadata {
        &self.metadata
    }

    async fn fetch(&self, identifier: &Identifier) -> SourceRecord {
        let mut context = Context::new()
            .with_role("collector")
            .with_identifier(identifier.as_str());

        match self.agent.process(Self::request(identifier), &mut context).await {
            Ok(reply) => self.parse_reply(identifier, &reply),
            Err(e) => {
                tracing::warn!(agent = self.agent.name(), error = %e, "information agent failed");
                SourceRecord::failure(identifier, &self.metadata.source_name, e.to_string())
            }
        }
    }
}
