//! Table rendering for pipeline results

use agent_consensus::{CanonicalRecord, PipelineFailure, PipelineResponse};
use comfy_table::presets::UTF8_FULL;
use comfy_table::{ContentArrangement, Table};
use std::fmt::Display;

fn table(header: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header.to_vec());
    table
}

fn cell<T: Display>(value: Option<T>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

fn fmt2(value: Option<f64>) -> String {
    cell(value.map(|v| format!("{v:.2}")))
}

/// Key figures of the merged record
pub fn render_record(record: &CanonicalRecord) -> String {
    let price = record.price_info();
    let metrics = record.financial_metrics();
    let tech = record.technical_indicators();
    let sentiment = record.sentiment_summary();

    let mut out = table(&["Field", "Value"]);
    out.add_row(vec!["Price".to_string(), fmt2(price.reference_price())]);
    out.add_row(vec!["Change %".to_string(), fmt2(price.change_percent)]);
    out.add_row(vec!["Volume".to_string(), cell(price.volume)]);
    out.add_row(vec!["PER".to_string(), fmt2(metrics.per)]);
    out.add_row(vec!["PBR".to_string(), fmt2(metrics.pbr)]);
    out.add_row(vec!["ROE %".to_string(), fmt2(metrics.roe)]);
    out.add_row(vec!["RSI".to_string(), fmt2(tech.rsi)]);
    out.add_row(vec!["MACD".to_string(), fmt2(tech.macd)]);
    out.add_row(vec!["Sentiment".to_string(), fmt2(sentiment.score)]);
    out.add_row(vec!["Headlines".to_string(), record.news_items().len().to_string()]);
    out.add_row(vec!["Sources".to_string(), record.sources_used().join(", ")]);
    out.add_row(vec!["Merge confidence".to_string(), record.merge_confidence().to_string()]);
    out.to_string()
}

pub fn render_response(response: &PipelineResponse) -> String {
    let decision = &response.decision;

    let mut votes = table(&["Agent", "Domain", "Vote", "Confidence", "Target"]);
    for opinion in &decision.opinions {
        let target = match (opinion.target_price_low.value(), opinion.target_price_high.value()) {
            (Some(low), Some(high)) => format!("{low:.2} - {high:.2}"),
            _ => "-".to_string(),
        };
        votes.add_row(vec![
            opinion.agent_name.clone(),
            opinion.domain_label.clone(),
            cell(opinion.vote()),
            cell(opinion.confidence_value().map(|c| format!("{:.0}%", c * 100.0))),
            target,
        ]);
    }

    let mut out = format!(
        "{} | decision: {} ({:.0}%) | {}\n",
        response.identifier,
        decision.decision.as_str().to_uppercase(),
        decision.confidence * 100.0,
        decision.reasoning,
    );
    if let Some(range) = &decision.target_price {
        out.push_str(&format!(
            "target range {:.2} - {:.2} (mean {:.2} - {:.2})\n",
            range.low, range.high, range.mean_low, range.mean_high
        ));
    }
    out.push_str(&render_record(&response.canonical_record));
    out.push('\n');
    out.push_str(&votes.to_string());
    for warning in &response.aggregation.warnings {
        out.push_str(&format!("\nwarning: {warning}"));
    }
    out
}

pub fn render_failure(failure: &PipelineFailure) -> String {
    let mut out = format!("error: {failure}");
    if let Some(admission) = &failure.admission {
        if !admission.allowed {
            out.push_str(&format!("\nretry in {}s", admission.reset_in_seconds));
        }
    }
    if let Some(aggregation) = &failure.aggregation {
        for warning in &aggregation.warnings {
            out.push_str(&format!("\nwarning: {warning}"));
        }
    }
    if let Some(record) = &failure.canonical_record {
        out.push('\n');
        out.push_str(&render_record(record));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_consensus::ConsensusError;

    #[test]
    fn test_empty_record_renders_dashes() {
        let rendered = render_record(&CanonicalRecord::empty("AAPL"));
        assert!(rendered.contains("Price"));
        assert!(rendered.contains('-'));
        assert!(rendered.contains("Merge confidence"));
    }

    #[test]
    fn test_failure_shows_code() {
        let failure = PipelineFailure::new(ConsensusError::InvalidIdentifier("12345".to_string()));
        let rendered = render_failure(&failure);
        assert!(rendered.starts_with("error: [INVALID_IDENTIFIER]"));
        assert!(rendered.contains("12345"));
    }
}
