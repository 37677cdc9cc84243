//! ABOUTME: Insight agent: extraction payload to a human-readable report via an LLM
//! ABOUTME: Marker data is reattached from the input; the model never rewrites it

use crate::range;
use crate::repair::{self, RepairError};
use async_trait::async_trait;
use jsonschema::JSONSchema;
use labflow_core::error::{LabFlowError, Result};
use labflow_core::traits::insight::InsightAgent;
use labflow_core::types::{HealthDataExtraction, HealthInsights, DISCLAIMER_MARKER};
use labflow_providers::chat::CompletionClient;
use serde_json::{json, Value};
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{debug, instrument};

const INSIGHT_SYSTEM_PROMPT: &str = "\
You write plain-language summaries of laboratory results for patients. \
You receive a JSON payload of extracted markers plus a computed assessment per marker. \
Analyze only what is present in the payload; never invent markers, values, or ranges. \
Respond with exactly one JSON object of this shape and nothing else:\n\
{\"summary\": \"...\", \"key_findings\": [\"...\"], \"recommendations\": [\"...\"], \"disclaimer\": \"...\"}\n\
Rules:\n\
- summary: two or three sentences describing the overall picture.\n\
- key_findings: one bullet per abnormal marker, using the computed assessments. \
Markers assessed 'not interpretable' are left out. If nothing is abnormal, \
use a single bullet saying all values are normal or not interpretable.\n\
- recommendations: general, non-prescriptive lifestyle or follow-up suggestions, \
paired with the findings. Never prescribe medication or dosage.\n\
- disclaimer: state that this is not professional medical advice and a \
qualified clinician should review the results.";

/// Disclaimer used when the model's own wording is missing or non-conforming.
pub const DEFAULT_DISCLAIMER: &str = "This report is generated automatically and \
is not a substitute for professional medical advice. Always discuss your results \
with a qualified healthcare provider.";

const ALL_NORMAL_FINDING: &str =
    "All measured values are within normal limits or not interpretable against a reference range.";

const DEFAULT_RECOMMENDATION: &str =
    "Share these results with your healthcare provider at your next visit.";

/// LLM-backed insight agent.
pub struct InsightGenerator {
    client: Arc<dyn CompletionClient>,
    schema_doc: Value,
    compiled: JSONSchema,
}

impl InsightGenerator {
    pub fn new(client: Arc<dyn CompletionClient>) -> Result<Self> {
        let schema_doc = insight_schema();
        let compiled = JSONSchema::compile(&schema_doc).map_err(|e| LabFlowError::Internal {
            message: format!("invalid insight schema: {e}"),
        })?;
        Ok(Self {
            client,
            schema_doc,
            compiled,
        })
    }

    fn user_payload(extraction: &HealthDataExtraction) -> Result<String> {
        let payload =
            serde_json::to_string_pretty(extraction).map_err(|e| LabFlowError::Internal {
                message: format!("failed to serialize extraction: {e}"),
            })?;

        let mut message = payload;
        message.push_str("\n\nComputed marker assessments (authoritative):\n");
        if extraction.markers.is_empty() {
            message.push_str("- no markers were extracted\n");
        }
        for marker in &extraction.markers {
            let assessment = range::assess(&marker.value, marker.reference_range.as_deref());
            let _ = writeln!(
                message,
                "- {}: value {} vs range {} -> {}",
                marker.marker,
                marker.value,
                marker.reference_range.as_deref().unwrap_or("(none)"),
                assessment.label()
            );
        }
        message.push_str("\nAnalyze only what is present above.");
        Ok(message)
    }

    fn string_list(value: &Value, key: &str) -> Vec<String> {
        value
            .get(key)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn insight_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "summary": {"type": "string", "minLength": 1},
            "key_findings": {"type": "array", "items": {"type": "string"}},
            "recommendations": {"type": "array", "items": {"type": "string"}},
            "disclaimer": {"type": ["string", "null"]}
        },
        "required": ["summary", "key_findings", "recommendations"]
    })
}

#[async_trait]
impl InsightAgent for InsightGenerator {
    #[instrument(skip(self, extraction), fields(markers = extraction.markers.len()))]
    async fn generate(&self, extraction: &HealthDataExtraction) -> Result<HealthInsights> {
        let user = Self::user_payload(extraction)?;
        let content = self
            .client
            .complete_json(INSIGHT_SYSTEM_PROMPT, &user)
            .await?;

        let value = repair::parse_validated(&content, &self.schema_doc, &self.compiled).map_err(
            |e: RepairError| LabFlowError::InsightMalformed {
                message: e.to_string(),
            },
        )?;

        let summary = repair::string_field(&value, "summary").ok_or_else(|| {
            LabFlowError::InsightMalformed {
                message: "summary is empty".to_string(),
            }
        })?;

        let mut key_findings = Self::string_list(&value, "key_findings");
        if key_findings.is_empty() {
            key_findings.push(ALL_NORMAL_FINDING.to_string());
        }

        let mut recommendations = Self::string_list(&value, "recommendations");
        if recommendations.is_empty() {
            recommendations.push(DEFAULT_RECOMMENDATION.to_string());
        }

        let disclaimer = repair::string_field(&value, "disclaimer")
            .filter(|text| text.contains(DISCLAIMER_MARKER))
            .unwrap_or_else(|| DEFAULT_DISCLAIMER.to_string());

        debug!(findings = key_findings.len(), "insights generated");
        Ok(HealthInsights {
            data: extraction.clone(),
            summary,
            key_findings,
            recommendations,
            disclaimer,
        })
    }
}
