//! ABOUTME: Extraction agent: OCR text to validated health markers via an LLM
//! ABOUTME: Malformed individual markers are dropped, not fatal; dates normalize best-effort

use crate::repair::{self, RepairError};
use async_trait::async_trait;
use chrono::NaiveDate;
use jsonschema::JSONSchema;
use labflow_core::error::{LabFlowError, Result};
use labflow_core::traits::extractor::ExtractionAgent;
use labflow_core::types::{HealthDataExtraction, HealthMarker};
use labflow_providers::chat::CompletionClient;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

const EXTRACTION_SYSTEM_PROMPT: &str = "\
You extract laboratory results from OCR text of medical lab reports. \
Respond with exactly one JSON object of this shape and nothing else:\n\
{\"markers\": [{\"marker\": \"...\", \"value\": \"...\", \"unit\": \"...\", \"reference_range\": \"...\"}], \
\"document_type\": \"...\", \"test_date\": \"...\"}\n\
Rules:\n\
- When a report shows both current and previous result columns, read only the current results column.\n\
- value is a string preserving the original representation, including sign and decimals.\n\
- reference_range is the range text copied verbatim from the report; never invent or complete a range. Omit it when the report has none.\n\
- Use plain-text units such as mg/dL, /\u{3bc}L, 10^3/mm^3; never LaTeX macros.\n\
- Fix obvious OCR artifacts in bounds, e.g. read '<6 - 6.0' as '<6.0'.\n\
- document_type is the report kind, e.g. 'Blood Test Report'.\n\
- test_date is the collection or report date if present, otherwise null.";

/// Date formats seen on lab reports, tried in order.
const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%d/%m/%Y",
    "%m/%d/%Y",
    "%d-%m-%Y",
    "%d.%m.%Y",
    "%B %d, %Y",
    "%d %B %Y",
    "%Y/%m/%d",
];

/// LLM-backed extraction agent.
pub struct HealthDataExtractor {
    client: Arc<dyn CompletionClient>,
    schema_doc: Value,
    compiled: JSONSchema,
}

impl HealthDataExtractor {
    pub fn new(client: Arc<dyn CompletionClient>) -> Result<Self> {
        let schema_doc = extraction_schema();
        let compiled =
            JSONSchema::compile(&schema_doc).map_err(|e| LabFlowError::Internal {
                message: format!("invalid extraction schema: {e}"),
            })?;
        Ok(Self {
            client,
            schema_doc,
            compiled,
        })
    }
}

fn extraction_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "markers": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "marker": {"type": "string"},
                        "value": {"type": "string"},
                        "unit": {"type": ["string", "null"]},
                        "reference_range": {"type": ["string", "null"]}
                    }
                }
            },
            "document_type": {"type": ["string", "null"]},
            "test_date": {"type": ["string", "null"]}
        },
        "required": ["markers"]
    })
}

fn marker_from_value(item: &Value) -> Option<HealthMarker> {
    let marker = repair::string_field(item, "marker")?;
    let value = repair::string_field(item, "value")?;
    Some(HealthMarker {
        marker,
        value,
        unit: repair::string_field(item, "unit"),
        reference_range: repair::string_field(item, "reference_range"),
    })
}

/// Best-effort normalization of a report date to an ISO-8601 date.
pub fn parse_test_date(text: &str) -> Option<NaiveDate> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(trimmed, format).ok())
}

#[async_trait]
impl ExtractionAgent for HealthDataExtractor {
    #[instrument(skip(self, raw_text), fields(text_len = raw_text.len()))]
    async fn extract(&self, raw_text: &str) -> Result<HealthDataExtraction> {
        let content = self
            .client
            .complete_json(EXTRACTION_SYSTEM_PROMPT, raw_text)
            .await?;

        let value = repair::parse_validated(&content, &self.schema_doc, &self.compiled).map_err(
            |e: RepairError| LabFlowError::ExtractionMalformed {
                message: e.to_string(),
            },
        )?;

        let mut markers = Vec::new();
        if let Some(items) = value.get("markers").and_then(Value::as_array) {
            for item in items {
                match marker_from_value(item) {
                    Some(marker) => markers.push(marker),
                    None => warn!(item = %item, "dropping malformed marker"),
                }
            }
        }
        if markers.is_empty() {
            warn!("extraction produced zero markers");
        }

        let document_type = repair::string_field(&value, "document_type")
            .unwrap_or_else(|| "Lab Report".to_string());
        let test_date = value
            .get("test_date")
            .and_then(Value::as_str)
            .and_then(parse_test_date);

        debug!(markers = markers.len(), %document_type, "extraction completed");
        Ok(HealthDataExtraction {
            markers,
            document_type,
            test_date,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::mock;

    mock! {
        Client {}

        #[async_trait]
        impl CompletionClient for Client {
            async fn complete_json(&self, system: &str, user: &str) -> Result<String>;
        }
    }

    fn extractor_with_response(response: &'static str) -> HealthDataExtractor {
        let mut client = MockClient::new();
        client
            .expect_complete_json()
            .returning(move |_, _| Ok(response.to_string()));
        HealthDataExtractor::new(Arc::new(client)).unwrap()
    }

    #[tokio::test]
    async fn extracts_a_marker() {
        let extractor = extractor_with_response(
            r#"{"markers":[{"marker":"Hemoglobin","value":"14.5","unit":"g/dL","reference_range":"13.5-17.5"}],"document_type":"Blood Test Report","test_date":"2024-03-05"}"#,
        );
        let extraction = extractor.extract("Hemoglobin 14.5 g/dL (13.5-17.5)").await.unwrap();

        assert_eq!(extraction.markers.len(), 1);
        let marker = &extraction.markers[0];
        assert_eq!(marker.marker, "Hemoglobin");
        assert_eq!(marker.value, "14.5");
        assert_eq!(marker.unit.as_deref(), Some("g/dL"));
        assert_eq!(extraction.document_type, "Blood Test Report");
        assert_eq!(
            extraction.test_date,
            Some(NaiveDate::from_ymd_opt(2024, 3, 5).unwrap())
        );
    }

    #[tokio::test]
    async fn fenced_response_is_repaired() {
        let extractor = extractor_with_response("```json{\"markers\":[]}```");
        let extraction = extractor.extract("no markers here").await.unwrap();
        assert!(extraction.markers.is_empty());
        assert_eq!(extraction.document_type, "Lab Report");
    }

    #[tokio::test]
    async fn numeric_values_are_coerced_to_strings() {
        let extractor = extractor_with_response(
            r#"{"markers":[{"marker":"Glucose","value":90,"unit":"mg/dL","reference_range":"70 - 100"}]}"#,
        );
        let extraction = extractor.extract("Glucose 90").await.unwrap();
        assert_eq!(extraction.markers[0].value, "90");
    }

    #[tokio::test]
    async fn malformed_markers_are_dropped_not_fatal() {
        let extractor = extractor_with_response(
            r#"{"markers":[{"marker":"","value":"1"},{"value":"2"},{"marker":"WBC","value":"7.1"}]}"#,
        );
        let extraction = extractor.extract("WBC 7.1").await.unwrap();
        assert_eq!(extraction.markers.len(), 1);
        assert_eq!(extraction.markers[0].marker, "WBC");
    }

    #[tokio::test]
    async fn non_object_response_is_extraction_malformed() {
        let extractor = extractor_with_response("I could not find any lab values, sorry.");
        let err = extractor.extract("text").await.unwrap_err();
        assert_eq!(err.kind(), "extraction_malformed");
    }

    #[tokio::test]
    async fn missing_markers_key_is_extraction_malformed() {
        let extractor = extractor_with_response(r#"{"document_type":"Blood Test Report"}"#);
        let err = extractor.extract("text").await.unwrap_err();
        assert_eq!(err.kind(), "extraction_malformed");
    }

    #[tokio::test]
    async fn provider_failure_passes_through() {
        let mut client = MockClient::new();
        client.expect_complete_json().returning(|_, _| {
            Err(LabFlowError::LlmUnavailable {
                message: "connection refused".to_string(),
                source: None,
            })
        });
        let extractor = HealthDataExtractor::new(Arc::new(client)).unwrap();
        let err = extractor.extract("text").await.unwrap_err();
        assert_eq!(err.kind(), "llm_unavailable");
    }

    #[test]
    fn date_formats_normalize() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
        assert_eq!(parse_test_date("2024-03-05"), Some(expected));
        assert_eq!(parse_test_date("05/03/2024"), Some(expected));
        assert_eq!(parse_test_date("March 5, 2024"), Some(expected));
        assert_eq!(parse_test_date("somewhere in spring"), None);
        assert_eq!(parse_test_date(""), None);
    }
}
