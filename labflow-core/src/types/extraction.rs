//! ABOUTME: Transient agent payloads: extracted markers and generated insights
//! ABOUTME: Marker values are verbatim strings; numeric reading is a consumer concern

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One extracted health marker.
///
/// `value` preserves the original representation including sign and decimals;
/// the core never coerces it to a number. `reference_range` is the raw
/// extracted text and is never synthesized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthMarker {
    pub marker: String,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_range: Option<String>,
}

/// Output of the extraction agent: markers plus document metadata.
///
/// The marker list may be empty; an empty list is a soft anomaly, not a
/// failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthDataExtraction {
    pub markers: Vec<HealthMarker>,
    pub document_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_date: Option<NaiveDate>,
}

impl HealthDataExtraction {
    pub fn empty(document_type: impl Into<String>) -> Self {
        Self {
            markers: Vec::new(),
            document_type: document_type.into(),
            test_date: None,
        }
    }
}

/// Output of the insight agent. `data` is always the extractor's output,
/// reattached by the agent; the model is never trusted to echo it back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthInsights {
    pub data: HealthDataExtraction,
    pub summary: String,
    pub key_findings: Vec<String>,
    pub recommendations: Vec<String>,
    pub disclaimer: String,
}

/// Substring every disclaimer must carry.
pub const DISCLAIMER_MARKER: &str = "professional medical advice";

impl HealthInsights {
    /// Structural validity: non-empty summary and a disclaimer that carries
    /// the mandatory wording.
    pub fn is_well_formed(&self) -> bool {
        !self.summary.is_empty() && self.disclaimer.contains(DISCLAIMER_MARKER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_serializes_without_absent_fields() {
        let marker = HealthMarker {
            marker: "Hemoglobin".to_string(),
            value: "14.5".to_string(),
            unit: Some("g/dL".to_string()),
            reference_range: None,
        };
        let json = serde_json::to_value(&marker).unwrap();
        assert_eq!(json["value"], "14.5");
        assert!(json.get("reference_range").is_none());
    }

    #[test]
    fn well_formed_requires_disclaimer_wording() {
        let insights = HealthInsights {
            data: HealthDataExtraction::empty("Blood Test Report"),
            summary: "All values are within range.".to_string(),
            key_findings: vec![],
            recommendations: vec![],
            disclaimer: "This is not professional medical advice.".to_string(),
        };
        assert!(insights.is_well_formed());

        let mut bad = insights.clone();
        bad.disclaimer = "see a doctor".to_string();
        assert!(!bad.is_well_formed());
    }
}
