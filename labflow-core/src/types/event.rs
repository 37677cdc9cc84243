//! ABOUTME: Progress events published on the bus as complete document snapshots
//! ABOUTME: A subscriber joining mid-flight can render state from any single event

use super::document::{Document, DocumentStatus, ProcessingStage};
use super::extraction::{HealthDataExtraction, HealthInsights};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A complete snapshot of a document's state, published whenever it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub document_id: String,
    pub status: DocumentStatus,
    pub processing_stage: ProcessingStage,
    pub progress: u8,
    pub filename: String,
    pub uploaded_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extracted_data: Option<HealthDataExtraction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_insights: Option<HealthInsights>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
}

impl ProgressEvent {
    /// Build the snapshot event for a document's current state.
    pub fn snapshot(document: &Document) -> Self {
        let (extracted_data, ai_insights) = match &document.analysis {
            Some(analysis) => {
                let extraction = analysis.extraction();
                let insights = HealthInsights {
                    data: extraction.clone(),
                    summary: analysis.summary.clone(),
                    key_findings: analysis.key_findings.clone(),
                    recommendations: analysis.recommendations.clone(),
                    disclaimer: analysis.disclaimer.clone(),
                };
                (Some(extraction), Some(insights))
            }
            None => (None, None),
        };

        Self {
            document_id: document.id.clone(),
            status: document.status,
            processing_stage: document.processing_stage,
            progress: document.progress,
            filename: document.filename.clone(),
            uploaded_at: document.uploaded_at,
            raw_text: document.raw_text.clone(),
            extracted_data,
            ai_insights,
            error_message: document.error_message.clone(),
            processed_at: document.processed_at,
        }
    }

    /// Terminal events end a progress stream.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::document::MimeKind;

    fn processing_document() -> Document {
        Document {
            id: "doc-1".to_string(),
            filename: "blood.pdf".to_string(),
            mime_kind: MimeKind::Pdf,
            uploaded_at: Utc::now(),
            storage_ref: "bucket/doc-1/blood.pdf".to_string(),
            fetch_url: "https://storage.example/signed/doc-1".to_string(),
            status: DocumentStatus::Processing,
            processing_stage: ProcessingStage::AiAnalysis,
            progress: 50,
            error_message: None,
            processed_at: None,
            raw_text: None,
            analysis: None,
        }
    }

    #[test]
    fn snapshot_mirrors_document_state() {
        let doc = processing_document();
        let event = ProgressEvent::snapshot(&doc);
        assert_eq!(event.document_id, doc.id);
        assert_eq!(event.status, DocumentStatus::Processing);
        assert_eq!(event.processing_stage, ProcessingStage::AiAnalysis);
        assert_eq!(event.progress, 50);
        assert!(!event.is_terminal());
        assert!(event.extracted_data.is_none());
    }

    #[test]
    fn snapshot_of_error_is_terminal() {
        let mut doc = processing_document();
        doc.status = DocumentStatus::Error;
        doc.error_message = Some("processing timed out".to_string());
        let event = ProgressEvent::snapshot(&doc);
        assert!(event.is_terminal());
        assert_eq!(event.error_message.as_deref(), Some("processing timed out"));
    }
}
