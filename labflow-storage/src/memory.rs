//! ABOUTME: In-memory record store and object store honoring every invariant
//! ABOUTME: Used by the integration suite and single-process local development

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use labflow_core::error::{LabFlowError, Result};
use labflow_core::traits::object_store::{StorageGateway, StoredObject};
use labflow_core::traits::record_store::{NewDocument, RecordStore};
use labflow_core::types::{
    AnalysisResult, Document, DocumentStatus, HealthInsights, MimeKind, ProcessingStage,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

struct StoredDocument {
    document: Document,
    updated_at: DateTime<Utc>,
}

/// In-memory implementation of the record store.
#[derive(Default)]
pub struct MemoryRecordStore {
    documents: RwLock<HashMap<String, StoredDocument>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn create_document(&self, new_document: NewDocument) -> Result<Document> {
        let mut documents = self.documents.write();
        if let Some(existing) = documents.get(&new_document.document_id) {
            return Ok(existing.document.clone());
        }

        let document = Document {
            id: new_document.document_id.clone(),
            filename: new_document.filename,
            mime_kind: new_document.mime_kind,
            uploaded_at: Utc::now(),
            storage_ref: new_document.storage_ref,
            fetch_url: new_document.fetch_url,
            status: DocumentStatus::Processing,
            processing_stage: ProcessingStage::OcrExtraction,
            progress: 0,
            error_message: None,
            processed_at: None,
            raw_text: None,
            analysis: None,
        };
        documents.insert(
            new_document.document_id,
            StoredDocument {
                document: document.clone(),
                updated_at: Utc::now(),
            },
        );
        Ok(document)
    }

    async fn get_document(&self, document_id: &str) -> Result<Document> {
        self.documents
            .read()
            .get(document_id)
            .map(|stored| stored.document.clone())
            .ok_or_else(|| LabFlowError::not_found(format!("document {document_id}")))
    }

    async fn list_documents(&self) -> Result<Vec<Document>> {
        let mut documents: Vec<Document> = self
            .documents
            .read()
            .values()
            .map(|stored| stored.document.clone())
            .collect();
        documents.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
        Ok(documents)
    }

    async fn delete_document(&self, document_id: &str) -> Result<()> {
        self.documents
            .write()
            .remove(document_id)
            .map(|_| ())
            .ok_or_else(|| LabFlowError::not_found(format!("document {document_id}")))
    }

    async fn update_progress(
        &self,
        document_id: &str,
        stage: ProcessingStage,
        progress: u8,
    ) -> Result<()> {
        let mut documents = self.documents.write();
        let stored = documents
            .get_mut(document_id)
            .ok_or_else(|| LabFlowError::not_found(format!("document {document_id}")))?;

        if progress < stored.document.progress {
            return Err(LabFlowError::InvariantViolation {
                message: format!(
                    "progress cannot decrease from {} to {}",
                    stored.document.progress, progress
                ),
            });
        }

        stored.document.processing_stage = stage;
        stored.document.progress = progress;
        stored.updated_at = Utc::now();
        Ok(())
    }

    async fn write_analysis(
        &self,
        document_id: &str,
        raw_text: &str,
        insights: &HealthInsights,
    ) -> Result<()> {
        let mut documents = self.documents.write();
        let stored = documents
            .get_mut(document_id)
            .ok_or_else(|| LabFlowError::not_found(format!("document {document_id}")))?;

        stored.document.analysis = Some(AnalysisResult {
            raw_text: raw_text.to_string(),
            summary: insights.summary.clone(),
            key_findings: insights.key_findings.clone(),
            recommendations: insights.recommendations.clone(),
            disclaimer: insights.disclaimer.clone(),
            document_type: insights.data.document_type.clone(),
            test_date: insights.data.test_date,
            markers: insights.data.markers.clone(),
        });
        stored.document.raw_text = Some(raw_text.to_string());
        stored.document.status = DocumentStatus::Complete;
        stored.document.processing_stage = ProcessingStage::Complete;
        stored.document.progress = 100;
        stored.document.processed_at = Some(Utc::now());
        stored.document.error_message = None;
        stored.updated_at = Utc::now();
        Ok(())
    }

    async fn mark_error(&self, document_id: &str, message: &str) -> Result<()> {
        let mut documents = self.documents.write();
        let stored = documents
            .get_mut(document_id)
            .ok_or_else(|| LabFlowError::not_found(format!("document {document_id}")))?;

        stored.document.status = DocumentStatus::Error;
        stored.document.error_message = Some(message.to_string());
        stored.updated_at = Utc::now();
        Ok(())
    }

    async fn reset_for_retry(&self, document_id: &str) -> Result<Document> {
        let mut documents = self.documents.write();
        let stored = documents
            .get_mut(document_id)
            .ok_or_else(|| LabFlowError::not_found(format!("document {document_id}")))?;

        if stored.document.status == DocumentStatus::Complete {
            return Err(LabFlowError::NotRetryable {
                message: format!("document {document_id} is complete"),
            });
        }

        stored.document.status = DocumentStatus::Processing;
        stored.document.processing_stage = ProcessingStage::OcrExtraction;
        stored.document.progress = 0;
        stored.document.error_message = None;
        stored.document.processed_at = None;
        stored.document.raw_text = None;
        stored.document.analysis = None;
        stored.updated_at = Utc::now();
        Ok(stored.document.clone())
    }

    async fn find_stuck(&self, older_than: Duration) -> Result<Vec<String>> {
        let cutoff = Utc::now() - older_than;
        Ok(self
            .documents
            .read()
            .values()
            .filter(|stored| {
                stored.document.status == DocumentStatus::Processing
                    && stored.updated_at < cutoff
            })
            .map(|stored| stored.document.id.clone())
            .collect())
    }
}

/// In-memory implementation of the storage gateway.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, storage_ref: &str) -> bool {
        self.objects.read().contains_key(storage_ref)
    }

    pub fn object_count(&self) -> usize {
        self.objects.read().len()
    }
}

#[async_trait]
impl StorageGateway for MemoryObjectStore {
    async fn put(&self, bytes: &[u8], filename: &str, _mime: MimeKind) -> Result<StoredObject> {
        let storage_ref = format!("mem/{}/{}", Uuid::new_v4(), filename);
        self.objects
            .write()
            .insert(storage_ref.clone(), bytes.to_vec());
        let fetch_url = format!("memory://{storage_ref}");
        Ok(StoredObject {
            storage_ref,
            fetch_url,
        })
    }

    async fn delete(&self, storage_ref: &str) -> Result<()> {
        self.objects
            .write()
            .remove(storage_ref)
            .map(|_| ())
            .ok_or_else(|| LabFlowError::not_found(format!("object {storage_ref}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use labflow_core::types::{HealthDataExtraction, HealthMarker};

    fn new_document(id: &str) -> NewDocument {
        NewDocument {
            document_id: id.to_string(),
            filename: "blood.pdf".to_string(),
            mime_kind: MimeKind::Pdf,
            storage_ref: format!("mem/{id}/blood.pdf"),
            fetch_url: format!("memory://mem/{id}/blood.pdf"),
        }
    }

    fn insights() -> HealthInsights {
        HealthInsights {
            data: HealthDataExtraction {
                markers: vec![HealthMarker {
                    marker: "Hemoglobin".to_string(),
                    value: "14.5".to_string(),
                    unit: Some("g/dL".to_string()),
                    reference_range: Some("13.5-17.5".to_string()),
                }],
                document_type: "Blood Test Report".to_string(),
                test_date: None,
            },
            summary: "Everything looks normal.".to_string(),
            key_findings: vec!["All values normal.".to_string()],
            recommendations: vec!["Keep it up.".to_string()],
            disclaimer: "Not professional medical advice.".to_string(),
        }
    }

    #[tokio::test]
    async fn create_is_idempotent_for_a_stable_id() {
        let store = MemoryRecordStore::new();
        let first = store.create_document(new_document("doc-1")).await.unwrap();
        let second = store.create_document(new_document("doc-1")).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(store.list_documents().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn create_delete_get_is_not_found() {
        let store = MemoryRecordStore::new();
        store.create_document(new_document("doc-1")).await.unwrap();
        store.delete_document("doc-1").await.unwrap();
        let err = store.get_document("doc-1").await.unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[tokio::test]
    async fn progress_decrease_is_rejected() {
        let store = MemoryRecordStore::new();
        store.create_document(new_document("doc-1")).await.unwrap();
        store
            .update_progress("doc-1", ProcessingStage::AiAnalysis, 50)
            .await
            .unwrap();

        let err = store
            .update_progress("doc-1", ProcessingStage::OcrExtraction, 10)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invariant_violation");

        let doc = store.get_document("doc-1").await.unwrap();
        assert_eq!(doc.progress, 50);
    }

    #[tokio::test]
    async fn write_analysis_flips_to_complete_atomically() {
        let store = MemoryRecordStore::new();
        store.create_document(new_document("doc-1")).await.unwrap();
        store
            .write_analysis("doc-1", "Hemoglobin 14.5 g/dL", &insights())
            .await
            .unwrap();

        let doc = store.get_document("doc-1").await.unwrap();
        assert_eq!(doc.status, DocumentStatus::Complete);
        assert_eq!(doc.processing_stage, ProcessingStage::Complete);
        assert_eq!(doc.progress, 100);
        assert!(doc.processed_at.is_some());
        let analysis = doc.analysis.unwrap();
        assert_eq!(analysis.markers.len(), 1);
        assert_eq!(analysis.raw_text, "Hemoglobin 14.5 g/dL");
    }

    #[tokio::test]
    async fn retry_after_complete_is_rejected() {
        let store = MemoryRecordStore::new();
        store.create_document(new_document("doc-1")).await.unwrap();
        store
            .write_analysis("doc-1", "text", &insights())
            .await
            .unwrap();

        let err = store.reset_for_retry("doc-1").await.unwrap_err();
        assert_eq!(err.kind(), "not_retryable");
    }

    #[tokio::test]
    async fn reset_for_retry_is_idempotent() {
        let store = MemoryRecordStore::new();
        store.create_document(new_document("doc-1")).await.unwrap();
        store.mark_error("doc-1", "ocr failed").await.unwrap();

        let first = store.reset_for_retry("doc-1").await.unwrap();
        let second = store.reset_for_retry("doc-1").await.unwrap();

        assert_eq!(first.status, DocumentStatus::Processing);
        assert_eq!(first.processing_stage, ProcessingStage::OcrExtraction);
        assert_eq!(first.progress, 0);
        assert!(first.error_message.is_none());
        assert_eq!(first.status, second.status);
        assert_eq!(first.progress, second.progress);
    }

    #[tokio::test]
    async fn reset_discards_previous_analysis() {
        let store = MemoryRecordStore::new();
        store.create_document(new_document("doc-1")).await.unwrap();
        store
            .write_analysis("doc-1", "text", &insights())
            .await
            .unwrap();
        // Simulate the watchdog flipping a wedged document.
        store.mark_error("doc-1", "processing timed out").await.unwrap();

        let doc = store.reset_for_retry("doc-1").await.unwrap();
        assert!(doc.analysis.is_none());
        assert!(doc.raw_text.is_none());
    }

    #[tokio::test]
    async fn find_stuck_only_reports_stale_processing_documents() {
        let store = MemoryRecordStore::new();
        store.create_document(new_document("doc-1")).await.unwrap();
        store.create_document(new_document("doc-2")).await.unwrap();
        store.mark_error("doc-2", "boom").await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        let stuck = store.find_stuck(Duration::zero()).await.unwrap();
        assert_eq!(stuck, vec!["doc-1".to_string()]);

        let none = store.find_stuck(Duration::minutes(5)).await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn mark_error_keeps_stage_and_progress() {
        let store = MemoryRecordStore::new();
        store.create_document(new_document("doc-1")).await.unwrap();
        store
            .update_progress("doc-1", ProcessingStage::AiAnalysis, 50)
            .await
            .unwrap();
        store.mark_error("doc-1", "llm unavailable").await.unwrap();

        let doc = store.get_document("doc-1").await.unwrap();
        assert_eq!(doc.status, DocumentStatus::Error);
        assert_eq!(doc.processing_stage, ProcessingStage::AiAnalysis);
        assert_eq!(doc.progress, 50);
        assert_eq!(doc.error_message.as_deref(), Some("llm unavailable"));
    }

    #[tokio::test]
    async fn object_store_round_trip_and_idempotent_delete() {
        let store = MemoryObjectStore::new();
        let stored = store
            .put(b"pdf bytes", "blood.pdf", MimeKind::Pdf)
            .await
            .unwrap();
        assert!(store.contains(&stored.storage_ref));
        assert!(stored.fetch_url.starts_with("memory://"));

        store.delete(&stored.storage_ref).await.unwrap();
        let err = store.delete(&stored.storage_ref).await.unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }
}
