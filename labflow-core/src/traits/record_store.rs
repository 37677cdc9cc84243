//! ABOUTME: Record store capability: CRUD on the Document aggregate
//! ABOUTME: Single source of truth for status, stage, progress, and analyses

use crate::error::Result;
use crate::types::{Document, HealthInsights, MimeKind, ProcessingStage};
use async_trait::async_trait;
use chrono::Duration;

/// Parameters for creating a document record.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub document_id: String,
    pub filename: String,
    pub mime_kind: MimeKind,
    pub storage_ref: String,
    pub fetch_url: String,
}

/// Persistence gateway for documents, analyses, and markers.
///
/// All operations are idempotent with respect to a stable document id.
/// Progress is monotonically non-decreasing while a document is processing;
/// the only sanctioned reset path is [`RecordStore::reset_for_retry`].
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Create a document in `processing`/`ocr_extraction`/`0`.
    async fn create_document(&self, new_document: NewDocument) -> Result<Document>;

    async fn get_document(&self, document_id: &str) -> Result<Document>;

    /// All documents in descending upload order.
    async fn list_documents(&self) -> Result<Vec<Document>>;

    /// Delete a document, cascading to its analysis and markers.
    async fn delete_document(&self, document_id: &str) -> Result<()>;

    /// Set stage and progress. Rejects progress decreases with
    /// `InvariantViolation`.
    async fn update_progress(
        &self,
        document_id: &str,
        stage: ProcessingStage,
        progress: u8,
    ) -> Result<()>;

    /// Persist the analysis and markers and flip the document to
    /// `complete`/`complete`/`100` with `processed_at` set. Observed as
    /// atomic by later readers.
    async fn write_analysis(
        &self,
        document_id: &str,
        raw_text: &str,
        insights: &HealthInsights,
    ) -> Result<()>;

    /// Set `status = error` with the given message, keeping stage/progress.
    async fn mark_error(&self, document_id: &str, message: &str) -> Result<()>;

    /// Clear error state and return to `processing`/`ocr_extraction`/`0`,
    /// discarding any previous analysis. Fails with `NotRetryable` when the
    /// document is complete.
    async fn reset_for_retry(&self, document_id: &str) -> Result<Document>;

    /// Ids of processing documents whose last progress write is older than
    /// the given age.
    async fn find_stuck(&self, older_than: Duration) -> Result<Vec<String>>;
}
