//! ABOUTME: Extraction agent capability: raw text to validated health markers

use crate::error::Result;
use crate::types::HealthDataExtraction;
use async_trait::async_trait;

/// Structured extraction of health markers from OCR text.
///
/// Extraction is single-shot: schema failures surface as
/// `ExtractionMalformed` and are not retried by the pipeline.
#[async_trait]
pub trait ExtractionAgent: Send + Sync {
    async fn extract(&self, raw_text: &str) -> Result<HealthDataExtraction>;
}
