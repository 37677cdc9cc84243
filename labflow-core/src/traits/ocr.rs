//! ABOUTME: OCR agent capability: turn a fetchable document into raw text
//! ABOUTME: Implementations download the bytes themselves from the fetch URL

use crate::error::Result;
use crate::types::MimeKind;
use async_trait::async_trait;

/// Text extraction from an uploaded document.
///
/// Fails with `OcrTransient` on network errors or provider 5xx responses
/// (the orchestrator retries those) and `OcrPermanent` on 4xx or invalid
/// documents.
#[async_trait]
pub trait OcrAgent: Send + Sync {
    /// Download the document behind `fetch_url` and return its raw text.
    async fn extract_text(&self, fetch_url: &str, mime: MimeKind) -> Result<String>;
}
