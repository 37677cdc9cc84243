//! ABOUTME: Storage gateway capability for original document bytes
//! ABOUTME: Returns a durable reference plus a time-limited fetch URL

use crate::error::Result;
use crate::types::MimeKind;
use async_trait::async_trait;

/// Result of storing a document's bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    /// Opaque, durable reference used for later deletion.
    pub storage_ref: String,
    /// Time-limited URL; must outlive the pipeline's end-to-end deadline.
    pub fetch_url: String,
}

/// Object storage for original uploads.
#[async_trait]
pub trait StorageGateway: Send + Sync {
    /// Upload bytes; fails with `StorageUnavailable` on transport errors.
    /// Not retried internally.
    async fn put(&self, bytes: &[u8], filename: &str, mime: MimeKind) -> Result<StoredObject>;

    /// Delete a stored object. Idempotent; `NotFound` is treated as success
    /// by callers.
    async fn delete(&self, storage_ref: &str) -> Result<()>;
}
