//! ABOUTME: Error types and handling for labflow
//! ABOUTME: Provides the LabFlowError taxonomy and Result type alias

use thiserror::Error;

/// Boxed source error carried by transport-level failures.
pub type BoxedError = Box<dyn std::error::Error + Send + Sync>;

/// Error taxonomy for all labflow operations.
///
/// Every variant carries a short human-readable message. The HTTP surface
/// maps [`LabFlowError::kind`] to a status code; the pipeline preserves the
/// kind in a document's `error_message` when a run terminates in error.
#[derive(Debug, Error)]
pub enum LabFlowError {
    /// Rejected at upload (bad MIME kind, empty payload, oversized file).
    #[error("invalid input: {message}")]
    InputInvalid { message: String },

    /// Object storage transport failure.
    #[error("object storage unavailable: {message}")]
    StorageUnavailable {
        message: String,
        #[source]
        source: Option<BoxedError>,
    },

    /// Record store transport or query failure.
    #[error("record store unavailable: {message}")]
    RecordStoreUnavailable {
        message: String,
        #[source]
        source: Option<BoxedError>,
    },

    /// OCR failure worth retrying (network error or provider 5xx).
    #[error("ocr failed (transient): {message}")]
    OcrTransient { message: String },

    /// OCR failure that retrying cannot fix (provider 4xx, invalid document).
    #[error("ocr failed: {message}")]
    OcrPermanent { message: String },

    /// LLM provider transport failure or non-2xx response.
    #[error("llm provider unavailable: {message}")]
    LlmUnavailable {
        message: String,
        #[source]
        source: Option<BoxedError>,
    },

    /// Extraction model output did not match the expected shape after repair.
    #[error("extraction output malformed: {message}")]
    ExtractionMalformed { message: String },

    /// Insight model output did not match the expected shape after repair.
    #[error("insight output malformed: {message}")]
    InsightMalformed { message: String },

    /// A state transition that would break a documented invariant.
    #[error("invariant violation: {message}")]
    InvariantViolation { message: String },

    #[error("not found: {message}")]
    NotFound { message: String },

    /// Retry requested for a document that is already complete.
    #[error("not retryable: {message}")]
    NotRetryable { message: String },

    /// End-to-end pipeline deadline exceeded.
    #[error("timed out: {message}")]
    Timeout { message: String },

    #[error("configuration error: {message}")]
    Configuration { message: String },

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl LabFlowError {
    /// Stable kind discriminant, consumed by the HTTP layer for status
    /// mapping and embedded in terminal error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InputInvalid { .. } => "input_invalid",
            Self::StorageUnavailable { .. } => "storage_unavailable",
            Self::RecordStoreUnavailable { .. } => "record_store_unavailable",
            Self::OcrTransient { .. } => "ocr_transient",
            Self::OcrPermanent { .. } => "ocr_permanent",
            Self::LlmUnavailable { .. } => "llm_unavailable",
            Self::ExtractionMalformed { .. } => "extraction_malformed",
            Self::InsightMalformed { .. } => "insight_malformed",
            Self::InvariantViolation { .. } => "invariant_violation",
            Self::NotFound { .. } => "not_found",
            Self::NotRetryable { .. } => "not_retryable",
            Self::Timeout { .. } => "timeout",
            Self::Configuration { .. } => "configuration",
            Self::Internal { .. } => "internal",
        }
    }

    /// Whether the pipeline may retry the failed call in place.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::OcrTransient { .. })
    }

    /// Convenience constructor for not-found errors.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound {
            message: what.into(),
        }
    }
}

/// Convenience Result type alias.
pub type Result<T> = std::result::Result<T, LabFlowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        let err = LabFlowError::OcrTransient {
            message: "connection reset".to_string(),
        };
        assert_eq!(err.kind(), "ocr_transient");
        assert!(err.is_transient());

        let err = LabFlowError::NotRetryable {
            message: "document is complete".to_string(),
        };
        assert_eq!(err.kind(), "not_retryable");
        assert!(!err.is_transient());
    }

    #[test]
    fn messages_include_context() {
        let err = LabFlowError::Timeout {
            message: "processing timed out after 600s".to_string(),
        };
        assert!(err.to_string().contains("600s"));
    }
}
