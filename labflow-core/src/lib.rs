//! ABOUTME: Core types, error taxonomy, and capability traits for labflow
//! ABOUTME: Foundation layer shared by the gateways, agents, bus, and pipeline

pub mod error;
pub mod logging;
pub mod types;

pub mod traits {
    pub mod extractor;
    pub mod insight;
    pub mod object_store;
    pub mod ocr;
    pub mod record_store;
}

// Re-export commonly used types
pub use error::{LabFlowError, Result};
pub use traits::{
    extractor::ExtractionAgent,
    insight::InsightAgent,
    object_store::{StorageGateway, StoredObject},
    ocr::OcrAgent,
    record_store::{NewDocument, RecordStore},
};
pub use types::{
    AnalysisResult, Document, DocumentStatus, HealthDataExtraction, HealthInsights, HealthMarker,
    MimeKind, ProcessingStage, ProgressEvent,
};
