//! ABOUTME: Data model for documents, extractions, insights, and progress events
//! ABOUTME: Wire representations are serde JSON; identities are UUID strings

mod document;
mod event;
mod extraction;

pub use document::{AnalysisResult, Document, DocumentStatus, MimeKind, ProcessingStage};
pub use event::ProgressEvent;
pub use extraction::{HealthDataExtraction, HealthInsights, HealthMarker, DISCLAIMER_MARKER};
