//! ABOUTME: Document aggregate root with status, stage, and analysis child
//! ABOUTME: Mutated only by the orchestrator, the watchdog, and the public API

use super::extraction::{HealthDataExtraction, HealthMarker};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Accepted document media kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MimeKind {
    Pdf,
    Png,
    Jpeg,
}

impl MimeKind {
    /// Parse an IANA media type into a supported kind.
    pub fn from_mime(mime: &str) -> Option<Self> {
        match mime {
            "application/pdf" => Some(Self::Pdf),
            "image/png" => Some(Self::Png),
            "image/jpeg" | "image/jpg" => Some(Self::Jpeg),
            _ => None,
        }
    }

    /// The IANA media type for this kind.
    pub fn as_mime(&self) -> &'static str {
        match self {
            Self::Pdf => "application/pdf",
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Png => "png",
            Self::Jpeg => "jpeg",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pdf" => Some(Self::Pdf),
            "png" => Some(Self::Png),
            "jpeg" => Some(Self::Jpeg),
            _ => None,
        }
    }

    /// Whether the kind is a raster image rather than a paged document.
    pub fn is_image(&self) -> bool {
        matches!(self, Self::Png | Self::Jpeg)
    }
}

impl std::fmt::Display for MimeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Top-level document lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Processing,
    Complete,
    Error,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Complete => "complete",
            Self::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "processing" => Some(Self::Processing),
            "complete" => Some(Self::Complete),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    /// Terminal statuses end a progress stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Error)
    }
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Pipeline stage a document is currently in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStage {
    OcrExtraction,
    AiAnalysis,
    SavingResults,
    Complete,
    None,
}

impl ProcessingStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OcrExtraction => "ocr_extraction",
            Self::AiAnalysis => "ai_analysis",
            Self::SavingResults => "saving_results",
            Self::Complete => "complete",
            Self::None => "none",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ocr_extraction" => Some(Self::OcrExtraction),
            "ai_analysis" => Some(Self::AiAnalysis),
            "saving_results" => Some(Self::SavingResults),
            "complete" => Some(Self::Complete),
            "none" => Some(Self::None),
            _ => None,
        }
    }
}

impl std::fmt::Display for ProcessingStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Persisted analysis for one document: prose insights plus the extracted
/// markers. Created exactly once, in the saving stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub raw_text: String,
    pub summary: String,
    pub key_findings: Vec<String>,
    pub recommendations: Vec<String>,
    pub disclaimer: String,
    /// Inferred document kind, e.g. "Blood Test Report".
    pub document_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_date: Option<NaiveDate>,
    pub markers: Vec<HealthMarker>,
}

impl AnalysisResult {
    /// The extraction view of this analysis (markers plus metadata).
    pub fn extraction(&self) -> HealthDataExtraction {
        HealthDataExtraction {
            markers: self.markers.clone(),
            document_type: self.document_type.clone(),
            test_date: self.test_date,
        }
    }
}

/// An uploaded lab report: the aggregate root of the data model.
///
/// Invariants:
/// - `status == Complete` iff `processing_stage == Complete`, `progress == 100`,
///   `processed_at` is set, and `analysis` exists.
/// - `status == Error` implies a non-empty `error_message`.
/// - `progress` never decreases while `status == Processing` except through an
///   explicit retry reset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub filename: String,
    pub mime_kind: MimeKind,
    pub uploaded_at: DateTime<Utc>,
    /// Opaque reference into the object store.
    pub storage_ref: String,
    /// Time-limited URL for fetching the original bytes. May expire.
    pub fetch_url: String,
    pub status: DocumentStatus,
    pub processing_stage: ProcessingStage,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<AnalysisResult>,
}

impl Document {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mime_kind_round_trip() {
        assert_eq!(MimeKind::from_mime("application/pdf"), Some(MimeKind::Pdf));
        assert_eq!(MimeKind::from_mime("image/jpg"), Some(MimeKind::Jpeg));
        assert_eq!(MimeKind::from_mime("text/plain"), None);
        assert_eq!(MimeKind::parse(MimeKind::Png.as_str()), Some(MimeKind::Png));
    }

    #[test]
    fn stage_names_match_wire_format() {
        assert_eq!(ProcessingStage::OcrExtraction.as_str(), "ocr_extraction");
        assert_eq!(
            serde_json::to_string(&ProcessingStage::SavingResults).unwrap(),
            "\"saving_results\""
        );
        assert_eq!(
            ProcessingStage::parse("ai_analysis"),
            Some(ProcessingStage::AiAnalysis)
        );
    }

    #[test]
    fn terminal_statuses() {
        assert!(DocumentStatus::Complete.is_terminal());
        assert!(DocumentStatus::Error.is_terminal());
        assert!(!DocumentStatus::Processing.is_terminal());
    }
}
