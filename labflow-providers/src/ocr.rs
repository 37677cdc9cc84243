//! ABOUTME: OCR provider client over the Mistral document OCR REST API
//! ABOUTME: Maps network errors and 5xx to transient, 4xx to permanent

use async_trait::async_trait;
use labflow_core::error::{LabFlowError, Result};
use labflow_core::traits::ocr::OcrAgent;
use labflow_core::types::MimeKind;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, instrument};

/// Configuration for the OCR provider.
#[derive(Debug, Clone)]
pub struct OcrConfig {
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    pub timeout: Duration,
}

impl OcrConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            endpoint: "https://api.mistral.ai".to_string(),
            api_key: api_key.into(),
            model: "mistral-ocr-latest".to_string(),
            timeout: Duration::from_secs(120),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

/// OCR agent backed by a Mistral-style `/v1/ocr` endpoint.
///
/// The provider downloads the document itself from the signed fetch URL;
/// only the URL crosses the wire here.
pub struct MistralOcrClient {
    http: reqwest::Client,
    config: OcrConfig,
}

#[derive(Debug, Deserialize)]
struct OcrResponse {
    pages: Vec<OcrPage>,
}

#[derive(Debug, Deserialize)]
struct OcrPage {
    markdown: String,
}

impl MistralOcrClient {
    pub fn new(config: OcrConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LabFlowError::Configuration {
                message: format!("failed to build http client: {e}"),
            })?;
        Ok(Self { http, config })
    }

    fn ocr_url(&self) -> String {
        format!("{}/v1/ocr", self.config.endpoint.trim_end_matches('/'))
    }

    fn document_payload(fetch_url: &str, mime: MimeKind) -> serde_json::Value {
        if mime.is_image() {
            json!({"type": "image_url", "image_url": fetch_url})
        } else {
            json!({"type": "document_url", "document_url": fetch_url})
        }
    }
}

#[async_trait]
impl OcrAgent for MistralOcrClient {
    #[instrument(skip(self, fetch_url), fields(mime = %mime))]
    async fn extract_text(&self, fetch_url: &str, mime: MimeKind) -> Result<String> {
        let body = json!({
            "model": self.config.model,
            "document": Self::document_payload(fetch_url, mime),
        });

        let response = self
            .http
            .post(self.ocr_url())
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LabFlowError::OcrTransient {
                message: format!("ocr request failed: {e}"),
            })?;

        let status = response.status();
        if status.is_server_error() {
            return Err(LabFlowError::OcrTransient {
                message: format!("ocr provider returned {status}"),
            });
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(LabFlowError::OcrPermanent {
                message: format!(
                    "ocr provider rejected document ({status}): {}",
                    detail.chars().take(200).collect::<String>()
                ),
            });
        }

        let parsed: OcrResponse =
            response
                .json()
                .await
                .map_err(|e| LabFlowError::OcrPermanent {
                    message: format!("malformed ocr response: {e}"),
                })?;

        let text = parsed
            .pages
            .iter()
            .map(|page| page.markdown.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        debug!(pages = parsed.pages.len(), text_len = text.len(), "ocr completed");
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_kind_follows_mime() {
        let pdf = MistralOcrClient::document_payload("https://u", MimeKind::Pdf);
        assert_eq!(pdf["type"], "document_url");

        let png = MistralOcrClient::document_payload("https://u", MimeKind::Png);
        assert_eq!(png["type"], "image_url");
    }

    #[test]
    fn page_markdown_is_joined() {
        let raw = r#"{"pages":[{"index":0,"markdown":"Hemoglobin 14.5"},{"index":1,"markdown":"Glucose 90"}]}"#;
        let parsed: OcrResponse = serde_json::from_str(raw).unwrap();
        let text = parsed
            .pages
            .iter()
            .map(|p| p.markdown.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        assert_eq!(text, "Hemoglobin 14.5\n\nGlucose 90");
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_transient() {
        let mut config = OcrConfig::new("key").with_endpoint("http://127.0.0.1:1");
        config.timeout = Duration::from_millis(300);
        let client = MistralOcrClient::new(config).unwrap();

        let err = client
            .extract_text("https://example/doc.pdf", MimeKind::Pdf)
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }
}
