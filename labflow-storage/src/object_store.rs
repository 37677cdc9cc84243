//! ABOUTME: HTTP object-storage gateway: upload, signed fetch URLs, delete
//! ABOUTME: Speaks a storage REST API; the ref is the bucket-relative path

use async_trait::async_trait;
use labflow_core::error::{LabFlowError, Result};
use labflow_core::traits::object_store::{StorageGateway, StoredObject};
use labflow_core::types::MimeKind;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, instrument};
use uuid::Uuid;

/// Configuration for the storage REST endpoint.
#[derive(Debug, Clone)]
pub struct ObjectStoreConfig {
    /// Base URL including the storage prefix, e.g.
    /// `https://project.supabase.co/storage/v1`.
    pub endpoint: String,
    pub bucket: String,
    pub api_key: String,
    /// Signed URL lifetime; must outlive the pipeline's end-to-end deadline.
    pub signed_url_ttl: Duration,
    pub timeout: Duration,
}

impl ObjectStoreConfig {
    pub fn new(
        endpoint: impl Into<String>,
        bucket: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            bucket: bucket.into(),
            api_key: api_key.into(),
            signed_url_ttl: Duration::from_secs(3600),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Storage gateway over an HTTP storage API.
pub struct HttpObjectStore {
    http: reqwest::Client,
    config: ObjectStoreConfig,
}

impl HttpObjectStore {
    pub fn new(config: ObjectStoreConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LabFlowError::Configuration {
                message: format!("failed to build http client: {e}"),
            })?;
        Ok(Self { http, config })
    }

    fn base(&self) -> &str {
        self.config.endpoint.trim_end_matches('/')
    }

    fn object_path(filename: &str) -> String {
        format!("{}/{}", Uuid::new_v4(), sanitize_filename(filename))
    }

    async fn sign_url(&self, storage_ref: &str) -> Result<String> {
        let url = format!(
            "{}/object/sign/{}/{}",
            self.base(),
            self.config.bucket,
            storage_ref
        );
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&json!({"expiresIn": self.config.signed_url_ttl.as_secs()}))
            .send()
            .await
            .map_err(|e| LabFlowError::StorageUnavailable {
                message: format!("sign request failed: {e}"),
                source: Some(Box::new(e)),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(LabFlowError::StorageUnavailable {
                message: format!("sign request returned {status}"),
                source: None,
            });
        }

        let body: serde_json::Value =
            response
                .json()
                .await
                .map_err(|e| LabFlowError::StorageUnavailable {
                    message: format!("malformed sign response: {e}"),
                    source: Some(Box::new(e)),
                })?;
        let signed = body
            .get("signedURL")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| LabFlowError::StorageUnavailable {
                message: "sign response missing signedURL".to_string(),
                source: None,
            })?;
        Ok(format!("{}{signed}", self.base()))
    }
}

fn sanitize_filename(filename: &str) -> String {
    filename
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[async_trait]
impl StorageGateway for HttpObjectStore {
    #[instrument(skip(self, bytes), fields(bytes = bytes.len()))]
    async fn put(&self, bytes: &[u8], filename: &str, mime: MimeKind) -> Result<StoredObject> {
        let storage_ref = Self::object_path(filename);
        let url = format!(
            "{}/object/{}/{}",
            self.base(),
            self.config.bucket,
            storage_ref
        );

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .header(reqwest::header::CONTENT_TYPE, mime.as_mime())
            .body(bytes.to_vec())
            .send()
            .await
            .map_err(|e| LabFlowError::StorageUnavailable {
                message: format!("upload failed: {e}"),
                source: Some(Box::new(e)),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(LabFlowError::StorageUnavailable {
                message: format!("upload returned {status}"),
                source: None,
            });
        }

        let fetch_url = self.sign_url(&storage_ref).await?;
        debug!(%storage_ref, "object stored");
        Ok(StoredObject {
            storage_ref,
            fetch_url,
        })
    }

    #[instrument(skip(self))]
    async fn delete(&self, storage_ref: &str) -> Result<()> {
        let url = format!(
            "{}/object/{}/{}",
            self.base(),
            self.config.bucket,
            storage_ref
        );
        let response = self
            .http
            .delete(&url)
            .bearer_auth(&self.config.api_key)
            .send()
            .await
            .map_err(|e| LabFlowError::StorageUnavailable {
                message: format!("delete failed: {e}"),
                source: Some(Box::new(e)),
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(LabFlowError::not_found(format!("object {storage_ref}")));
        }
        if !status.is_success() {
            return Err(LabFlowError::StorageUnavailable {
                message: format!("delete returned {status}"),
                source: None,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filenames_are_sanitized() {
        assert_eq!(sanitize_filename("blood test (1).pdf"), "blood_test__1_.pdf");
        assert_eq!(sanitize_filename("report.pdf"), "report.pdf");
    }

    #[test]
    fn object_paths_are_unique_per_upload() {
        let a = HttpObjectStore::object_path("blood.pdf");
        let b = HttpObjectStore::object_path("blood.pdf");
        assert_ne!(a, b);
        assert!(a.ends_with("/blood.pdf"));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_storage_unavailable() {
        let mut config = ObjectStoreConfig::new("http://127.0.0.1:1", "documents", "key");
        config.timeout = Duration::from_millis(300);
        let store = HttpObjectStore::new(config).unwrap();

        let err = store
            .put(b"bytes", "blood.pdf", MimeKind::Pdf)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "storage_unavailable");
    }
}
