//! ABOUTME: PostgreSQL record store over deadpool with embedded migrations
//! ABOUTME: Enforces monotonic progress and atomic analysis writes in SQL

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use labflow_core::error::{LabFlowError, Result};
use labflow_core::traits::record_store::{NewDocument, RecordStore};
use labflow_core::types::{
    AnalysisResult, Document, DocumentStatus, HealthInsights, HealthMarker, MimeKind,
    ProcessingStage,
};
use tokio_postgres::{NoTls, Row};
use tracing::{debug, info, instrument};

mod embedded {
    use refinery::embed_migrations;
    embed_migrations!("migrations");
}

/// Connection configuration for the Postgres record store.
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub connection_string: String,
    pub max_pool_size: usize,
}

impl PostgresConfig {
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: connection_string.into(),
            max_pool_size: 16,
        }
    }

    pub fn with_max_pool_size(mut self, max_pool_size: usize) -> Self {
        self.max_pool_size = max_pool_size;
        self
    }
}

/// Record store backed by PostgreSQL.
pub struct PostgresRecordStore {
    pool: Pool,
}

impl PostgresRecordStore {
    /// Connect, build the pool, and run pending migrations.
    pub async fn connect(config: PostgresConfig) -> Result<Self> {
        let pg_config: tokio_postgres::Config = config
            .connection_string
            .parse()
            .map_err(|e: tokio_postgres::Error| LabFlowError::Configuration {
                message: format!("invalid connection string: {e}"),
            })?;

        let manager = Manager::from_config(
            pg_config,
            NoTls,
            ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            },
        );
        let pool = Pool::builder(manager)
            .max_size(config.max_pool_size)
            .build()
            .map_err(|e| LabFlowError::Configuration {
                message: format!("failed to build pool: {e}"),
            })?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!(max_pool_size = config.max_pool_size, "postgres record store ready");
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<()> {
        let mut client = self.client().await?;
        let report = embedded::migrations::runner()
            .run_async(&mut **client)
            .await
            .map_err(|e| LabFlowError::RecordStoreUnavailable {
                message: format!("migration failed: {e}"),
                source: Some(Box::new(e)),
            })?;
        debug!(applied = report.applied_migrations().len(), "migrations checked");
        Ok(())
    }

    /// Cheap connectivity probe.
    pub async fn is_healthy(&self) -> bool {
        match self.client().await {
            Ok(client) => client.simple_query("SELECT 1").await.is_ok(),
            Err(_) => false,
        }
    }

    async fn client(&self) -> Result<Object> {
        self.pool
            .get()
            .await
            .map_err(|e| LabFlowError::RecordStoreUnavailable {
                message: format!("failed to acquire connection: {e}"),
                source: Some(Box::new(e)),
            })
    }

    fn db_err(e: tokio_postgres::Error) -> LabFlowError {
        LabFlowError::RecordStoreUnavailable {
            message: e.to_string(),
            source: Some(Box::new(e)),
        }
    }

    fn row_to_document(row: &Row) -> Result<Document> {
        let status_text: String = row.get("status");
        let stage_text: String = row.get("processing_stage");
        let mime_text: String = row.get("mime_kind");
        let progress: i32 = row.get("progress");

        Ok(Document {
            id: row.get("id"),
            filename: row.get("filename"),
            mime_kind: MimeKind::parse(&mime_text).ok_or_else(|| LabFlowError::Internal {
                message: format!("unknown mime kind in store: {mime_text}"),
            })?,
            uploaded_at: row.get("uploaded_at"),
            storage_ref: row.get("storage_ref"),
            fetch_url: row.get("fetch_url"),
            status: DocumentStatus::parse(&status_text).ok_or_else(|| {
                LabFlowError::Internal {
                    message: format!("unknown status in store: {status_text}"),
                }
            })?,
            processing_stage: ProcessingStage::parse(&stage_text).ok_or_else(|| {
                LabFlowError::Internal {
                    message: format!("unknown stage in store: {stage_text}"),
                }
            })?,
            progress: u8::try_from(progress.clamp(0, 100)).unwrap_or(100),
            error_message: row.get("error_message"),
            processed_at: row.get("processed_at"),
            raw_text: row.get("raw_text"),
            analysis: None,
        })
    }

    async fn load_analysis(client: &Object, document: &mut Document) -> Result<()> {
        let Some(row) = client
            .query_opt(
                "SELECT id, summary, key_findings, recommendations, disclaimer, \
                 document_type, test_date FROM analysis_results WHERE document_id = $1",
                &[&document.id],
            )
            .await
            .map_err(Self::db_err)?
        else {
            return Ok(());
        };

        let analysis_id: i64 = row.get("id");
        let key_findings: serde_json::Value = row.get("key_findings");
        let recommendations: serde_json::Value = row.get("recommendations");
        let test_date: Option<NaiveDate> = row.get("test_date");

        let marker_rows = client
            .query(
                "SELECT marker, value, unit, reference_range FROM health_markers \
                 WHERE analysis_id = $1 ORDER BY id",
                &[&analysis_id],
            )
            .await
            .map_err(Self::db_err)?;

        let markers = marker_rows
            .iter()
            .map(|marker_row| HealthMarker {
                marker: marker_row.get("marker"),
                value: marker_row.get("value"),
                unit: marker_row.get("unit"),
                reference_range: marker_row.get("reference_range"),
            })
            .collect();

        document.analysis = Some(AnalysisResult {
            raw_text: document.raw_text.clone().unwrap_or_default(),
            summary: row.get("summary"),
            key_findings: serde_json::from_value(key_findings).unwrap_or_default(),
            recommendations: serde_json::from_value(recommendations).unwrap_or_default(),
            disclaimer: row.get("disclaimer"),
            document_type: row.get("document_type"),
            test_date,
            markers,
        });
        Ok(())
    }
}

#[async_trait]
impl RecordStore for PostgresRecordStore {
    #[instrument(skip(self, new_document), fields(document_id = %new_document.document_id))]
    async fn create_document(&self, new_document: NewDocument) -> Result<Document> {
        let client = self.client().await?;
        client
            .execute(
                "INSERT INTO documents \
                 (id, filename, mime_kind, status, processing_stage, progress, storage_ref, fetch_url) \
                 VALUES ($1, $2, $3, 'processing', 'ocr_extraction', 0, $4, $5) \
                 ON CONFLICT (id) DO NOTHING",
                &[
                    &new_document.document_id,
                    &new_document.filename,
                    &new_document.mime_kind.as_str(),
                    &new_document.storage_ref,
                    &new_document.fetch_url,
                ],
            )
            .await
            .map_err(Self::db_err)?;

        self.get_document(&new_document.document_id).await
    }

    async fn get_document(&self, document_id: &str) -> Result<Document> {
        let client = self.client().await?;
        let row = client
            .query_opt("SELECT * FROM documents WHERE id = $1", &[&document_id])
            .await
            .map_err(Self::db_err)?
            .ok_or_else(|| LabFlowError::not_found(format!("document {document_id}")))?;

        let mut document = Self::row_to_document(&row)?;
        Self::load_analysis(&client, &mut document).await?;
        Ok(document)
    }

    async fn list_documents(&self) -> Result<Vec<Document>> {
        let client = self.client().await?;
        let rows = client
            .query("SELECT * FROM documents ORDER BY uploaded_at DESC", &[])
            .await
            .map_err(Self::db_err)?;

        let mut documents = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut document = Self::row_to_document(row)?;
            Self::load_analysis(&client, &mut document).await?;
            documents.push(document);
        }
        Ok(documents)
    }

    async fn delete_document(&self, document_id: &str) -> Result<()> {
        let client = self.client().await?;
        let rows = client
            .execute("DELETE FROM documents WHERE id = $1", &[&document_id])
            .await
            .map_err(Self::db_err)?;
        if rows == 0 {
            return Err(LabFlowError::not_found(format!("document {document_id}")));
        }
        Ok(())
    }

    async fn update_progress(
        &self,
        document_id: &str,
        stage: ProcessingStage,
        progress: u8,
    ) -> Result<()> {
        let client = self.client().await?;
        let progress = i32::from(progress);
        let rows = client
            .execute(
                "UPDATE documents SET processing_stage = $2, progress = $3, updated_at = now() \
                 WHERE id = $1 AND progress <= $3",
                &[&document_id, &stage.as_str(), &progress],
            )
            .await
            .map_err(Self::db_err)?;
        if rows > 0 {
            return Ok(());
        }

        let current = client
            .query_opt(
                "SELECT progress FROM documents WHERE id = $1",
                &[&document_id],
            )
            .await
            .map_err(Self::db_err)?;
        match current {
            None => Err(LabFlowError::not_found(format!("document {document_id}"))),
            Some(row) => {
                let current_progress: i32 = row.get("progress");
                Err(LabFlowError::InvariantViolation {
                    message: format!(
                        "progress cannot decrease from {current_progress} to {progress}"
                    ),
                })
            }
        }
    }

    #[instrument(skip(self, raw_text, insights))]
    async fn write_analysis(
        &self,
        document_id: &str,
        raw_text: &str,
        insights: &HealthInsights,
    ) -> Result<()> {
        let mut client = self.client().await?;
        let tx = client.transaction().await.map_err(Self::db_err)?;

        let rows = tx
            .execute(
                "UPDATE documents SET status = 'complete', processing_stage = 'complete', \
                 progress = 100, processed_at = now(), raw_text = $2, error_message = NULL, \
                 updated_at = now() WHERE id = $1",
                &[&document_id, &raw_text],
            )
            .await
            .map_err(Self::db_err)?;
        if rows == 0 {
            return Err(LabFlowError::not_found(format!("document {document_id}")));
        }

        tx.execute(
            "DELETE FROM analysis_results WHERE document_id = $1",
            &[&document_id],
        )
        .await
        .map_err(Self::db_err)?;

        let key_findings = serde_json::to_value(&insights.key_findings)
            .map_err(|e| LabFlowError::Internal {
                message: format!("failed to encode key findings: {e}"),
            })?;
        let recommendations = serde_json::to_value(&insights.recommendations).map_err(|e| {
            LabFlowError::Internal {
                message: format!("failed to encode recommendations: {e}"),
            }
        })?;

        let analysis_row = tx
            .query_one(
                "INSERT INTO analysis_results \
                 (document_id, summary, key_findings, recommendations, disclaimer, document_type, test_date) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING id",
                &[
                    &document_id,
                    &insights.summary,
                    &key_findings,
                    &recommendations,
                    &insights.disclaimer,
                    &insights.data.document_type,
                    &insights.data.test_date,
                ],
            )
            .await
            .map_err(Self::db_err)?;
        let analysis_id: i64 = analysis_row.get(0);

        let statement = tx
            .prepare(
                "INSERT INTO health_markers (analysis_id, marker, value, unit, reference_range) \
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .await
            .map_err(Self::db_err)?;
        for marker in &insights.data.markers {
            tx.execute(
                &statement,
                &[
                    &analysis_id,
                    &marker.marker,
                    &marker.value,
                    &marker.unit,
                    &marker.reference_range,
                ],
            )
            .await
            .map_err(Self::db_err)?;
        }

        tx.commit().await.map_err(Self::db_err)?;
        debug!(document_id, markers = insights.data.markers.len(), "analysis written");
        Ok(())
    }

    async fn mark_error(&self, document_id: &str, message: &str) -> Result<()> {
        let client = self.client().await?;
        let rows = client
            .execute(
                "UPDATE documents SET status = 'error', error_message = $2, updated_at = now() \
                 WHERE id = $1",
                &[&document_id, &message],
            )
            .await
            .map_err(Self::db_err)?;
        if rows == 0 {
            return Err(LabFlowError::not_found(format!("document {document_id}")));
        }
        Ok(())
    }

    async fn reset_for_retry(&self, document_id: &str) -> Result<Document> {
        let mut client = self.client().await?;
        let tx = client.transaction().await.map_err(Self::db_err)?;

        let row = tx
            .query_opt(
                "SELECT status FROM documents WHERE id = $1 FOR UPDATE",
                &[&document_id],
            )
            .await
            .map_err(Self::db_err)?
            .ok_or_else(|| LabFlowError::not_found(format!("document {document_id}")))?;
        let status: String = row.get("status");
        if status == DocumentStatus::Complete.as_str() {
            return Err(LabFlowError::NotRetryable {
                message: format!("document {document_id} is complete"),
            });
        }

        tx.execute(
            "DELETE FROM analysis_results WHERE document_id = $1",
            &[&document_id],
        )
        .await
        .map_err(Self::db_err)?;
        tx.execute(
            "UPDATE documents SET status = 'processing', processing_stage = 'ocr_extraction', \
             progress = 0, error_message = NULL, raw_text = NULL, processed_at = NULL, \
             updated_at = now() WHERE id = $1",
            &[&document_id],
        )
        .await
        .map_err(Self::db_err)?;
        tx.commit().await.map_err(Self::db_err)?;

        self.get_document(document_id).await
    }

    async fn find_stuck(&self, older_than: Duration) -> Result<Vec<String>> {
        let cutoff: DateTime<Utc> = Utc::now() - older_than;
        let client = self.client().await?;
        let rows = client
            .query(
                "SELECT id FROM documents WHERE status = 'processing' AND updated_at < $1",
                &[&cutoff],
            )
            .await
            .map_err(Self::db_err)?;
        Ok(rows.iter().map(|row| row.get("id")).collect())
    }
}
