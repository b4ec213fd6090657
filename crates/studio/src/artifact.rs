//! Persisting a finished session as a permanent artifact

use crate::error::{Result, StudioError};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parquet::arrow::ArrowWriter;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Everything a sink needs to persist the current snapshot
#[derive(Debug, Clone)]
pub struct ArtifactRequest {
    pub name: String,
    pub description: String,
    pub user: String,
    pub source: String,
    /// Operation descriptions from the original load to the saved snapshot
    pub lineage: Vec<String>,
    pub batch: RecordBatch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub id: String,
    pub name: String,
    pub description: String,
    pub user: String,
    pub source: String,
    pub created_at: DateTime<Utc>,
    pub rows: usize,
    pub columns: usize,
    pub lineage: Vec<String>,
    pub location: String,
}

#[async_trait]
pub trait ArtifactSink: Send + Sync {
    async fn persist(&self, request: ArtifactRequest) -> Result<ArtifactRecord>;
}

/// Writes `<id>.parquet` plus a `<id>.json` sidecar describing it
#[derive(Debug, Clone)]
pub struct ParquetArtifactSink {
    dir: PathBuf,
}

impl ParquetArtifactSink {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn artifact_error(context: &str, err: impl std::fmt::Display) -> StudioError {
    StudioError::Artifact(format!("{}: {}", context, err))
}

fn encode_parquet(batch: &RecordBatch) -> Result<Vec<u8>> {
    let mut writer = ArrowWriter::try_new(Vec::new(), batch.schema(), None)
        .map_err(|e| artifact_error("parquet writer", e))?;
    writer.write(batch).map_err(|e| artifact_error("parquet write", e))?;
    writer.into_inner().map_err(|e| artifact_error("parquet finish", e))
}

#[async_trait]
impl ArtifactSink for ParquetArtifactSink {
    async fn persist(&self, request: ArtifactRequest) -> Result<ArtifactRecord> {
        if request.name.trim().is_empty() {
            return Err(StudioError::Artifact("artifact name must not be empty".to_string()));
        }

        let id = uuid7::uuid7().to_string();
        let data_path = self.dir.join(format!("{}.parquet", id));
        let sidecar_path = self.dir.join(format!("{}.json", id));

        let batch = request.batch.clone();
        let data = tokio::task::spawn_blocking(move || encode_parquet(&batch))
            .await
            .map_err(|e| artifact_error("parquet task", e))??;

        let record = ArtifactRecord {
            id,
            name: request.name,
            description: request.description,
            user: request.user,
            source: request.source,
            created_at: Utc::now(),
            rows: request.batch.num_rows(),
            columns: request.batch.num_columns(),
            lineage: request.lineage,
            location: data_path.display().to_string(),
        };
        let sidecar = serde_json::to_vec_pretty(&record).map_err(|e| artifact_error("sidecar", e))?;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| artifact_error("create artifact directory", e))?;
        tokio::fs::write(&data_path, data)
            .await
            .map_err(|e| artifact_error("write parquet", e))?;
        if let Err(e) = tokio::fs::write(&sidecar_path, sidecar).await {
            let _ = tokio::fs::remove_file(&data_path).await;
            return Err(artifact_error("write sidecar", e));
        }

        diagnostics::info!(
            "Saved artifact {id} ({name}) with {rows} rows",
            id: record.id.clone(),
            name: record.name.clone(),
            rows: record.rows
        );
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow_array::record_batch;
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
    use tempfile::TempDir;

    fn request(name: &str) -> ArtifactRequest {
        ArtifactRequest {
            name: name.to_string(),
            description: "cleaned".to_string(),
            user: "ann".to_string(),
            source: "sales.csv".to_string(),
            lineage: vec!["Impute 'age' using mean".to_string()],
            batch: record_batch!(("age", Float64, [31.0, 40.5])).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_writes_parquet_and_sidecar() {
        let tmp = TempDir::new().unwrap();
        let sink = ParquetArtifactSink::new(tmp.path().join("artifacts"));
        let record = sink.persist(request("clean sales")).await.unwrap();

        assert_eq!(record.rows, 2);
        let file = std::fs::File::open(&record.location).unwrap();
        let reader = ParquetRecordBatchReaderBuilder::try_new(file).unwrap().build().unwrap();
        let rows: usize = reader.map(|b| b.unwrap().num_rows()).sum();
        assert_eq!(rows, 2);

        let sidecar = std::fs::read(sink.dir().join(format!("{}.json", record.id))).unwrap();
        let back: ArtifactRecord = serde_json::from_slice(&sidecar).unwrap();
        assert_eq!(back, record);
        assert_eq!(back.lineage, vec!["Impute 'age' using mean"]);
    }

    #[tokio::test]
    async fn test_empty_name_rejected() {
        let tmp = TempDir::new().unwrap();
        let sink = ParquetArtifactSink::new(tmp.path());
        let err = sink.persist(request("  ")).await.unwrap_err();
        assert_eq!(err.code(), "ARTIFACT_ERROR");
    }
}
