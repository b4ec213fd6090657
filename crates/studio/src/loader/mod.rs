//! Data loader
//!
//! Reads a data source from disk into a single Arrow `RecordBatch`.
//! Loading is synchronous and side-effect free; the session store runs it on
//! a blocking thread.

use crate::config::CsvConfig;
use crate::error::LoadError;
use arrow::compute::concat_batches;
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

mod csv;
mod excelhtml;

/// File formats the loader understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataFormat {
    Csv,
    Parquet,
    /// A spreadsheet exported as an HTML table
    ExcelHtml,
}

impl DataFormat {
    /// Infer the format from a file extension
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "csv" | "tsv" | "txt" => Some(DataFormat::Csv),
            "parquet" | "pq" => Some(DataFormat::Parquet),
            "html" | "htm" | "xls" => Some(DataFormat::ExcelHtml),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            DataFormat::Csv => "csv",
            DataFormat::Parquet => "parquet",
            DataFormat::ExcelHtml => "excel_html",
        }
    }
}

/// A resolved data source: where it lives and, optionally, what it is
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSource {
    pub path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<DataFormat>,
}

impl DataSource {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            format: None,
        }
    }

    #[must_use]
    pub fn with_format(mut self, format: DataFormat) -> Self {
        self.format = Some(format);
        self
    }

    /// Declared format, else the one implied by the extension
    pub fn resolved_format(&self) -> Result<DataFormat, LoadError> {
        if let Some(format) = self.format {
            return Ok(format);
        }
        DataFormat::from_path(&self.path).ok_or_else(|| {
            let ext = self
                .path
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or_default()
                .to_ascii_lowercase();
            let reason = if matches!(ext.as_str(), "xlsx" | "xlsm" | "xlsb") {
                "binary Excel workbooks are not supported; export the sheet as CSV or HTML".to_string()
            } else if ext.is_empty() {
                "no file extension and no declared format".to_string()
            } else {
                format!("unrecognized extension '.{}'", ext)
            };
            LoadError::UnsupportedFormat {
                path: self.path.clone(),
                reason,
            }
        })
    }
}

/// Reads a data source into a table
pub trait TableLoader: Send + Sync {
    fn load(&self, source: &DataSource) -> Result<RecordBatch, LoadError>;
}

/// Maps caller-facing data-source identifiers to concrete sources
pub trait SourceCatalog: Send + Sync {
    fn resolve(&self, source_id: &str) -> Result<DataSource, LoadError>;
}

/// Treats the identifier as a path, optionally relative to a root directory
#[derive(Debug, Clone, Default)]
pub struct PathCatalog {
    root: Option<PathBuf>,
}

impl PathCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_root<P: Into<PathBuf>>(root: P) -> Self {
        Self {
            root: Some(root.into()),
        }
    }
}

impl SourceCatalog for PathCatalog {
    fn resolve(&self, source_id: &str) -> Result<DataSource, LoadError> {
        if source_id.trim().is_empty() {
            return Err(LoadError::UnknownSource {
                source_id: source_id.to_string(),
            });
        }
        let path = match &self.root {
            // Rooted ids stay inside the root: no absolute paths, no `..`.
            Some(root) => {
                let relative = Path::new(source_id);
                let confined = relative
                    .components()
                    .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
                if !confined {
                    return Err(LoadError::UnknownSource {
                        source_id: source_id.to_string(),
                    });
                }
                root.join(relative)
            }
            None => PathBuf::from(source_id),
        };
        Ok(DataSource::new(path))
    }
}

/// Explicitly registered sources
#[derive(Debug, Clone, Default)]
pub struct MapCatalog {
    sources: HashMap<String, DataSource>,
}

impl MapCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<S: Into<String>>(&mut self, source_id: S, source: DataSource) {
        let _ = self.sources.insert(source_id.into(), source);
    }
}

impl SourceCatalog for MapCatalog {
    fn resolve(&self, source_id: &str) -> Result<DataSource, LoadError> {
        self.sources
            .get(source_id)
            .cloned()
            .ok_or_else(|| LoadError::UnknownSource {
                source_id: source_id.to_string(),
            })
    }
}

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const OLE_MAGIC: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

/// Loader for files on the local filesystem
#[derive(Debug, Clone, Default)]
pub struct FileLoader {
    csv: CsvConfig,
}

impl FileLoader {
    pub fn new(csv: CsvConfig) -> Self {
        Self { csv }
    }
}

impl TableLoader for FileLoader {
    fn load(&self, source: &DataSource) -> Result<RecordBatch, LoadError> {
        let path = source.path.as_path();
        let format = source.resolved_format()?;
        let bytes = std::fs::read(path).map_err(|source| LoadError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;

        // A .xls file is often a real binary workbook rather than an HTML export.
        if bytes.starts_with(ZIP_MAGIC) || bytes.starts_with(OLE_MAGIC) {
            return Err(LoadError::UnsupportedFormat {
                path: path.to_path_buf(),
                reason: "binary Excel workbooks are not supported; export the sheet as CSV or HTML"
                    .to_string(),
            });
        }

        let batch = match format {
            DataFormat::Csv => csv::load(&bytes, path, &self.csv)?,
            DataFormat::Parquet => read_parquet(bytes, path)?,
            DataFormat::ExcelHtml => excelhtml::load(&bytes, path, &self.csv.encodings)?,
        };
        diagnostics::debug!(
            "Loaded {path} as {format}: {rows} rows, {columns} columns",
            path: path.display().to_string(),
            format: format.as_str(),
            rows: batch.num_rows(),
            columns: batch.num_columns()
        );
        Ok(batch)
    }
}

fn read_parquet(bytes: Vec<u8>, path: &Path) -> Result<RecordBatch, LoadError> {
    let corrupt = |message: String| LoadError::Corrupt {
        path: path.to_path_buf(),
        message,
    };
    let builder = ParquetRecordBatchReaderBuilder::try_new(bytes::Bytes::from(bytes))
        .map_err(|e| corrupt(e.to_string()))?;
    let schema = builder.schema().clone();
    let reader = builder.build().map_err(|e| corrupt(e.to_string()))?;
    let batches = reader
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| corrupt(e.to_string()))?;
    concat_batches(&schema, &batches).map_err(|e| corrupt(e.to_string()))
}
