//! Data Studio session manager
//!
//! A user loads a tabular data source into a session, applies a sequence of
//! cleaning and feature operations, moves back and forth through the
//! resulting history, and finally saves the current table as an artifact.
//!
//! - [`loader`] reads CSV, Parquet and HTML spreadsheet exports into Arrow
//! - [`ops`] is the closed set of transformations and the pure applier
//! - [`expr`] is the arithmetic sandbox behind derived columns
//! - [`cache`] abstracts the key-value store sessions live in
//! - [`store`] keeps sessions, their history and cursor, one writer per key
//! - [`api`] translates results into stable outward error codes

pub mod api;
pub mod artifact;
pub mod cache;
pub mod codec;
pub mod config;
pub mod error;
pub mod expr;
pub mod history;
pub mod loader;
pub mod lock;
pub mod ops;
pub mod store;
pub mod table;

pub use api::{ApiError, ApiResponse, StudioApi};
pub use artifact::{ArtifactRecord, ArtifactRequest, ArtifactSink, ParquetArtifactSink};
pub use cache::{CacheStore, DirCache, MemoryCache};
pub use config::{CsvConfig, StudioConfig};
pub use error::{CacheError, LoadError, Result, StudioError};
pub use history::{HistoryEntry, OperationRecord, SessionInfo};
pub use loader::{
    DataFormat, DataSource, FileLoader, MapCatalog, PathCatalog, SourceCatalog, TableLoader,
};
pub use lock::FileKeyLock;
pub use ops::{ApplyContext, Operation};
pub use store::{SessionKey, SessionStore, SessionView};
