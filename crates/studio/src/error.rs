// Error types for Data Studio sessions

use std::path::PathBuf;

/// Errors raised while reading a data source into a table
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("Cannot read {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unsupported format for {path}: {reason}")]
    UnsupportedFormat { path: PathBuf, reason: String },

    #[error("Could not decode {path} with any of the attempted encodings: {}", attempted.join(", "))]
    Encoding { path: PathBuf, attempted: Vec<String> },

    #[error("Could not detect a consistent delimiter in {path}; attempted: {}", attempted.join(" "))]
    Delimiter { path: PathBuf, attempted: Vec<String> },

    #[error("Corrupt content in {path}: {message}")]
    Corrupt { path: PathBuf, message: String },

    #[error("Unknown data source '{source_id}'")]
    UnknownSource { source_id: String },
}

/// Errors raised by a cache backend
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cache backend unavailable: {0}")]
    Unavailable(String),
}

/// Session-level errors, one variant per outward error code
#[derive(Debug, thiserror::Error)]
pub enum StudioError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("No session for user '{user}' and source '{source_id}'")]
    NotFound { user: String, source_id: String },

    #[error("A session for user '{user}' and source '{source_id}' already exists; clear it first")]
    AlreadyInitialized { user: String, source_id: String },

    #[error("{0}")]
    InvalidColumns(String),

    #[error("{0}")]
    InvalidOperation(String),

    #[error("Cannot undo: already at earliest state")]
    NothingToUndo,

    #[error("Cannot redo: already at latest state")]
    NothingToRedo,

    #[error("Session store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Expression rejected: {0}")]
    ExpressionRejected(String),

    #[error("Session data is corrupt: {0}")]
    CorruptSession(String),

    #[error("Artifact error: {0}")]
    Artifact(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl StudioError {
    pub fn missing_column<S: AsRef<str>>(name: S) -> Self {
        StudioError::InvalidColumns(format!("column '{}' not found", name.as_ref()))
    }

    pub fn invalid_operation<S: Into<String>>(message: S) -> Self {
        StudioError::InvalidOperation(message.into())
    }

    pub fn rejected<S: Into<String>>(message: S) -> Self {
        StudioError::ExpressionRejected(message.into())
    }

    /// Stable code exposed to callers of the API surface
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            StudioError::Load(_) => "LOAD_ERROR",
            StudioError::NotFound { .. } => "NOT_FOUND",
            StudioError::AlreadyInitialized { .. } => "ALREADY_INITIALIZED",
            StudioError::InvalidColumns(_) => "INVALID_COLUMNS",
            StudioError::InvalidOperation(_) => "INVALID_OPERATION",
            StudioError::NothingToUndo => "NOTHING_TO_UNDO",
            StudioError::NothingToRedo => "NOTHING_TO_REDO",
            StudioError::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            StudioError::ExpressionRejected(_) => "EXPRESSION_REJECTED",
            StudioError::CorruptSession(_) => "SESSION_CORRUPT",
            StudioError::Artifact(_) => "ARTIFACT_ERROR",
            StudioError::Config(_) => "CONFIG_ERROR",
        }
    }

    /// Only store outages are worth retrying unchanged
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, StudioError::StoreUnavailable(_))
    }
}

impl From<CacheError> for StudioError {
    fn from(err: CacheError) -> StudioError {
        StudioError::StoreUnavailable(err.to_string())
    }
}

impl From<arrow_schema::ArrowError> for StudioError {
    fn from(err: arrow_schema::ArrowError) -> StudioError {
        StudioError::InvalidOperation(err.to_string())
    }
}

/// Result type for session operations
pub type Result<T> = std::result::Result<T, StudioError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_distinct() {
        let errors = [
            StudioError::NotFound { user: "u".into(), source_id: "s".into() },
            StudioError::AlreadyInitialized { user: "u".into(), source_id: "s".into() },
            StudioError::missing_column("x"),
            StudioError::invalid_operation("bad"),
            StudioError::NothingToUndo,
            StudioError::NothingToRedo,
            StudioError::StoreUnavailable("down".into()),
            StudioError::rejected("nope"),
        ];
        let mut codes: Vec<_> = errors.iter().map(StudioError::code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn test_cache_error_becomes_retryable_store_error() {
        let err: StudioError = CacheError::Unavailable("connection refused".into()).into();
        assert_eq!(err.code(), "STORE_UNAVAILABLE");
        assert!(err.is_retryable());
        assert!(!StudioError::NothingToUndo.is_retryable());
    }

    #[test]
    fn test_messages_name_the_problem() {
        assert_eq!(StudioError::missing_column("x").to_string(), "column 'x' not found");
        assert_eq!(
            StudioError::NothingToUndo.to_string(),
            "Cannot undo: already at earliest state"
        );
        let err = LoadError::Encoding {
            path: PathBuf::from("a.csv"),
            attempted: vec!["utf-8".into(), "windows-1252".into()],
        };
        assert!(err.to_string().contains("utf-8, windows-1252"));
    }
}
