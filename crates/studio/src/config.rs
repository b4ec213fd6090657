//! Studio configuration
//!
//! Every field has a default, so an empty YAML document (or no file at all)
//! yields a usable configuration.
//!
//! ```yaml
//! session_ttl_secs: 7200
//! one_hot_max_categories: 50
//! csv:
//!   encodings: [utf-8, windows-1252]
//!   delimiters: [",", ";"]
//! ```

use crate::error::{Result, StudioError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// CSV sniffing and parsing options
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CsvConfig {
    /// Encodings tried in order when no byte-order mark is present
    #[serde(default = "default_encodings")]
    pub encodings: Vec<String>,

    /// Candidate delimiters, earlier entries win ties
    #[serde(default = "default_delimiters")]
    pub delimiters: Vec<char>,

    /// Number of non-empty lines sampled for delimiter detection
    #[serde(default = "default_sniff_lines")]
    pub sniff_lines: usize,

    /// Number of records sampled for type inference
    #[serde(default = "default_infer_max_records")]
    pub infer_max_records: usize,

    /// Number of records per decoded batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_encodings() -> Vec<String> {
    vec!["utf-8".to_string(), "windows-1252".to_string()]
}
fn default_delimiters() -> Vec<char> {
    vec![',', ';', '\t', '|']
}
fn default_sniff_lines() -> usize {
    20
}
fn default_infer_max_records() -> usize {
    1000
}
fn default_batch_size() -> usize {
    8192
}

impl Default for CsvConfig {
    fn default() -> Self {
        Self {
            encodings: default_encodings(),
            delimiters: default_delimiters(),
            sniff_lines: default_sniff_lines(),
            infer_max_records: default_infer_max_records(),
            batch_size: default_batch_size(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StudioConfig {
    /// Sliding expiration for idle sessions
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,

    /// Rows included in the preview of every response
    #[serde(default = "default_preview_rows")]
    pub preview_rows: usize,

    /// Default cap on one-hot indicator columns per source column
    #[serde(default = "default_one_hot_max_categories")]
    pub one_hot_max_categories: usize,

    /// Longest accepted feature expression, in bytes
    #[serde(default = "default_max_expression_len")]
    pub max_expression_len: usize,

    #[serde(default)]
    pub csv: CsvConfig,
}

fn default_session_ttl_secs() -> u64 {
    3600
}
fn default_preview_rows() -> usize {
    10
}
fn default_one_hot_max_categories() -> usize {
    20
}
fn default_max_expression_len() -> usize {
    1024
}

impl Default for StudioConfig {
    fn default() -> Self {
        Self {
            session_ttl_secs: default_session_ttl_secs(),
            preview_rows: default_preview_rows(),
            one_hot_max_categories: default_one_hot_max_categories(),
            max_expression_len: default_max_expression_len(),
            csv: CsvConfig::default(),
        }
    }
}

impl StudioConfig {
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        let config: StudioConfig = if text.trim().is_empty() {
            StudioConfig::default()
        } else {
            serde_yaml_ng::from_str(text).map_err(|e| StudioError::Config(e.to_string()))?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            StudioError::Config(format!("cannot read {}: {}", path.as_ref().display(), e))
        })?;
        Self::from_yaml(&text)
    }

    fn validate(&self) -> Result<()> {
        if self.session_ttl_secs == 0 {
            return Err(StudioError::Config("session_ttl_secs must be positive".into()));
        }
        if self.one_hot_max_categories == 0 {
            return Err(StudioError::Config("one_hot_max_categories must be positive".into()));
        }
        if self.csv.encodings.is_empty() {
            return Err(StudioError::Config("csv.encodings must not be empty".into()));
        }
        for label in &self.csv.encodings {
            if encoding_rs::Encoding::for_label(label.as_bytes()).is_none() {
                return Err(StudioError::Config(format!("unknown encoding '{}'", label)));
            }
        }
        if self.csv.delimiters.iter().any(|d| !d.is_ascii()) {
            return Err(StudioError::Config("csv.delimiters must be ASCII".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_yaml_gives_defaults() {
        let config = StudioConfig::from_yaml("").unwrap();
        assert_eq!(config.session_ttl_secs, 3600);
        assert_eq!(config.one_hot_max_categories, 20);
        assert_eq!(config.csv.delimiters, vec![',', ';', '\t', '|']);
    }

    #[test]
    fn test_partial_yaml_overrides() {
        let config = StudioConfig::from_yaml(
            "one_hot_max_categories: 5\ncsv:\n  encodings: [utf-8]\n",
        )
        .unwrap();
        assert_eq!(config.one_hot_max_categories, 5);
        assert_eq!(config.csv.encodings, vec!["utf-8".to_string()]);
        assert_eq!(config.csv.sniff_lines, 20);
        assert_eq!(config.preview_rows, 10);
    }

    #[test]
    fn test_rejects_unknown_encoding() {
        let err = StudioConfig::from_yaml("csv:\n  encodings: [klingon]\n").unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");
    }

    #[test]
    fn test_rejects_zero_ttl() {
        assert!(StudioConfig::from_yaml("session_ttl_secs: 0").is_err());
    }
}
