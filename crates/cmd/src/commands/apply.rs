use anyhow::{Result, anyhow};
use std::path::Path;

/// Operation text as JSON, from `--op` or from a file
///
/// Inline text is passed through untouched so the API reports malformed
/// operations itself. Files may be YAML or JSON and are normalized to JSON.
pub fn read_operation(inline: Option<&str>, file: Option<&Path>) -> Result<String> {
    match (inline, file) {
        (Some(json), None) => Ok(json.to_string()),
        (None, Some(path)) => {
            let text = std::fs::read_to_string(path)
                .map_err(|e| anyhow!("Failed to read operation file {}: {}", path.display(), e))?;
            let value: serde_json::Value = serde_yaml_ng::from_str(&text)
                .map_err(|e| anyhow!("Failed to parse operation file {}: {}", path.display(), e))?;
            Ok(serde_json::to_string(&value)?)
        }
        (Some(_), Some(_)) => Err(anyhow!("pass either --op or --op-file, not both")),
        (None, None) => Err(anyhow!("an operation is required; pass --op or --op-file")),
    }
}
