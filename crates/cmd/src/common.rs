use std::env;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Result, anyhow};
use studio::{
    ApiResponse, DirCache, FileKeyLock, FileLoader, ParquetArtifactSink, PathCatalog, SessionKey,
    SessionStore, StudioApi, StudioConfig,
};

/// Environment variable naming the studio home directory
pub const HOME_ENV: &str = "STUDIO_HOME";

/// Environment variable naming the acting user
pub const USER_ENV: &str = "STUDIO_USER";

/// Configuration file looked up in the home directory when `--config` is absent
pub const CONFIG_FILE: &str = "studio.yaml";

/// Get the studio home with an optional override, falling back to STUDIO_HOME
pub fn get_home_with_override(override_path: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = override_path {
        return Ok(path);
    }

    env::var(HOME_ENV)
        .map_err(|_| anyhow!("{} environment variable not set", HOME_ENV))
        .map(PathBuf::from)
}

/// Get the acting user with an optional override, falling back to STUDIO_USER then USER
pub fn get_user_with_override(override_user: Option<String>) -> Result<String> {
    let user = override_user
        .or_else(|| env::var(USER_ENV).ok())
        .or_else(|| env::var("USER").ok())
        .ok_or_else(|| anyhow!("no user given; pass --user or set {}", USER_ENV))?;
    let user = user.trim().to_string();
    if user.is_empty() {
        return Err(anyhow!("user name must not be empty"));
    }
    Ok(user)
}

/// Sessions are keyed by source id, so the same file must always produce the
/// same id regardless of the working directory it was named from.
pub fn source_id(raw: &str) -> String {
    std::fs::canonicalize(raw)
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| raw.to_string())
}

/// An explicit `--config` must exist; the home default is optional
pub fn load_config(explicit: Option<&Path>, home: &Path) -> Result<StudioConfig> {
    if let Some(path) = explicit {
        return Ok(StudioConfig::from_file(path)?);
    }
    let default = home.join(CONFIG_FILE);
    if default.is_file() {
        Ok(StudioConfig::from_file(default)?)
    } else {
        Ok(StudioConfig::default())
    }
}

/// Wire a directory-backed store under `home`
///
/// Layout:
/// - `<home>/cache` holds session metadata and snapshots
/// - `<home>/artifacts` holds saved parquet files and their sidecars
pub async fn open_api(home: &Path, config: StudioConfig) -> Result<StudioApi> {
    let cache = DirCache::open(home.join("cache"))
        .await
        .map_err(|e| anyhow!("Failed to open session cache under {}: {}", home.display(), e))?;
    let loader = FileLoader::new(config.csv.clone());
    let store = SessionStore::new(
        Arc::new(cache),
        Arc::new(PathCatalog::new()),
        Arc::new(loader),
        config,
    )
    .with_artifacts(Arc::new(ParquetArtifactSink::new(home.join("artifacts"))));

    diagnostics::debug!("Opened studio home {home}", home: home.display().to_string());
    Ok(StudioApi::new(Arc::new(store)))
}

/// Exclusive hold on one session across processes sharing `home`
///
/// Lock files live in `<home>/locks`, one per session key.
pub async fn lock_session(home: &Path, user: &str, source: &str) -> Result<FileKeyLock> {
    let key = SessionKey::new(user, source).meta_key();
    FileKeyLock::acquire(&home.join("locks"), &key)
        .await
        .map_err(|e| anyhow!("Failed to lock session {}/{}: {}", user, source, e))
}

/// Pretty JSON, one response per invocation
pub fn write_response<W: Write>(out: &mut W, response: &ApiResponse) -> Result<()> {
    serde_json::to_writer_pretty(&mut *out, response)?;
    writeln!(out)?;
    out.flush()?;
    Ok(())
}
