// Directory-backed cache: one file per key, surviving process restarts

use super::CacheStore;
use crate::error::CacheError;
use async_trait::async_trait;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

const HEADER_LEN: usize = 8;

/// Each entry is stored as `<root>/<sha256(key) hex>`, holding an 8-byte
/// big-endian expiry (unix milliseconds) followed by the value.
#[derive(Debug, Clone)]
pub struct DirCache {
    root: PathBuf,
}

impl DirCache {
    pub async fn open<P: Into<PathBuf>>(root: P) -> Result<Self, CacheError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(hex::encode(Sha256::digest(key.as_bytes())))
    }

    /// Remove every expired entry, returning how many were removed
    pub async fn purge_expired(&self) -> Result<usize, CacheError> {
        let mut removed = 0;
        let mut dir = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some() {
                continue;
            }
            if read_live(&path).await?.is_none() && remove_if_present(&path).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn now_millis() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or_default()
}

fn expiry_after(ttl: Duration) -> u64 {
    now_millis().saturating_add(u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX))
}

async fn remove_if_present(path: &Path) -> Result<bool, CacheError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Contents of a live entry; expired or truncated entries read as absent
async fn read_live(path: &Path) -> Result<Option<Vec<u8>>, CacheError> {
    let data = match tokio::fs::read(path).await {
        Ok(data) => data,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let Some(header) = data.get(..HEADER_LEN) else {
        return Ok(None);
    };
    let mut expiry = [0u8; HEADER_LEN];
    expiry.copy_from_slice(header);
    if u64::from_be_bytes(expiry) <= now_millis() {
        return Ok(None);
    }
    Ok(Some(data))
}

#[async_trait]
impl CacheStore for DirCache {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError> {
        let path = self.path_for(key);
        match read_live(&path).await? {
            Some(data) => Ok(Some(Bytes::from(data).slice(HEADER_LEN..))),
            None => {
                let _ = remove_if_present(&path).await?;
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), CacheError> {
        let path = self.path_for(key);
        let staging = path.with_extension(format!("tmp-{}", uuid7::uuid7()));

        let mut data = Vec::with_capacity(HEADER_LEN + value.len());
        data.extend_from_slice(&expiry_after(ttl).to_be_bytes());
        data.extend_from_slice(&value);

        // Write aside and rename so readers never see a partial entry.
        tokio::fs::write(&staging, &data).await?;
        if let Err(e) = tokio::fs::rename(&staging, &path).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let path = self.path_for(key);
        let live = read_live(&path).await?.is_some();
        let removed = remove_if_present(&path).await?;
        Ok(live && removed)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CacheError> {
        let path = self.path_for(key);
        if read_live(&path).await?.is_none() {
            let _ = remove_if_present(&path).await?;
            return Ok(false);
        }
        let mut file = tokio::fs::OpenOptions::new().write(true).open(&path).await?;
        file.write_all(&expiry_after(ttl).to_be_bytes()).await?;
        file.flush().await?;
        Ok(true)
    }
}
