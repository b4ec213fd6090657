//! Key-value cache the session store persists into
//!
//! The store only needs get/set/delete/expire over string keys and opaque
//! byte values. Backends are injected as `Arc<dyn CacheStore>`.

use crate::error::CacheError;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

mod dir;

pub use dir::DirCache;

#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Value for `key`, or `None` if absent or expired
    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError>;

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), CacheError>;

    /// Returns whether the key existed
    async fn delete(&self, key: &str) -> Result<bool, CacheError>;

    /// Reset the time-to-live of a live key; returns false if the key is gone
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CacheError>;
}

struct Entry {
    value: Bytes,
    expires_at: Instant,
}

/// In-process cache
///
/// Expiry is lazy: an expired entry is dropped when it is next read, or by
/// `purge_expired`. Time comes from the tokio clock, so paused-clock tests
/// can advance past a TTL.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drop every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|_, e| e.expires_at > now);
        before - entries.len()
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries().values().filter(|e| e.expires_at > now).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live keys, sorted
    pub fn keys(&self) -> Vec<String> {
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .entries()
            .iter()
            .filter(|(_, e)| e.expires_at > now)
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError> {
        let now = Instant::now();
        let mut entries = self.entries();
        let live = entries
            .get(key)
            .filter(|e| e.expires_at > now)
            .map(|e| e.value.clone());
        if live.is_none() {
            let _ = entries.remove(key);
        }
        Ok(live)
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), CacheError> {
        let expires_at = Instant::now() + ttl;
        let _ = self
            .entries()
            .insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let now = Instant::now();
        Ok(self
            .entries()
            .remove(key)
            .is_some_and(|e| e.expires_at > now))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CacheError> {
        let now = Instant::now();
        let mut entries = self.entries();
        if let Some(entry) = entries.get_mut(key).filter(|e| e.expires_at > now) {
            entry.expires_at = now + ttl;
            return Ok(true);
        }
        let _ = entries.remove(key);
        Ok(false)
    }
}
