#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use studio::{
    CacheError, CacheStore, FileLoader, MemoryCache, ParquetArtifactSink, PathCatalog,
    SessionStore, StudioApi, StudioConfig,
};
use tempfile::TempDir;

pub const USER: &str = "ann";
pub const SALES: &str = "sales.csv";

pub const SALES_CSV: &str = "a,b,city,score\n1,10,Oslo,\n2,20,Lima,3.5\n3,30,Oslo,4.5\n";

pub struct Fixture {
    pub dir: TempDir,
    pub store: Arc<SessionStore>,
    pub api: StudioApi,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with(StudioConfig::default(), Arc::new(MemoryCache::new()))
    }

    pub fn with(config: StudioConfig, cache: Arc<dyn CacheStore>) -> Self {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(SALES), SALES_CSV).unwrap();
        let store = SessionStore::new(
            cache,
            Arc::new(PathCatalog::with_root(dir.path())),
            Arc::new(FileLoader::new(config.csv.clone())),
            config,
        )
        .with_artifacts(Arc::new(ParquetArtifactSink::new(dir.path().join("artifacts"))));
        let store = Arc::new(store);
        let api = StudioApi::new(store.clone());
        Self { dir, store, api }
    }

    pub fn write(&self, name: &str, contents: &str) {
        std::fs::write(self.dir.path().join(name), contents).unwrap();
    }
}

/// Cache double whose backend can be switched off
#[derive(Default)]
pub struct FlakyCache {
    inner: MemoryCache,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    fail_expire: AtomicBool,
}

impl FlakyCache {
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Only TTL refreshes fail; reads and writes still work
    pub fn fail_expire(&self, fail: bool) {
        self.fail_expire.store(fail, Ordering::SeqCst);
    }

    pub fn fail_everything(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn keys(&self) -> Vec<String> {
        self.inner.keys()
    }

    fn check(&self, flag: &AtomicBool) -> Result<(), CacheError> {
        if flag.load(Ordering::SeqCst) {
            Err(CacheError::Unavailable("connection refused by 10.0.0.7:6379".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CacheStore for FlakyCache {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError> {
        self.check(&self.fail_reads)?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), CacheError> {
        self.check(&self.fail_writes)?;
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        self.check(&self.fail_writes)?;
        self.inner.delete(key).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CacheError> {
        self.check(&self.fail_writes)?;
        self.check(&self.fail_expire)?;
        self.inner.expire(key, ttl).await
    }
}
