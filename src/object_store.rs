use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::instrument;

use crate::backend::{ObjectBackend, PresignMethod};
use crate::entry::CachedEntry;
use crate::error::CoreResult;
use crate::eviction::{EvictionPolicy, Writeback};
use crate::file_cache::FileCache;
use crate::key::DerivativeKey;
use crate::level::{CacheLevel, LevelStat};
use crate::stats::CacheStats;

/// A pre-signed URL cached for reuse, and the instant after which it must be
/// regenerated rather than handed out again.
#[derive(Clone, Debug)]
struct PresignedUrl {
    url: String,
    issued_at: u64,
    lifetime_secs: u64,
}

impl PresignedUrl {
    /// True once fewer than `lifetime - slack` seconds remain, per the
    /// reuse rule: a URL is reusable only while its remaining lifetime is
    /// still at least `lifetime - slack`.
    fn needs_refresh(&self, now: u64, slack_secs: u64) -> bool {
        let elapsed = now.saturating_sub(self.issued_at);
        let remaining = self.lifetime_secs.saturating_sub(elapsed);
        remaining < self.lifetime_secs.saturating_sub(slack_secs)
    }
}

/// The authoritative originals store. Unlike [`crate::object_cache::ObjectCache`],
/// this level is never itself evicted from by this crate — the backend is
/// the source of truth for originals — but it does support `use_file_cache`,
/// which writes a fetched remote object into a `FileCache` as a read-through
/// side effect, and pre-signed URL issuance with a reuse window.
pub struct ObjectStore {
    backend: Arc<dyn ObjectBackend>,
    file_cache: Option<Arc<FileCache>>,
    presigned: Mutex<HashMap<(String, PresignMethodKey), PresignedUrl>>,
    clock: Option<Arc<dyn Fn() -> u64 + Send + Sync>>,
    stats: Arc<CacheStats>,
    presign_reuses: AtomicU64,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
enum PresignMethodKey {
    Get,
    Put,
}

impl From<PresignMethod> for PresignMethodKey {
    fn from(m: PresignMethod) -> Self {
        match m {
            PresignMethod::Get => PresignMethodKey::Get,
            PresignMethod::Put => PresignMethodKey::Put,
        }
    }
}

fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

impl ObjectStore {
    pub fn new(backend: Arc<dyn ObjectBackend>, file_cache: Option<Arc<FileCache>>, stats: Arc<CacheStats>) -> Self {
        Self { backend, file_cache, presigned: Mutex::new(HashMap::new()), clock: None, stats, presign_reuses: AtomicU64::new(0) }
    }

    /// Injects a deterministic clock for tests exercising presign reuse/
    /// expiry without real sleeps.
    pub fn with_clock(mut self, clock: Arc<dyn Fn() -> u64 + Send + Sync>) -> Self {
        self.clock = Some(clock);
        self
    }

    fn now(&self) -> u64 {
        self.clock.as_ref().map(|c| c()).unwrap_or_else(now_secs)
    }

    /// Issues (or reuses) a pre-signed URL for `key`, valid for
    /// approximately `lifetime_secs` and regenerated once fewer than
    /// `slack_secs` remain of headroom before expiry.
    pub async fn presign(&self, key: &DerivativeKey, method: PresignMethod, lifetime_secs: u64, slack_secs: u64) -> CoreResult<String> {
        let cache_key = (key.as_str().to_string(), method.into());
        let now = self.now();
        if let Some(existing) = self.presigned.lock().get(&cache_key) {
            if !existing.needs_refresh(now, slack_secs) {
                self.presign_reuses.fetch_add(1, Ordering::Relaxed);
                return Ok(existing.url.clone());
            }
        }
        let url = self.backend.presign(key.as_str(), method, lifetime_secs).await?;
        self.presigned.lock().insert(cache_key, PresignedUrl { url: url.clone(), issued_at: now, lifetime_secs });
        Ok(url)
    }

    /// Number of times a cached pre-signed URL was handed out without
    /// regenerating against the backend.
    pub fn presign_reuse_count(&self) -> u64 {
        self.presign_reuses.load(Ordering::Relaxed)
    }

    /// Lists identities stored under `prefix`, delegated straight through to
    /// the backend (the only component with a durable, enumerable namespace).
    pub async fn list_prefix(&self, prefix: &str) -> CoreResult<Vec<String>> {
        self.backend.list_prefix(prefix).await
    }

    /// Fetches `key` from the backend and, if a `FileCache` is configured,
    /// populates it as a side effect — the read-through path spec'd for
    /// `use_file_cache`.
    pub async fn get_and_populate_file_cache(&self, key: &DerivativeKey) -> CoreResult<Option<CachedEntry>> {
        let entry = self.get(key).await?;
        if let (Some(entry), Some(file_cache)) = (&entry, &self.file_cache) {
            file_cache.put(entry.clone()).await?;
        }
        Ok(entry)
    }
}

#[async_trait]
impl CacheLevel for ObjectStore {
    fn name(&self) -> &'static str {
        "object_store"
    }

    #[instrument(skip(self), fields(level = "object_store"))]
    async fn get(&self, key: &DerivativeKey) -> CoreResult<Option<CachedEntry>> {
        match self.backend.get(key.as_str()).await? {
            Some(bytes) => {
                self.stats.record_hit();
                let stat = self.backend.stat(key.as_str()).await?;
                let atime = stat.map(|s| s.last_modified).unwrap_or_else(|| self.now());
                Ok(Some(CachedEntry { key: key.clone(), bytes, ctime: atime, atime, is_thumbnail: false }))
            }
            None => {
                self.stats.record_miss();
                Ok(None)
            }
        }
    }

    #[instrument(skip(self, entry), fields(level = "object_store", key = %entry.key))]
    async fn put(&self, entry: CachedEntry) -> CoreResult<()> {
        self.backend.put(entry.key.as_str(), entry.bytes).await
    }

    async fn invalidate(&self, predicate: &(dyn Fn(&DerivativeKey) -> bool + Send + Sync)) -> CoreResult<()> {
        let all = self.backend.list_prefix("").await?;
        for raw_key in all {
            let key = DerivativeKey::new(&crate::identity::ImageIdentity::new(raw_key.clone()), &crate::key::TransformParams::None);
            if predicate(&key) {
                self.backend.delete(&raw_key).await?;
            }
        }
        Ok(())
    }

    async fn stat(&self) -> CoreResult<LevelStat> {
        Ok(LevelStat::default())
    }

    fn chain_next(&self) -> Option<Arc<dyn CacheLevel>> {
        None
    }

    fn priority(&self) -> EvictionPolicy {
        EvictionPolicy::default_policy()
    }

    fn writeback(&self) -> Writeback {
        Writeback::Never
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use crate::identity::ImageIdentity;
    use crate::key::TransformParams;
    use std::sync::atomic::AtomicU64 as StdAtomicU64;

    fn key(name: &str) -> DerivativeKey {
        DerivativeKey::new(&ImageIdentity::new(name), &TransformParams::None)
    }

    #[tokio::test]
    async fn presign_is_reused_while_well_within_lifetime() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.put(key("a").as_str(), vec![1]).await.unwrap();
        let store = ObjectStore::new(backend, None, Arc::new(CacheStats::new()));
        let first = store.presign(&key("a"), PresignMethod::Get, 1000, 100).await.unwrap();
        let second = store.presign(&key("a"), PresignMethod::Get, 1000, 100).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(store.presign_reuse_count(), 1);
    }

    #[tokio::test]
    async fn presign_regenerates_once_inside_the_slack_window() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.put(key("a").as_str(), vec![1]).await.unwrap();
        let clock = Arc::new(StdAtomicU64::new(0));
        let clock_for_store = clock.clone();
        let store = ObjectStore::new(backend, None, Arc::new(CacheStats::new()))
            .with_clock(Arc::new(move || clock_for_store.load(Ordering::Relaxed)));
        let first = store.presign(&key("a"), PresignMethod::Get, 100, 20).await.unwrap();
        clock.store(85, Ordering::Relaxed);
        let second = store.presign(&key("a"), PresignMethod::Get, 100, 20).await.unwrap();
        assert_ne!(first, second);
    }
}
