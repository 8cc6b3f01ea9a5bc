use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tracing::instrument;

use crate::backend::ObjectBackend;
use crate::entry::CachedEntry;
use crate::error::CoreResult;
use crate::eviction::{EvictionPolicy, Writeback};
use crate::key::DerivativeKey;
use crate::level::{CacheLevel, LevelStat};
use crate::stats::CacheStats;

/// A cache level backed by remote object storage used purely as a cache
/// tier (as opposed to [`crate::object_store::ObjectStore`], which is the
/// authoritative originals store). `atime` is best-effort, derived from the
/// backend's `last_modified`, since object stores don't track per-read
/// access time; the `newest` priority therefore degrades to
/// LRU-by-`last_modified` at this level.
pub struct ObjectCache {
    backend: Arc<dyn ObjectBackend>,
    priority: EvictionPolicy,
    writeback: Writeback,
    stats: Arc<CacheStats>,
}

impl ObjectCache {
    pub fn new(backend: Arc<dyn ObjectBackend>, priority: EvictionPolicy, writeback: Writeback, stats: Arc<CacheStats>) -> Self {
        Self { backend, priority, writeback, stats }
    }
}

fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

#[async_trait]
impl CacheLevel for ObjectCache {
    fn name(&self) -> &'static str {
        "object_cache"
    }

    #[instrument(skip(self), fields(level = "object_cache"))]
    async fn get(&self, key: &DerivativeKey) -> CoreResult<Option<CachedEntry>> {
        match self.backend.get(key.as_str()).await? {
            Some(bytes) => {
                self.stats.record_hit();
                let stat = self.backend.stat(key.as_str()).await?;
                let atime = stat.map(|s| s.last_modified).unwrap_or_else(now_secs);
                Ok(Some(CachedEntry { key: key.clone(), bytes, ctime: atime, atime, is_thumbnail: false }))
            }
            None => {
                self.stats.record_miss();
                Ok(None)
            }
        }
    }

    #[instrument(skip(self, entry), fields(level = "object_cache", key = %entry.key))]
    async fn put(&self, entry: CachedEntry) -> CoreResult<()> {
        self.backend.put(entry.key.as_str(), entry.bytes).await
    }

    async fn invalidate(&self, predicate: &(dyn Fn(&DerivativeKey) -> bool + Send + Sync)) -> CoreResult<()> {
        // This level has no local key index: invalidation walks the
        // invalidated identity's own prefix in the backend's namespace,
        // which is cheap since object stores expose prefix listing natively.
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
        // Object caches are typically unbounded from this crate's
        // perspective (the backend enforces its own retention); report an
        // effectively-unbounded stat so the eviction engine never triggers.
        Ok(LevelStat::default())
    }

    fn chain_next(&self) -> Option<Arc<dyn CacheLevel>> {
        None
    }

    fn priority(&self) -> EvictionPolicy {
        self.priority
    }

    fn writeback(&self) -> Writeback {
        self.writeback
    }
}
