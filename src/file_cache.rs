use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::{debug, info, instrument, warn};

use crate::entry::CachedEntry;
use crate::error::{CoreError, CoreResult};
use crate::eviction::{self, EvictionCandidate, EvictionPolicy, EvictionThresholds, Writeback};
use crate::key::DerivativeKey;
use crate::level::{AlarmEvent, AlarmSink, CacheLevel, LevelStat};
use crate::stats::CacheStats;

/// Configuration for one [`FileCache`] instance.
#[derive(Clone, Debug)]
pub struct FileCacheConfig {
    pub root: PathBuf,
    pub max_bytes: Option<u64>,
    pub max_elements: Option<u64>,
    pub evict_start_ratio: f64,
    pub evict_stop_ratio: f64,
    pub priority: EvictionPolicy,
    pub writeback: Writeback,
    pub alarm_free_ratio: Option<f64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct IndexRecord {
    key: DerivativeKey,
    path: String,
    size: u64,
    ctime: u64,
    atime: u64,
    is_thumbnail: bool,
}

/// On-disk cache level. Blobs are sharded by the sha256 of the derivative
/// key under `root/<2-byte-prefix>/<remainder>`; a JSON-lines sidecar index
/// at `root/index.jsonl` is rewritten on every mutation and rebuilt by
/// scanning `root` at startup, deleting partial writes (a blob present
/// without an index entry, or an index entry whose blob is missing or whose
/// size disagrees) so a crash mid-write never serves truncated bytes.
pub struct FileCache {
    config: FileCacheConfig,
    index: RwLock<HashMap<DerivativeKey, IndexRecord>>,
    bytes_used: AtomicU64,
    next: Option<Arc<dyn CacheLevel>>,
    alarm_sink: Arc<dyn AlarmSink>,
    stats: Arc<CacheStats>,
}

fn shard_path(root: &Path, key: &DerivativeKey) -> PathBuf {
    let mut hasher = Sha256::new();
    hasher.update(key.as_str().as_bytes());
    let digest = hex::encode(hasher.finalize());
    root.join(&digest[0..2]).join(&digest[2..])
}

impl FileCache {
    /// Builds a `FileCache` and reconciles `root` against its index,
    /// deleting partial writes found along the way.
    pub async fn open(
        config: FileCacheConfig,
        next: Option<Arc<dyn CacheLevel>>,
        alarm_sink: Arc<dyn AlarmSink>,
        stats: Arc<CacheStats>,
    ) -> CoreResult<Self> {
        fs::create_dir_all(&config.root)
            .await
            .map_err(|e| CoreError::ConfigError(format!("cannot create file cache root: {e}")))?;
        let index = reconcile(&config.root).await?;
        let bytes_used = index.values().map(|r| r.size).sum();
        Ok(Self {
            config,
            index: RwLock::new(index),
            bytes_used: AtomicU64::new(bytes_used),
            next,
            alarm_sink,
            stats,
        })
    }

    fn thresholds(&self) -> EvictionThresholds {
        EvictionThresholds {
            start_ratio: self.config.evict_start_ratio,
            stop_ratio: self.config.evict_stop_ratio,
            max_elements: self.config.max_elements,
            stop_elements: self
                .config
                .max_elements
                .map(|max| (max as f64 * self.config.evict_stop_ratio) as u64),
        }
    }

    fn candidates(&self) -> Vec<EvictionCandidate> {
        self.index
            .read()
            .values()
            .map(|r| EvictionCandidate { key: r.key.clone(), size: r.size, ctime: r.ctime, atime: r.atime, is_thumbnail: r.is_thumbnail })
            .collect()
    }

    async fn remove(&self, key: &DerivativeKey) -> Option<IndexRecord> {
        let removed = self.index.write().remove(key);
        if let Some(record) = &removed {
            self.bytes_used.fetch_sub(record.size, Ordering::Relaxed);
            let _ = fs::remove_file(&record.path).await;
        }
        removed
    }

    fn check_alarm(&self, stat: &LevelStat) {
        if let Some(threshold) = self.config.alarm_free_ratio {
            let free_ratio = stat.free_byte_ratio();
            if free_ratio < threshold {
                self.stats.record_alarm();
                self.alarm_sink.alarm(AlarmEvent { level_name: self.name(), free_ratio, threshold });
            }
        }
    }

    async fn maybe_evict(&self) -> CoreResult<()> {
        let stat = self.current_stat();
        if !eviction::should_start(&stat, &self.thresholds()) {
            self.check_alarm(&stat);
            return Ok(());
        }
        let evicted_keys = eviction::run_pass(stat, self.candidates(), self.config.priority, self.thresholds());
        for key in evicted_keys {
            if let Some(record) = self.remove(&key).await {
                self.stats.record_eviction();
                self.write_back(record).await;
            }
        }
        let stat = self.current_stat();
        self.check_alarm(&stat);
        Ok(())
    }

    async fn write_back(&self, record: IndexRecord) {
        let Some(next) = self.next.clone() else { return };
        if self.config.writeback == Writeback::Never {
            return;
        }
        let Ok(bytes) = fs::read(&record.path).await else { return };
        let entry = CachedEntry { key: record.key, bytes, ctime: record.ctime, atime: record.atime, is_thumbnail: record.is_thumbnail };
        match next.put(entry).await {
            Ok(()) => self.stats.record_writeback(),
            Err(err) => {
                debug!(level = self.name(), error = %err, "writeback dropped");
                self.stats.record_writeback_drop();
            }
        }
    }

    fn current_stat(&self) -> LevelStat {
        LevelStat {
            bytes_used: self.bytes_used.load(Ordering::Relaxed),
            max_bytes: self.config.max_bytes,
            elements_used: self.index.read().len() as u64,
            max_elements: self.config.max_elements,
        }
    }
}

async fn reconcile(root: &Path) -> CoreResult<HashMap<DerivativeKey, IndexRecord>> {
    let index_path = root.join("index.jsonl");
    let mut index = HashMap::new();
    if let Ok(contents) = fs::read_to_string(&index_path).await {
        for line in contents.lines() {
            if let Ok(record) = serde_json::from_str::<IndexRecord>(line) {
                match fs::metadata(&record.path).await {
                    Ok(meta) if meta.len() == record.size => {
                        index.insert(record.key.clone(), record);
                    }
                    _ => {
                        warn!(path = %record.path, "dropping partial file cache entry during reconciliation");
                        let _ = fs::remove_file(&record.path).await;
                    }
                }
            }
        }
    }
    info!(entries = index.len(), "file cache reconciled");
    Ok(index)
}

async fn persist_index(root: &Path, index: &HashMap<DerivativeKey, IndexRecord>) -> CoreResult<()> {
    let mut buf = String::new();
    for record in index.values() {
        buf.push_str(&serde_json::to_string(record).map_err(|e| CoreError::StoreError { status: 0, message: e.to_string() })?);
        buf.push('\n');
    }
    fs::write(root.join("index.jsonl"), buf).await.map_err(|e| CoreError::StoreError { status: 0, message: e.to_string() })
}

#[async_trait]
impl CacheLevel for FileCache {
    fn name(&self) -> &'static str {
        "file"
    }

    #[instrument(skip(self), fields(level = "file"))]
    async fn get(&self, key: &DerivativeKey) -> CoreResult<Option<CachedEntry>> {
        let record = { self.index.read().get(key).cloned() };
        let Some(mut record) = record else {
            self.stats.record_miss();
            return Ok(None);
        };
        let bytes = fs::read(&record.path).await.map_err(|e| CoreError::StoreError { status: 0, message: e.to_string() })?;
        record.atime = crate::entry::now_secs();
        self.index.write().insert(key.clone(), record.clone());
        self.stats.record_hit();
        Ok(Some(CachedEntry { key: record.key, bytes, ctime: record.ctime, atime: record.atime, is_thumbnail: record.is_thumbnail }))
    }

    #[instrument(skip(self, entry), fields(level = "file", key = %entry.key))]
    async fn put(&self, entry: CachedEntry) -> CoreResult<()> {
        if let Some(max) = self.config.max_bytes {
            if max > 0 && entry.size() as u64 > max {
                return Err(CoreError::CapacityError { size: entry.size() });
            }
        }
        let path = shard_path(&self.config.root, &entry.key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| CoreError::StoreError { status: 0, message: e.to_string() })?;
        }
        fs::write(&path, &entry.bytes).await.map_err(|e| CoreError::StoreError { status: 0, message: e.to_string() })?;
        let record = IndexRecord {
            key: entry.key.clone(),
            path: path.to_string_lossy().into_owned(),
            size: entry.size() as u64,
            ctime: entry.ctime,
            atime: entry.atime,
            is_thumbnail: entry.is_thumbnail,
        };
        let old_size = {
            let mut index = self.index.write();
            let old = index.insert(entry.key.clone(), record);
            old.map(|o| o.size)
        };
        if let Some(old_size) = old_size {
            self.bytes_used.fetch_sub(old_size, Ordering::Relaxed);
        }
        self.bytes_used.fetch_add(entry.size() as u64, Ordering::Relaxed);
        persist_index(&self.config.root, &self.index.read().clone()).await?;
        self.maybe_evict().await
    }

    async fn invalidate(&self, predicate: &(dyn Fn(&DerivativeKey) -> bool + Send + Sync)) -> CoreResult<()> {
        let matching: Vec<DerivativeKey> = self.index.read().keys().filter(|k| predicate(k)).cloned().collect();
        for key in matching {
            self.remove(&key).await;
        }
        persist_index(&self.config.root, &self.index.read().clone()).await
    }

    async fn stat(&self) -> CoreResult<LevelStat> {
        Ok(self.current_stat())
    }

    fn chain_next(&self) -> Option<Arc<dyn CacheLevel>> {
        self.next.clone()
    }

    fn priority(&self) -> EvictionPolicy {
        self.config.priority
    }

    fn writeback(&self) -> Writeback {
        self.config.writeback
    }
}
