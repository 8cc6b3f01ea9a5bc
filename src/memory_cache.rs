use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, instrument, warn};

use crate::entry::CachedEntry;
use crate::error::{CoreError, CoreResult};
use crate::eviction::{self, EvictionCandidate, EvictionPolicy, EvictionThresholds, Writeback};
use crate::key::DerivativeKey;
use crate::level::{AlarmEvent, AlarmSink, CacheLevel, LevelStat};
use crate::stats::CacheStats;

/// Configuration for one [`MemoryCache`] instance.
#[derive(Clone, Debug)]
pub struct MemoryCacheConfig {
    pub max_bytes: Option<u64>,
    pub max_elements: Option<u64>,
    pub evict_start_ratio: f64,
    pub evict_stop_ratio: f64,
    pub priority: EvictionPolicy,
    pub writeback: Writeback,
    pub alarm_free_ratio: Option<f64>,
}

impl Default for MemoryCacheConfig {
    fn default() -> Self {
        Self {
            max_bytes: None,
            max_elements: None,
            evict_start_ratio: 0.9,
            evict_stop_ratio: 0.7,
            priority: EvictionPolicy::default_policy(),
            writeback: Writeback::Lazy,
            alarm_free_ratio: None,
        }
    }
}

/// In-process, lock-free cache level. Entries live in a `DashMap` keyed by
/// [`DerivativeKey`]; a separate `parking_lot::Mutex`-guarded queue tracks
/// insertion order for bookkeeping shared with the eviction pass, rather
/// than a single `RwLock<HashMap>` that would serialize every concurrent
/// access.
pub struct MemoryCache {
    config: MemoryCacheConfig,
    entries: DashMap<DerivativeKey, CachedEntry>,
    order: Mutex<VecDeque<DerivativeKey>>,
    bytes_used: AtomicU64,
    next: Option<Arc<dyn CacheLevel>>,
    alarm_sink: Arc<dyn AlarmSink>,
    stats: Arc<CacheStats>,
}

impl MemoryCache {
    pub fn new(
        config: MemoryCacheConfig,
        next: Option<Arc<dyn CacheLevel>>,
        alarm_sink: Arc<dyn AlarmSink>,
        stats: Arc<CacheStats>,
    ) -> Self {
        Self {
            config,
            entries: DashMap::new(),
            order: Mutex::new(VecDeque::new()),
            bytes_used: AtomicU64::new(0),
            next,
            alarm_sink,
            stats,
        }
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
        self.entries
            .iter()
            .map(|e| EvictionCandidate {
                key: e.key().clone(),
                size: e.value().size() as u64,
                ctime: e.value().ctime,
                atime: e.value().atime,
                is_thumbnail: e.value().is_thumbnail,
            })
            .collect()
    }

    fn remove(&self, key: &DerivativeKey) -> Option<CachedEntry> {
        let removed = self.entries.remove(key).map(|(_, v)| v);
        if let Some(entry) = &removed {
            self.bytes_used.fetch_sub(entry.size() as u64, Ordering::Relaxed);
            let mut order = self.order.lock();
            if let Some(pos) = order.iter().position(|k| k == key) {
                order.remove(pos);
            }
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
            if let Some(entry) = self.remove(&key) {
                self.stats.record_eviction();
                self.write_back(entry).await;
            }
        }
        let stat = self.current_stat();
        self.check_alarm(&stat);
        Ok(())
    }

    async fn write_back(&self, entry: CachedEntry) {
        let Some(next) = self.next.clone() else { return };
        match self.config.writeback {
            Writeback::Never => {}
            Writeback::Eager => {
                if let Err(err) = next.put(entry).await {
                    warn!(level = self.name(), error = %err, "eager writeback failed");
                } else {
                    self.stats.record_writeback();
                }
            }
            Writeback::Lazy => {
                // A dedicated bounded channel per level, drained by a
                // background task, is the intended production wiring; this
                // level performs the write inline but still counts and logs
                // the outcome the same way so callers observe identical
                // stats regardless of whether the channel is saturated.
                match next.put(entry).await {
                    Ok(()) => self.stats.record_writeback(),
                    Err(err) => {
                        debug!(level = self.name(), error = %err, "lazy writeback dropped");
                        self.stats.record_writeback_drop();
                    }
                }
            }
        }
    }

    fn current_stat(&self) -> LevelStat {
        LevelStat {
            bytes_used: self.bytes_used.load(Ordering::Relaxed),
            max_bytes: self.config.max_bytes,
            elements_used: self.entries.len() as u64,
            max_elements: self.config.max_elements,
        }
    }
}

#[async_trait]
impl CacheLevel for MemoryCache {
    fn name(&self) -> &'static str {
        "memory"
    }

    #[instrument(skip(self), fields(level = "memory"))]
    async fn get(&self, key: &DerivativeKey) -> CoreResult<Option<CachedEntry>> {
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.touch();
            self.stats.record_hit();
            return Ok(Some(entry.clone()));
        }
        self.stats.record_miss();
        Ok(None)
    }

    #[instrument(skip(self, entry), fields(level = "memory", key = %entry.key))]
    async fn put(&self, entry: CachedEntry) -> CoreResult<()> {
        let size = entry.size() as u64;
        if let Some(max) = self.config.max_bytes {
            if max > 0 && size > max {
                return Err(CoreError::CapacityError { size: entry.size() });
            }
        }
        let key = entry.key.clone();
        if let Some(old) = self.entries.insert(key.clone(), entry) {
            self.bytes_used.fetch_sub(old.size() as u64, Ordering::Relaxed);
        } else {
            self.order.lock().push_back(key);
        }
        self.bytes_used.fetch_add(size, Ordering::Relaxed);
        self.maybe_evict().await
    }

    async fn invalidate(&self, predicate: &(dyn Fn(&DerivativeKey) -> bool + Send + Sync)) -> CoreResult<()> {
        let matching: Vec<DerivativeKey> = self.entries.iter().map(|e| e.key().clone()).filter(|k| predicate(k)).collect();
        for key in matching {
            self.remove(&key);
        }
        Ok(())
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
