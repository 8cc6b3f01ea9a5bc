use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use imgderiv_core::entry::CachedEntry;
use imgderiv_core::eviction::{EvictionPolicy, Writeback};
use imgderiv_core::identity::ImageIdentity;
use imgderiv_core::key::{DerivativeKey, TransformParams};
use imgderiv_core::level::{AlarmEvent, AlarmSink, CacheLevel};
use imgderiv_core::memory_cache::{MemoryCache, MemoryCacheConfig};
use imgderiv_core::stats::CacheStats;

struct CountingAlarmSink {
    count: AtomicUsize,
}

impl AlarmSink for CountingAlarmSink {
    fn alarm(&self, event: AlarmEvent) {
        assert_eq!(event.level_name, "memory");
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}

fn key(name: &str) -> DerivativeKey {
    DerivativeKey::new(&ImageIdentity::new(name), &TransformParams::None)
}

#[tokio::test]
async fn alarm_fires_once_free_ratio_drops_below_threshold() {
    let sink = Arc::new(CountingAlarmSink { count: AtomicUsize::new(0) });
    let config = MemoryCacheConfig {
        max_bytes: Some(100),
        max_elements: None,
        evict_start_ratio: 2.0, // never triggers eviction in this test
        evict_stop_ratio: 0.0,
        priority: EvictionPolicy::default_policy(),
        writeback: Writeback::Never,
        alarm_free_ratio: Some(0.5),
    };
    let cache = MemoryCache::new(config, None, sink.clone(), Arc::new(CacheStats::new()));

    // 60/100 bytes used -> free ratio 0.4 < 0.5 threshold.
    cache.put(CachedEntry::new(key("a"), vec![0u8; 60], false)).await.unwrap();

    assert!(sink.count.load(Ordering::SeqCst) >= 1);
}

#[tokio::test]
async fn alarm_does_not_fire_while_free_ratio_is_healthy() {
    let sink = Arc::new(CountingAlarmSink { count: AtomicUsize::new(0) });
    let config = MemoryCacheConfig {
        max_bytes: Some(100),
        max_elements: None,
        evict_start_ratio: 2.0,
        evict_stop_ratio: 0.0,
        priority: EvictionPolicy::default_policy(),
        writeback: Writeback::Never,
        alarm_free_ratio: Some(0.5),
    };
    let cache = MemoryCache::new(config, None, sink.clone(), Arc::new(CacheStats::new()));

    cache.put(CachedEntry::new(key("a"), vec![0u8; 10], false)).await.unwrap();

    assert_eq!(sink.count.load(Ordering::SeqCst), 0);
}
