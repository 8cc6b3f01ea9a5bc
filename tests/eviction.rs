use std::sync::Arc;

use imgderiv_core::entry::CachedEntry;
use imgderiv_core::eviction::{EvictionPolicy, Writeback};
use imgderiv_core::identity::ImageIdentity;
use imgderiv_core::key::{DerivativeKey, TransformParams};
use imgderiv_core::level::{CacheLevel, NullAlarmSink};
use imgderiv_core::memory_cache::{MemoryCache, MemoryCacheConfig};
use imgderiv_core::stats::CacheStats;

fn key(name: &str) -> DerivativeKey {
    DerivativeKey::new(&ImageIdentity::new(name), &TransformParams::None)
}

/// S3: MemoryCache with max_bytes=1000, evict_start_ratio=0.8,
/// evict_stop_ratio=0.6, priority=newest. Insert 12 x 100-byte entries with
/// distinct keys and increasing atime. After the 9th insert (used=900>800),
/// eviction reduces used_bytes <= 600; the 3 oldest-atime entries are gone.
#[tokio::test]
async fn s3_eviction_reduces_to_stop_ratio_evicting_oldest_first() {
    let config = MemoryCacheConfig {
        max_bytes: Some(1000),
        max_elements: None,
        evict_start_ratio: 0.8,
        evict_stop_ratio: 0.6,
        priority: EvictionPolicy::Newest,
        writeback: Writeback::Never,
        alarm_free_ratio: None,
    };
    let cache = MemoryCache::new(config, None, Arc::new(NullAlarmSink), Arc::new(CacheStats::new()));

    for i in 0..9 {
        let mut entry = CachedEntry::new(key(&format!("k{i}")), vec![0u8; 100], false);
        // Force a strictly increasing atime per insert so "oldest" is
        // unambiguous regardless of how fast this loop runs.
        entry.ctime = i as u64;
        entry.atime = i as u64;
        cache.put(entry).await.unwrap();
    }

    let stat = cache.stat().await.unwrap();
    assert!(stat.bytes_used <= 600, "expected used_bytes <= 600, got {}", stat.bytes_used);

    // The 3 oldest-atime entries (k0, k1, k2) must be gone.
    for i in 0..3 {
        assert!(cache.get(&key(&format!("k{i}"))).await.unwrap().is_none(), "k{i} should have been evicted");
    }
    // At least one of the newer entries must still be present.
    assert!(cache.get(&key("k8")).await.unwrap().is_some());
}

#[tokio::test]
async fn invariant_used_bytes_equals_sum_of_entry_sizes() {
    let cache = MemoryCache::new(MemoryCacheConfig::default(), None, Arc::new(NullAlarmSink), Arc::new(CacheStats::new()));
    cache.put(CachedEntry::new(key("a"), vec![0; 10], false)).await.unwrap();
    cache.put(CachedEntry::new(key("b"), vec![0; 20], false)).await.unwrap();
    let stat = cache.stat().await.unwrap();
    assert_eq!(stat.bytes_used, 30);
    assert_eq!(stat.elements_used, 2);
}
