use std::sync::atomic::{AtomicU64, Ordering};

/// Cache statistics for monitoring hit/miss rates and performance.
///
/// All counters are thread-safe via atomics with `Relaxed` ordering, which is
/// sufficient since these are independent counters, not values gating other
/// memory accesses.
///
/// # Examples
///
/// ```
/// use imgderiv_core::stats::CacheStats;
///
/// let stats = CacheStats::new();
/// stats.record_hit();
/// stats.record_hit();
/// stats.record_miss();
///
/// assert_eq!(stats.hits(), 2);
/// assert_eq!(stats.misses(), 1);
/// assert_eq!(stats.total_accesses(), 3);
/// assert!((stats.hit_rate() - 0.6666).abs() < 0.001);
/// ```
#[derive(Debug)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    writebacks: AtomicU64,
    writeback_drops: AtomicU64,
    alarms: AtomicU64,
    single_flight_joins: AtomicU64,
}

impl CacheStats {
    pub fn new() -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            writebacks: AtomicU64::new(0),
            writeback_drops: AtomicU64::new(0),
            alarms: AtomicU64::new(0),
            single_flight_joins: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("imgderiv_cache_hits_total").increment(1);
    }

    #[inline]
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("imgderiv_cache_misses_total").increment(1);
    }

    /// Records that `run_pass` evicted one entry.
    #[inline]
    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("imgderiv_cache_evictions_total").increment(1);
    }

    /// Records a successful lazy or eager writeback to the next level.
    #[inline]
    pub fn record_writeback(&self) {
        self.writebacks.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("imgderiv_cache_writebacks_total").increment(1);
    }

    /// Records a lazy writeback silently dropped because its channel was full.
    #[inline]
    pub fn record_writeback_drop(&self) {
        self.writeback_drops.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("imgderiv_cache_writeback_drops_total").increment(1);
    }

    /// Records an `AlarmEvent` delivered by a level whose free ratio fell
    /// below its configured threshold.
    #[inline]
    pub fn record_alarm(&self) {
        self.alarms.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("imgderiv_alarm_events_total").increment(1);
    }

    /// Records a waiter joining an in-flight derivation instead of starting
    /// its own (single-flight collapse).
    #[inline]
    pub fn record_single_flight_join(&self) {
        self.single_flight_joins.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("imgderiv_single_flight_joins_total").increment(1);
    }

    #[inline]
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn writebacks(&self) -> u64 {
        self.writebacks.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn writeback_drops(&self) -> u64 {
        self.writeback_drops.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn alarms(&self) -> u64 {
        self.alarms.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn single_flight_joins(&self) -> u64 {
        self.single_flight_joins.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn total_accesses(&self) -> u64 {
        self.hits() + self.misses()
    }

    #[inline]
    pub fn hit_rate(&self) -> f64 {
        let total = self.total_accesses();
        if total == 0 {
            0.0
        } else {
            self.hits() as f64 / total as f64
        }
    }

    #[inline]
    pub fn miss_rate(&self) -> f64 {
        1.0 - self.hit_rate()
    }

    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
        self.writebacks.store(0, Ordering::Relaxed);
        self.writeback_drops.store(0, Ordering::Relaxed);
        self.alarms.store(0, Ordering::Relaxed);
        self.single_flight_joins.store(0, Ordering::Relaxed);
    }
}

impl Default for CacheStats {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for CacheStats {
    fn clone(&self) -> Self {
        Self {
            hits: AtomicU64::new(self.hits()),
            misses: AtomicU64::new(self.misses()),
            evictions: AtomicU64::new(self.evictions()),
            writebacks: AtomicU64::new(self.writebacks()),
            writeback_drops: AtomicU64::new(self.writeback_drops()),
            alarms: AtomicU64::new(self.alarms()),
            single_flight_joins: AtomicU64::new(self.single_flight_joins()),
        }
    }
}
