use std::sync::Arc;

use async_trait::async_trait;

use crate::entry::CachedEntry;
use crate::error::CoreResult;
use crate::eviction::{EvictionPolicy, Writeback};
use crate::key::DerivativeKey;

/// Point-in-time occupancy of a level, used by [`crate::eviction::run_pass`]
/// to decide whether to start/stop evicting and by the alarm check.
#[derive(Clone, Copy, Debug, Default)]
pub struct LevelStat {
    pub bytes_used: u64,
    pub max_bytes: Option<u64>,
    pub elements_used: u64,
    pub max_elements: Option<u64>,
}

impl LevelStat {
    /// Fraction of `max_bytes` still free; `1.0` when the level is unbounded.
    pub fn free_byte_ratio(&self) -> f64 {
        match self.max_bytes {
            Some(max) if max > 0 => 1.0 - (self.bytes_used as f64 / max as f64),
            _ => 1.0,
        }
    }
}

/// Raised when a level's free ratio drops below its configured
/// `alarm_free_ratio`. Deliberately not a [`crate::error::CoreError`]: this
/// is an observability signal, not an operation failure.
#[derive(Clone, Debug)]
pub struct AlarmEvent {
    pub level_name: &'static str,
    pub free_ratio: f64,
    pub threshold: f64,
}

/// Receives [`AlarmEvent`]s raised by any level in the chain.
pub trait AlarmSink: Send + Sync {
    fn alarm(&self, event: AlarmEvent);
}

/// An `AlarmSink` that discards every event; used where a caller has no
/// interest in alarms (tests, or a level with alarms disabled).
pub struct NullAlarmSink;

impl AlarmSink for NullAlarmSink {
    fn alarm(&self, _event: AlarmEvent) {}
}

/// One tier of the cache chain: memory, file, object-cache, or
/// object-store. Every level can be chained to a `next_level` that is
/// consulted on miss and written to on eviction (subject to `writeback`).
#[async_trait]
pub trait CacheLevel: Send + Sync {
    /// Stable name used in logs/metrics (`"memory"`, `"file"`, ...).
    fn name(&self) -> &'static str;

    /// Looks up `key` in this level only — does not probe `chain_next`.
    async fn get(&self, key: &DerivativeKey) -> CoreResult<Option<CachedEntry>>;

    /// Stores `entry` in this level, triggering eviction if the level
    /// crosses its `evict_start_ratio`/`max_elements` threshold.
    async fn put(&self, entry: CachedEntry) -> CoreResult<()>;

    /// Removes every entry matching `predicate`, used for identity-prefix
    /// invalidation on upload.
    async fn invalidate(&self, predicate: &(dyn Fn(&DerivativeKey) -> bool + Send + Sync)) -> CoreResult<()>;

    /// Current occupancy, used by the eviction engine and the alarm check.
    async fn stat(&self) -> CoreResult<LevelStat>;

    /// The next level in the chain, if any.
    fn chain_next(&self) -> Option<Arc<dyn CacheLevel>>;

    /// Eviction priority order for this level.
    fn priority(&self) -> EvictionPolicy;

    /// Writeback mode applied to entries evicted from this level.
    fn writeback(&self) -> Writeback;
}
