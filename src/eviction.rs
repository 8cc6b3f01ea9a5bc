use crate::key::DerivativeKey;
use crate::level::LevelStat;

/// Order in which candidates are evicted: the *first* entry a priority
/// sorts to the front of is evicted first.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EvictionPolicy {
    /// Evict the entry with the oldest `atime` first (ties: smallest size,
    /// then key order).
    Newest,
    /// Evict the largest entry first.
    Largest,
    /// Evict the smallest entry first.
    Smallest,
    /// Retain thumbnails: evict non-thumbnail entries first, oldest-`atime`
    /// first within each group, and only reach into thumbnails once every
    /// non-thumbnail candidate is gone.
    Thumbnail,
}

impl EvictionPolicy {
    pub fn default_policy() -> Self {
        EvictionPolicy::Newest
    }
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        Self::default_policy()
    }
}

impl From<&str> for EvictionPolicy {
    fn from(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "largest" => EvictionPolicy::Largest,
            "smallest" => EvictionPolicy::Smallest,
            "thumbnail" => EvictionPolicy::Thumbnail,
            _ => EvictionPolicy::Newest,
        }
    }
}

/// What happens to an entry's bytes when it is evicted from a level.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Writeback {
    /// Write through to `chain_next` synchronously, before `put`/eviction
    /// returns.
    Eager,
    /// Enqueue onto a bounded channel drained by a background task; silent
    /// drop (counted, logged at `debug`) if the channel is full.
    Lazy,
    /// Drop the bytes; `chain_next`, if any, is not updated.
    Never,
}

impl From<&str> for Writeback {
    fn from(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "eager" => Writeback::Eager,
            "never" => Writeback::Never,
            _ => Writeback::Lazy,
        }
    }
}

/// The metadata `run_pass` needs about one candidate entry — deliberately
/// not the full `CachedEntry` so a level can report candidates without
/// cloning bytes.
#[derive(Clone, Debug)]
pub struct EvictionCandidate {
    pub key: DerivativeKey,
    pub size: u64,
    pub ctime: u64,
    pub atime: u64,
    pub is_thumbnail: bool,
}

/// Sorts `candidates` so the first element is evicted first, per `policy`.
/// One shared comparator used by every level instead of duplicating
/// ordering logic per concrete cache.
pub fn order_candidates(mut candidates: Vec<EvictionCandidate>, policy: EvictionPolicy) -> Vec<EvictionCandidate> {
    match policy {
        EvictionPolicy::Newest => {
            candidates.sort_by(|a, b| a.atime.cmp(&b.atime).then(a.size.cmp(&b.size)).then(a.key.cmp(&b.key)));
        }
        EvictionPolicy::Largest => {
            candidates.sort_by(|a, b| b.size.cmp(&a.size).then(a.key.cmp(&b.key)));
        }
        EvictionPolicy::Smallest => {
            candidates.sort_by(|a, b| a.size.cmp(&b.size).then(a.key.cmp(&b.key)));
        }
        EvictionPolicy::Thumbnail => {
            candidates.sort_by(|a, b| {
                a.is_thumbnail
                    .cmp(&b.is_thumbnail)
                    .then(a.atime.cmp(&b.atime))
                    .then(a.key.cmp(&b.key))
            });
        }
    }
    candidates
}

/// Hysteresis thresholds a level is configured with.
#[derive(Clone, Copy, Debug)]
pub struct EvictionThresholds {
    pub start_ratio: f64,
    pub stop_ratio: f64,
    pub max_elements: Option<u64>,
    pub stop_elements: Option<u64>,
}

/// True if `stat` is over either the byte-ratio or element-count start
/// threshold and a pass should begin.
pub fn should_start(stat: &LevelStat, thresholds: &EvictionThresholds) -> bool {
    let over_bytes = stat.max_bytes.map(|max| max > 0 && (stat.bytes_used as f64 / max as f64) >= thresholds.start_ratio).unwrap_or(false);
    let over_elements = thresholds.max_elements.map(|max| stat.elements_used >= max).unwrap_or(false);
    over_bytes || over_elements
}

/// True once `stat` has fallen back to the stop thresholds and a running
/// pass should halt.
pub fn should_stop(stat: &LevelStat, thresholds: &EvictionThresholds) -> bool {
    let under_bytes = stat.max_bytes.map(|max| max == 0 || (stat.bytes_used as f64 / max as f64) <= thresholds.stop_ratio).unwrap_or(true);
    let under_elements = thresholds
        .stop_elements
        .map(|stop| stat.elements_used <= stop)
        .unwrap_or(true);
    under_bytes && under_elements
}

/// Picks the next candidate to evict from an already-ordered list, walking
/// forward until `stat` (updated by the caller after each removal) reaches
/// the stop thresholds. Returns the keys to remove, in eviction order.
///
/// This is the shared policy engine: a level supplies its candidates and
/// current stat, and gets back the ordered set of keys to remove; the level
/// itself performs the actual removal and (per its `Writeback` mode) the
/// write-through, since only the level owns the storage.
pub fn run_pass(
    mut stat: LevelStat,
    candidates: Vec<EvictionCandidate>,
    policy: EvictionPolicy,
    thresholds: EvictionThresholds,
) -> Vec<DerivativeKey> {
    let ordered = order_candidates(candidates, policy);
    let mut evicted = Vec::new();
    for candidate in ordered {
        if should_stop(&stat, &thresholds) {
            break;
        }
        stat.bytes_used = stat.bytes_used.saturating_sub(candidate.size);
        stat.elements_used = stat.elements_used.saturating_sub(1);
        evicted.push(candidate.key);
    }
    evicted
}
