use std::time::{SystemTime, UNIX_EPOCH};

use crate::key::DerivativeKey;

/// A single cached derivative, held identically across all four levels.
///
/// `ctime`/`atime` are unix-epoch seconds rather than `Instant` so entries
/// can be serialized into `FileCache`'s sidecar index and survive a restart.
#[derive(Clone, Debug, PartialEq)]
pub struct CachedEntry {
    pub key: DerivativeKey,
    pub bytes: Vec<u8>,
    pub ctime: u64,
    pub atime: u64,
    pub is_thumbnail: bool,
}

impl CachedEntry {
    pub fn new(key: DerivativeKey, bytes: Vec<u8>, is_thumbnail: bool) -> Self {
        let now = now_secs();
        Self { key, bytes, ctime: now, atime: now, is_thumbnail }
    }

    /// Size in bytes, as counted against a level's `max_bytes` budget.
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    /// Bumps `atime` to now; called on every `get` hit, used by the `newest`
    /// eviction priority.
    pub fn touch(&mut self) {
        self.atime = now_secs();
    }
}

/// Current unix-epoch seconds, used for `ctime`/`atime` stamps across every
/// cache level.
pub fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}
