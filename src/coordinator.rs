use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::deadline::Deadline;
use crate::entry::CachedEntry;
use crate::error::{CoreError, CoreResult};
use crate::eviction::Writeback;
use crate::identity::ImageIdentity;
use crate::key::{DerivativeKey, TransformParams};
use crate::level::CacheLevel;
use crate::object_store::ObjectStore;
use crate::singleflight::{Role, SingleFlight};
use crate::stats::CacheStats;
use crate::transform::{ImageMetadata, Transform};

/// Drives derivative resolution, upload, listing and metadata lookup.
///
/// `resolve` implements the five-step algorithm: probe the cache chain head
/// to tail; on a hit, backfill every level above the one that served it
/// (per that level's `writeback` mode) and return; on a full-chain miss for
/// a transform request, collapse concurrent callers via [`SingleFlight`],
/// have the leader fetch the original, invoke `Transform`, and populate
/// every configured level lowest-first; callers past their `Deadline`
/// abandon with `CoreError::Timeout` without affecting the leader's own
/// progress or other waiters.
pub struct DerivationCoordinator {
    head: Arc<dyn CacheLevel>,
    originals: Arc<ObjectStore>,
    transform: Arc<dyn Transform>,
    single_flight: SingleFlight,
    stats: Arc<CacheStats>,
}

impl DerivationCoordinator {
    pub fn new(head: Arc<dyn CacheLevel>, originals: Arc<ObjectStore>, transform: Arc<dyn Transform>, stats: Arc<CacheStats>) -> Self {
        Self { head, originals, transform, single_flight: SingleFlight::new(), stats }
    }

    /// Walks the chain from `head` to its tail, returning the first hit.
    /// On a hit below `head`, populates every level above the one that
    /// served it, per that upper level's own `writeback` mode: `eager`
    /// populates synchronously before this call returns, `lazy` spawns a
    /// best-effort background `put`, `never` leaves the level untouched.
    async fn probe_chain(&self, key: &DerivativeKey) -> CoreResult<Option<Vec<u8>>> {
        let mut above = Vec::new();
        let mut level = Some(self.head.clone());
        while let Some(current) = level {
            if let Some(entry) = current.get(key).await? {
                self.backfill(above, entry.clone()).await;
                return Ok(Some(entry.bytes));
            }
            level = current.chain_next();
            above.push(current);
        }
        Ok(None)
    }

    /// Populates each level in `above` (ordered head-first) with `entry`,
    /// per that level's own writeback mode.
    async fn backfill(&self, above: Vec<Arc<dyn CacheLevel>>, entry: CachedEntry) {
        for level in above {
            match level.writeback() {
                Writeback::Never => {}
                Writeback::Eager => {
                    if let Err(err) = level.put(entry.clone()).await {
                        warn!(level = level.name(), key = %entry.key, error = %err, "failed to backfill cache level on lower-level hit");
                    }
                }
                Writeback::Lazy => {
                    let level = level.clone();
                    let entry = entry.clone();
                    tokio::spawn(async move {
                        if let Err(err) = level.put(entry.clone()).await {
                            warn!(level = level.name(), key = %entry.key, error = %err, "failed to backfill cache level on lower-level hit");
                        }
                    });
                }
            }
        }
    }

    async fn fetch_original(&self, identity: &ImageIdentity) -> CoreResult<Vec<u8>> {
        let key = DerivativeKey::new(identity, &TransformParams::None);
        self.originals
            .get_and_populate_file_cache(&key)
            .await?
            .map(|entry| entry.bytes)
            .ok_or_else(|| CoreError::NotFound(identity.as_str().to_string()))
    }

    /// Resolves `(identity, params)` to derivative bytes, probing the cache
    /// chain first and falling back to deriving from the original on a full
    /// miss.
    #[instrument(skip(self, deadline), fields(identity = %identity))]
    pub async fn resolve(&self, identity: &ImageIdentity, params: &TransformParams, deadline: Deadline) -> CoreResult<Arc<Vec<u8>>> {
        let key = DerivativeKey::new(identity, params);

        if let Some(bytes) = self.probe_chain(&key).await? {
            return Ok(Arc::new(bytes));
        }

        if matches!(params, TransformParams::None) {
            return self.fetch_original(identity).await.map(Arc::new);
        }

        match self.single_flight.join(&key).await {
            Role::Leader => {
                let result = self.derive(identity, params, &key).await;
                let broadcastable = result.as_ref().map(Arc::clone).map_err(|e| Arc::new(clone_error(e)));
                self.single_flight.finish(&key, broadcastable).await;
                result
            }
            Role::Waiter(mut rx) => {
                self.stats.record_single_flight_join();
                let wait = tokio::time::timeout_at(deadline.instant(), rx.recv());
                match wait.await {
                    Ok(Ok(Ok(bytes))) => Ok(bytes),
                    Ok(Ok(Err(err))) => Err(clone_error(&err)),
                    Ok(Err(_recv_closed)) => Err(CoreError::Unavailable("leader vanished without a result".to_string())),
                    Err(_elapsed) => Err(CoreError::Timeout),
                }
            }
        }
    }

    /// Derives a fresh variant and inserts it into every configured level,
    /// lowest (most persistent) first, so on-disk/remote durability is
    /// established before the in-memory cache, and a crash partway through
    /// never loses the derivative while only the cheaper tiers hold it.
    async fn derive(&self, identity: &ImageIdentity, params: &TransformParams, key: &DerivativeKey) -> CoreResult<Arc<Vec<u8>>> {
        let source = self.fetch_original(identity).await?;
        let derived = self.transform.transform(&source, params).await?;
        let entry = CachedEntry::new(key.clone(), derived.clone(), params.is_thumbnail());

        let mut chain = Vec::new();
        let mut level = Some(self.head.clone());
        while let Some(current) = level {
            level = current.chain_next();
            chain.push(current);
        }
        for level in chain.into_iter().rev() {
            if let Err(err) = level.put(entry.clone()).await {
                warn!(level = level.name(), key = %key, error = %err, "failed to populate cache level after derivation");
            }
        }

        info!(key = %key, bytes = derived.len(), "derived new image variant");
        Ok(Arc::new(derived))
    }

    /// Uploads a new original, invalidating every cached derivative under
    /// `identity`'s prefix synchronously before returning, so a subsequent
    /// `resolve` is guaranteed to observe the new bytes (read-your-writes).
    #[instrument(skip(self, bytes), fields(identity = %identity))]
    pub async fn put(&self, identity: &ImageIdentity, bytes: Vec<u8>) -> CoreResult<()> {
        let identity_owned = identity.clone();
        let predicate = move |k: &DerivativeKey| identity_owned.is_prefix_of(k.identity_prefix());
        let key = DerivativeKey::new(identity, &TransformParams::None);

        self.head.invalidate(&predicate).await?;
        let mut level = self.head.chain_next();
        while let Some(current) = level {
            current.invalidate(&predicate).await?;
            level = current.chain_next();
        }

        self.originals.put(CachedEntry::new(key, bytes, false)).await
    }

    /// Lists identities stored under `prefix`, delegating to the originals
    /// store (the only level with a durable, enumerable namespace).
    pub async fn list(&self, prefix: &str) -> CoreResult<Vec<String>> {
        self.originals.list_prefix(prefix).await
    }

    /// Reads structured metadata for `identity`'s original, never touching
    /// the derivative cache tiers.
    pub async fn meta(&self, identity: &ImageIdentity) -> CoreResult<ImageMetadata> {
        let bytes = self.fetch_original(identity).await?;
        self.transform.read_metadata(&bytes).await
    }
}

fn clone_error(err: &CoreError) -> CoreError {
    match err {
        CoreError::NotFound(s) => CoreError::NotFound(s.clone()),
        CoreError::Unavailable(s) => CoreError::Unavailable(s.clone()),
        CoreError::StoreError { status, message } => CoreError::StoreError { status: *status, message: message.clone() },
        CoreError::TransformError(s) => CoreError::TransformError(s.clone()),
        CoreError::ConfigError(s) => CoreError::ConfigError(s.clone()),
        CoreError::CapacityError { size } => CoreError::CapacityError { size: *size },
        CoreError::Timeout => CoreError::Timeout,
    }
}
