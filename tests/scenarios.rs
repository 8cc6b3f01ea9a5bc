use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use imgderiv_core::backend::InMemoryBackend;
use imgderiv_core::coordinator::DerivationCoordinator;
use imgderiv_core::deadline::Deadline;
use imgderiv_core::error::{CoreError, CoreResult};
use imgderiv_core::identity::ImageIdentity;
use imgderiv_core::key::{Enhance, Format, TransformParams};
use imgderiv_core::level::NullAlarmSink;
use imgderiv_core::memory_cache::{MemoryCache, MemoryCacheConfig};
use imgderiv_core::object_store::ObjectStore;
use imgderiv_core::stats::CacheStats;
use imgderiv_core::transform::{ImageMetadata, Transform};

/// Counts invocations and tags output with the requested format, standing
/// in for a real decoder-backed transcoder.
struct TaggingTransform {
    calls: AtomicU64,
}

#[async_trait]
impl Transform for TaggingTransform {
    async fn transform(&self, bytes: &[u8], params: &TransformParams) -> CoreResult<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if bytes.is_empty() {
            return Err(CoreError::TransformError("empty source".to_string()));
        }
        let mut out = bytes.to_vec();
        if let TransformParams::Some { format, thumbnail, .. } = params {
            out.extend_from_slice(format!("|{format}|thumb={thumbnail}").as_bytes());
        }
        Ok(out)
    }

    async fn read_metadata(&self, _bytes: &[u8]) -> CoreResult<ImageMetadata> {
        Ok(ImageMetadata { width: 10, height: 10, format: "jpg".to_string(), color_space: None, orientation: None })
    }
}

fn setup() -> (DerivationCoordinator, Arc<TaggingTransform>) {
    let backend = Arc::new(InMemoryBackend::new());
    let originals = Arc::new(ObjectStore::new(backend, None, Arc::new(CacheStats::new())));
    let head = Arc::new(MemoryCache::new(
        MemoryCacheConfig::default(),
        None,
        Arc::new(NullAlarmSink),
        Arc::new(CacheStats::new()),
    ));
    let transform = Arc::new(TaggingTransform { calls: AtomicU64::new(0) });
    (DerivationCoordinator::new(head, originals, transform.clone(), Arc::new(CacheStats::new())), transform)
}

fn deadline() -> Deadline {
    Deadline::after(Duration::from_secs(5))
}

/// S1: upload then fetch — the derivative is transcoded, not a byte-exact
/// copy of the original.
#[tokio::test]
async fn s1_upload_then_fetch() {
    let (coordinator, _transform) = setup();
    let identity = ImageIdentity::new("a/b.jpg");
    let original_bytes = vec![10, 20, 30];
    coordinator.put(&identity, original_bytes.clone()).await.unwrap();

    let params = TransformParams::Some {
        max_width: None,
        max_height: None,
        format: Format::Jpg,
        thumbnail: false,
        enhance: Enhance::default(),
        strip_metadata: true,
    };
    let derived = coordinator.resolve(&identity, &params, deadline()).await.unwrap();
    assert_ne!(*derived, original_bytes);
    assert!(derived.ends_with(b"|jpg|thumb=false"));
}

/// S2: thumbnail request after an original upload is served from the
/// memory cache on the second call — exactly one Transform invocation.
#[tokio::test]
async fn s2_thumbnail_second_call_hits_cache() {
    let (coordinator, transform) = setup();
    let identity = ImageIdentity::new("a/b.jpg");
    coordinator.put(&identity, vec![1, 2, 3]).await.unwrap();

    let params = TransformParams::Some {
        max_width: Some(50),
        max_height: Some(50),
        format: Format::Jpg,
        thumbnail: true,
        enhance: Enhance::default(),
        strip_metadata: true,
    };

    let first = coordinator.resolve(&identity, &params, deadline()).await.unwrap();
    let second = coordinator.resolve(&identity, &params, deadline()).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(transform.calls.load(Ordering::SeqCst), 1);
}

/// S6: invalidation on reupload — a second upload to the same identity
/// means subsequent resolves never see a stale derivative of the first.
#[tokio::test]
async fn s6_invalidation_on_reupload() {
    let (coordinator, transform) = setup();
    let identity = ImageIdentity::new("x");
    let params = TransformParams::Some {
        max_width: None,
        max_height: None,
        format: Format::Jpg,
        thumbnail: false,
        enhance: Enhance::default(),
        strip_metadata: true,
    };

    coordinator.put(&identity, vec![1]).await.unwrap();
    let derived_b1 = coordinator.resolve(&identity, &params, deadline()).await.unwrap();
    assert_eq!(transform.calls.load(Ordering::SeqCst), 1);

    coordinator.put(&identity, vec![2]).await.unwrap();
    let derived_b2 = coordinator.resolve(&identity, &params, deadline()).await.unwrap();

    assert_ne!(derived_b1, derived_b2);
    assert!(derived_b2.starts_with(&[2]));
}

/// Coordinator law 7: idempotence — resolving twice yields byte-equal
/// results.
#[tokio::test]
async fn law7_idempotence() {
    let (coordinator, _transform) = setup();
    let identity = ImageIdentity::new("a/b.jpg");
    coordinator.put(&identity, vec![5, 5, 5]).await.unwrap();
    let first = coordinator.resolve(&identity, &TransformParams::None, deadline()).await.unwrap();
    let second = coordinator.resolve(&identity, &TransformParams::None, deadline()).await.unwrap();
    assert_eq!(first, second);
}

/// Coordinator law 8: read-your-writes — resolving with no transform after
/// an upload returns exactly the uploaded bytes.
#[tokio::test]
async fn law8_read_your_writes() {
    let (coordinator, _transform) = setup();
    let identity = ImageIdentity::new("a/b.jpg");
    coordinator.put(&identity, vec![42, 43]).await.unwrap();
    let bytes = coordinator.resolve(&identity, &TransformParams::None, deadline()).await.unwrap();
    assert_eq!(*bytes, vec![42, 43]);
}
