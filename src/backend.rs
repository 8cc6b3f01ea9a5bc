use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{CoreError, CoreResult};

/// Metadata an `ObjectBackend` can report about a stored object without
/// fetching its bytes.
#[derive(Clone, Copy, Debug)]
pub struct ObjectStat {
    pub size: u64,
    pub last_modified: u64,
}

/// HTTP method a pre-signed URL is valid for.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum PresignMethod {
    Get,
    Put,
}

/// Abstract remote object storage. A real implementation speaks S3 or an
/// equivalent wire protocol; this crate only depends on the trait, keeping
/// the concrete protocol out of scope.
#[async_trait]
pub trait ObjectBackend: Send + Sync {
    async fn get(&self, key: &str) -> CoreResult<Option<Vec<u8>>>;
    async fn put(&self, key: &str, bytes: Vec<u8>) -> CoreResult<()>;
    async fn delete(&self, key: &str) -> CoreResult<()>;
    async fn stat(&self, key: &str) -> CoreResult<Option<ObjectStat>>;
    async fn list_prefix(&self, prefix: &str) -> CoreResult<Vec<String>>;
    /// Produces a URL usable for `method` against `key`, valid for
    /// approximately `lifetime_secs` seconds from now.
    async fn presign(&self, key: &str, method: PresignMethod, lifetime_secs: u64) -> CoreResult<String>;
}

/// An in-memory `ObjectBackend` fake for coordinator/level tests; not part
/// of any production path.
#[derive(Default)]
pub struct InMemoryBackend {
    objects: Mutex<HashMap<String, (Vec<u8>, u64)>>,
    clock: Mutex<u64>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advances the fake clock, used by tests exercising presign reuse and
    /// TTL expiry without real sleeps.
    pub fn advance_clock(&self, secs: u64) {
        *self.clock.lock().unwrap() += secs;
    }

    fn now(&self) -> u64 {
        *self.clock.lock().unwrap()
    }
}

#[async_trait]
impl ObjectBackend for InMemoryBackend {
    async fn get(&self, key: &str) -> CoreResult<Option<Vec<u8>>> {
        Ok(self.objects.lock().unwrap().get(key).map(|(bytes, _)| bytes.clone()))
    }

    async fn put(&self, key: &str, bytes: Vec<u8>) -> CoreResult<()> {
        let now = self.now();
        self.objects.lock().unwrap().insert(key.to_string(), (bytes, now));
        Ok(())
    }

    async fn delete(&self, key: &str) -> CoreResult<()> {
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }

    async fn stat(&self, key: &str) -> CoreResult<Option<ObjectStat>> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .get(key)
            .map(|(bytes, last_modified)| ObjectStat { size: bytes.len() as u64, last_modified: *last_modified }))
    }

    async fn list_prefix(&self, prefix: &str) -> CoreResult<Vec<String>> {
        Ok(self.objects.lock().unwrap().keys().filter(|k| k.starts_with(prefix)).cloned().collect())
    }

    async fn presign(&self, key: &str, method: PresignMethod, lifetime_secs: u64) -> CoreResult<String> {
        if self.objects.lock().unwrap().contains_key(key) || method == PresignMethod::Put {
            Ok(format!("https://fake.example/{key}?method={method:?}&ttl={lifetime_secs}&t={}", self.now()))
        } else {
            Err(CoreError::NotFound(key.to_string()))
        }
    }
}
