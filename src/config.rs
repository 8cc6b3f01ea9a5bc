use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::backend::ObjectBackend;
use crate::coordinator::DerivationCoordinator;
use crate::error::{CoreError, CoreResult};
use crate::eviction::{EvictionPolicy, Writeback};
use crate::file_cache::{FileCache, FileCacheConfig};
use crate::level::{AlarmSink, CacheLevel, NullAlarmSink};
use crate::memory_cache::{MemoryCache, MemoryCacheConfig};
use crate::object_cache::ObjectCache;
use crate::object_store::ObjectStore;
use crate::stats::CacheStats;
use crate::transform::Transform;

/// A credential value resolved either literally or from an environment
/// variable. YAML spells the latter as the tuple `["env", "VAR_NAME"]`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Credential {
    Literal(String),
    Env((EnvTag, String)),
}

/// The literal discriminator `"env"` in a `Credential::Env` tuple.
#[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
pub enum EnvTag {
    #[serde(rename = "env")]
    Env,
}

impl Credential {
    pub fn resolve(&self) -> CoreResult<String> {
        match self {
            Credential::Literal(v) => Ok(v.clone()),
            Credential::Env((EnvTag::Env, var)) => {
                std::env::var(var).map_err(|_| CoreError::ConfigError(format!("environment variable {var} is not set")))
            }
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LevelConfig {
    #[serde(default)]
    pub max_bytes: Option<u64>,
    #[serde(default)]
    pub max_elements: Option<u64>,
    #[serde(default = "default_start_ratio")]
    pub evict_start_ratio: f64,
    #[serde(default = "default_stop_ratio")]
    pub evict_stop_ratio: f64,
    #[serde(default)]
    pub priority: String,
    #[serde(default = "default_writeback")]
    pub writeback: String,
    #[serde(default)]
    pub alarm_free_ratio: Option<f64>,
}

fn default_start_ratio() -> f64 {
    0.9
}

fn default_stop_ratio() -> f64 {
    0.7
}

fn default_writeback() -> String {
    "lazy".to_string()
}

impl LevelConfig {
    fn priority(&self) -> EvictionPolicy {
        EvictionPolicy::from(self.priority.as_str())
    }

    fn writeback(&self) -> Writeback {
        Writeback::from(self.writeback.as_str())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileCacheSettings {
    #[serde(flatten)]
    pub level: LevelConfig,
    pub root: PathBuf,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistentStoreSettings {
    pub endpoint: String,
    pub bucket: String,
    pub access_key: Credential,
    pub secret_key: Credential,
}

/// Top-level configuration covering every option that affects the core.
/// `pid_file` and `repository_base_pathname` are parsed and carried so a
/// real deployment's YAML round-trips, but are never consulted here — they
/// belong to the HTTP/daemon layer this crate does not implement.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CoreConfig {
    #[serde(default)]
    pub alarm_threshold: Option<f64>,
    #[serde(default = "default_format")]
    pub canonical_format: String,
    #[serde(default = "default_format")]
    pub image_default_format: String,
    #[serde(default = "default_thumb_size")]
    pub thumbnail_default_max_width: u32,
    #[serde(default = "default_thumb_size")]
    pub thumbnail_default_max_height: u32,
    #[serde(default)]
    pub max_images: Option<u64>,
    #[serde(default)]
    pub max_size: Option<u64>,
    pub memory_cache_configuration: LevelConfig,
    pub file_cache_configuration: FileCacheSettings,
    pub object_cache_configuration: LevelConfig,
    pub persistent_store_configuration: PersistentStoreSettings,
    #[serde(default)]
    pub pid_file: Option<PathBuf>,
    #[serde(default)]
    pub repository_base_pathname: Option<PathBuf>,
}

fn default_format() -> String {
    "jpg".to_string()
}

fn default_thumb_size() -> u32 {
    256
}

impl CoreConfig {
    pub fn from_yaml(raw: &str) -> CoreResult<Self> {
        serde_yaml::from_str(raw).map_err(|e| CoreError::ConfigError(e.to_string()))
    }

    /// Assembles the cache chain (memory -> file -> object-cache) and the
    /// originals store into a ready-to-use `DerivationCoordinator`, given a
    /// concrete `ObjectBackend` and `Transform` (both external
    /// collaborators this crate only depends on via trait). Building an
    /// explicit `CoreContext` here — rather than stashing the chain behind
    /// a global singleton — keeps multiple coordinators constructible side
    /// by side, e.g. in tests.
    pub async fn build(&self, backend: Arc<dyn ObjectBackend>, transform: Arc<dyn Transform>) -> CoreResult<DerivationCoordinator> {
        // Resolve credentials up front so a misconfigured environment fails
        // fast at startup rather than on the first request.
        self.persistent_store_configuration.access_key.resolve()?;
        self.persistent_store_configuration.secret_key.resolve()?;

        let stats = Arc::new(CacheStats::new());
        let alarm_sink: Arc<dyn AlarmSink> = Arc::new(NullAlarmSink);

        let object_cache: Arc<dyn CacheLevel> = Arc::new(ObjectCache::new(
            backend.clone(),
            self.object_cache_configuration.priority(),
            self.object_cache_configuration.writeback(),
            stats.clone(),
        ));

        let file_cache_config = FileCacheConfig {
            root: self.file_cache_configuration.root.clone(),
            max_bytes: self.file_cache_configuration.level.max_bytes,
            max_elements: self.file_cache_configuration.level.max_elements,
            evict_start_ratio: self.file_cache_configuration.level.evict_start_ratio,
            evict_stop_ratio: self.file_cache_configuration.level.evict_stop_ratio,
            priority: self.file_cache_configuration.level.priority(),
            writeback: self.file_cache_configuration.level.writeback(),
            alarm_free_ratio: self.file_cache_configuration.level.alarm_free_ratio,
        };
        let file_cache = Arc::new(FileCache::open(file_cache_config, Some(object_cache.clone()), alarm_sink.clone(), stats.clone()).await?);

        let memory_cache_config = MemoryCacheConfig {
            max_bytes: self.memory_cache_configuration.max_bytes,
            max_elements: self.memory_cache_configuration.max_elements,
            evict_start_ratio: self.memory_cache_configuration.evict_start_ratio,
            evict_stop_ratio: self.memory_cache_configuration.evict_stop_ratio,
            priority: self.memory_cache_configuration.priority(),
            writeback: self.memory_cache_configuration.writeback(),
            alarm_free_ratio: self.memory_cache_configuration.alarm_free_ratio,
        };
        let memory_cache: Arc<dyn CacheLevel> = Arc::new(MemoryCache::new(
            memory_cache_config,
            Some(file_cache.clone() as Arc<dyn CacheLevel>),
            alarm_sink.clone(),
            stats.clone(),
        ));

        let originals = Arc::new(ObjectStore::new(backend, Some(file_cache), stats.clone()));

        Ok(DerivationCoordinator::new(memory_cache, originals, transform, stats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_credential_resolves_from_environment() {
        std::env::set_var("IMGDERIV_TEST_KEY", "secret-value");
        let cred = Credential::Env((EnvTag::Env, "IMGDERIV_TEST_KEY".to_string()));
        assert_eq!(cred.resolve().unwrap(), "secret-value");
        std::env::remove_var("IMGDERIV_TEST_KEY");
    }

    #[test]
    fn missing_env_credential_is_a_config_error() {
        let cred = Credential::Env((EnvTag::Env, "IMGDERIV_DEFINITELY_UNSET".to_string()));
        assert!(matches!(cred.resolve(), Err(CoreError::ConfigError(_))));
    }

    #[test]
    fn literal_credential_passes_through() {
        let cred = Credential::Literal("plain".to_string());
        assert_eq!(cred.resolve().unwrap(), "plain");
    }

    #[test]
    fn parses_a_complete_yaml_document() {
        let yaml = r#"
canonical_format: jpg
image_default_format: jpg
thumbnail_default_max_width: 128
thumbnail_default_max_height: 128
memory_cache_configuration:
  max_bytes: 1048576
  priority: newest
  writeback: lazy
file_cache_configuration:
  root: /tmp/imgderiv-cache
  max_bytes: 1073741824
  priority: largest
  writeback: eager
object_cache_configuration:
  priority: thumbnail
  writeback: never
persistent_store_configuration:
  endpoint: https://objects.example.com
  bucket: images
  access_key: ["env", "IMGDERIV_ACCESS_KEY"]
  secret_key: ["env", "IMGDERIV_SECRET_KEY"]
"#;
        let config = CoreConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.memory_cache_configuration.max_bytes, Some(1048576));
        assert_eq!(config.file_cache_configuration.root, PathBuf::from("/tmp/imgderiv-cache"));
    }
}
