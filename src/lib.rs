//! # imgderiv-core
//!
//! Core of an on-demand image derivation service: given an `ImageIdentity`
//! and a set of `TransformParams`, produce the derived bytes (or a
//! pre-signed URL to them), probing a tiered cache chain before falling
//! back to deriving from the authoritative original. There is no separate
//! database — a derivative is fully determined by `(identity, params)`.
//!
//! ## Module organization
//!
//! - [`identity`] / [`key`] - `ImageIdentity` and the canonical,
//!   injective `DerivativeKey` encoding of `(identity, params)`
//! - [`entry`] - `CachedEntry`, the value type every cache level stores
//! - [`eviction`] - the shared eviction policy engine (`run_pass`) used by
//!   every level instead of duplicating ordering logic per cache
//! - [`level`] - the `CacheLevel` trait chained across tiers, plus
//!   `AlarmEvent`/`AlarmSink`
//! - [`memory_cache`], [`file_cache`], [`object_cache`], [`object_store`] -
//!   the four concrete levels
//! - [`backend`] - the abstract `ObjectBackend` a deployment plugs in
//! - [`singleflight`] - collapses concurrent derivations for the same key
//! - [`coordinator`] - `DerivationCoordinator`, the crate's entry point
//! - [`transform`] - the `Transform` façade a deployment plugs in
//! - [`config`] - YAML configuration and `CoreConfig::build`
//! - [`error`] - `CoreError` and `CoreResult`
//! - [`stats`] - atomic hit/miss/eviction/writeback/alarm counters
//! - [`deadline`] - the `Deadline` wrapper every coordinator call takes

pub mod backend;
pub mod config;
pub mod coordinator;
pub mod deadline;
pub mod entry;
pub mod error;
pub mod eviction;
pub mod file_cache;
pub mod identity;
pub mod key;
pub mod level;
pub mod memory_cache;
pub mod object_cache;
pub mod object_store;
pub mod singleflight;
pub mod stats;
pub mod transform;

pub use coordinator::DerivationCoordinator;
pub use deadline::Deadline;
pub use error::{CoreError, CoreResult};
pub use identity::ImageIdentity;
pub use key::{DerivativeKey, Format, TransformParams};
