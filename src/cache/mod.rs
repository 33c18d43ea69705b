//! Caching subsystem.
//!
//! Two layers:
//!
//! - [`CacheBackend`]: byte-oriented key/value storage with per-entry TTL.
//!   Implementations: [`MemoryBackend`] (bounded moka cache, the default),
//!   [`DiskBackend`] (one file per entry, survives restarts) and
//!   [`NullBackend`] (caching off). Other stores plug in by implementing
//!   the trait.
//!
//! - [`CacheManager`]: typed front-end used by the client. Adds namespace
//!   isolation, per-namespace default TTLs, JSON (de)serialization, a
//!   per-operation timeout and hit/miss/store counters. Every failure is
//!   absorbed here so a broken cache degrades to "always miss" instead of
//!   failing requests.

pub mod backend;
pub mod disk;
pub mod manager;
pub mod memory;

pub use backend::{CacheBackend, CacheBackendKind, MAX_TTL, NullBackend};
pub use disk::DiskBackend;
pub use manager::{
    CacheConfig, CacheDescription, CacheManager, DEFAULT_NAMESPACE_TTLS, NamespaceDescription,
    NamespaceStats, default_cache_dir,
};
pub use memory::{DEFAULT_MAX_ENTRIES, MemoryBackend};
