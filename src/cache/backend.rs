//! Storage backend trait and the disabled backend.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{FredError, Result};

/// Key/value store with per-entry expiry.
///
/// Values are opaque byte payloads; serialization is the
/// [`CacheManager`](super::CacheManager)'s job. Implementations must be
/// safe for concurrent use and must not block longer than a fast local
/// operation.
///
/// A `ttl` of `None` or zero on [`set()`](Self::set) means "do not persist":
/// the call is a successful no-op.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Backend name for diagnostics (e.g. "memory", "disk").
    fn name(&self) -> &'static str;

    /// Whether this backend stores anything at all.
    fn is_enabled(&self) -> bool {
        true
    }

    /// Fetch a live entry. Expired entries are removed and reported absent.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store an entry for `ttl`.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()>;

    /// Remove one entry. Missing keys are not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Remove every entry whose key starts with `prefix`, or everything.
    async fn clear(&self, prefix: Option<&str>) -> Result<()>;

    /// Approximate number of stored entries.
    async fn len(&self) -> u64;
}

/// Which backend to build from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
    #[default]
    Memory,
    Disk,
    None,
}

impl std::str::FromStr for CacheBackendKind {
    type Err = FredError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "memory" | "inmemory" | "local" => Ok(Self::Memory),
            "disk" | "diskcache" => Ok(Self::Disk),
            "none" | "null" | "off" => Ok(Self::None),
            other => Err(FredError::Configuration(format!(
                "unknown cache backend '{other}' (expected memory, disk or none)"
            ))),
        }
    }
}

/// Backend used when caching is turned off.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullBackend;

#[async_trait]
impl CacheBackend for NullBackend {
    fn name(&self) -> &'static str {
        "none"
    }

    fn is_enabled(&self) -> bool {
        false
    }

    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: Vec<u8>, _ttl: Option<Duration>) -> Result<()> {
        Ok(())
    }

    async fn delete(&self, _key: &str) -> Result<()> {
        Ok(())
    }

    async fn clear(&self, _prefix: Option<&str>) -> Result<()> {
        Ok(())
    }

    async fn len(&self) -> u64 {
        0
    }
}

/// Longest lifetime any backend grants an entry. Longer TTLs are capped.
pub const MAX_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Normalize a TTL: `None` and zero both mean "do not store"; anything
/// above [`MAX_TTL`] is capped.
pub(crate) fn effective_ttl(ttl: Option<Duration>) -> Option<Duration> {
    ttl.filter(|t| !t.is_zero()).map(|t| t.min(MAX_TTL))
}
