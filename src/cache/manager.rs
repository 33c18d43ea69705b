//! Namespaced cache manager.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use super::backend::{self, CacheBackend, CacheBackendKind, NullBackend};
use super::disk::DiskBackend;
use super::memory::{DEFAULT_MAX_ENTRIES, MemoryBackend};
use crate::telemetry;
use crate::Result;

/// Built-in namespace TTLs, in seconds.
///
/// Search results move quickly; category and tag metadata rarely change.
pub const DEFAULT_NAMESPACE_TTLS: &[(&str, u64)] = &[
    ("search_series", 300),
    ("search_series_tags", 300),
    ("search_series_related_tags", 300),
    ("series_by_tags", 300),
    ("get_series_tags", 900),
    ("get_fred_tags", 1800),
    ("search_fred_related_tags", 1800),
    ("related_tags", 1800),
    ("category", 3600),
    ("category_children", 3600),
    ("category_related", 3600),
    ("category_series", 900),
    ("category_tags", 1800),
    ("category_related_tags", 1800),
    ("observations", 900),
];

/// Default TTL for namespaces without an explicit entry.
const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Default ceiling on any single backend operation.
const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_millis(250);

/// Configuration for the cache manager.
///
/// ```rust
/// # use fredgate::cache::{CacheBackendKind, CacheConfig};
/// # use std::time::Duration;
/// let config = CacheConfig::new()
///     .backend(CacheBackendKind::Memory)
///     .default_ttl(Some(Duration::from_secs(600)))
///     .namespace("observations", Some(Duration::from_secs(86_400)));
/// assert_eq!(config.namespaces["observations"], Some(Duration::from_secs(86_400)));
/// ```
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Master switch. Default: true.
    pub enabled: bool,
    /// Storage backend. Default: memory.
    pub backend: CacheBackendKind,
    /// TTL for namespaces without their own entry. Default: 5 minutes.
    pub default_ttl: Option<Duration>,
    /// Memory backend capacity. Default: 10,000.
    pub max_entries: u64,
    /// Disk backend directory. Default: `<user cache dir>/fredgate`.
    pub directory: Option<PathBuf>,
    /// Ceiling on any single backend call. Default: 250ms.
    pub operation_timeout: Duration,
    /// Per-namespace TTLs; `None` disables caching for the namespace.
    pub namespaces: BTreeMap<String, Option<Duration>>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: CacheBackendKind::Memory,
            default_ttl: Some(DEFAULT_TTL),
            max_entries: DEFAULT_MAX_ENTRIES,
            directory: None,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            namespaces: DEFAULT_NAMESPACE_TTLS
                .iter()
                .map(|(name, secs)| ((*name).to_owned(), Some(Duration::from_secs(*secs))))
                .collect(),
        }
    }
}

impl CacheConfig {
    /// Create a new config with sensible defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a config with caching turned off.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn backend(mut self, kind: CacheBackendKind) -> Self {
        self.backend = kind;
        self
    }

    pub fn default_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn max_entries(mut self, n: u64) -> Self {
        self.max_entries = n;
        self
    }

    pub fn directory(mut self, path: impl Into<PathBuf>) -> Self {
        self.directory = Some(path.into());
        self
    }

    pub fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Set (or override) the TTL of one namespace.
    pub fn namespace(mut self, name: &str, ttl: Option<Duration>) -> Self {
        self.namespaces.insert(normalize(name), ttl);
        self
    }
}

/// Default disk cache location: `~/.cache/fredgate`.
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from(".cache"))
        .join("fredgate")
}

/// Hit/miss/store counts for one namespace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NamespaceStats {
    pub hits: u64,
    pub misses: u64,
    pub stores: u64,
}

/// Configuration and counters of one namespace, for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NamespaceDescription {
    pub ttl_secs: Option<u64>,
    #[serde(flatten)]
    pub stats: NamespaceStats,
}

/// Snapshot of cache configuration and runtime counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheDescription {
    pub enabled: bool,
    pub backend: String,
    pub default_ttl_secs: Option<u64>,
    pub entries: u64,
    pub namespaces: BTreeMap<String, NamespaceDescription>,
}

/// Cache front-end with namespace isolation, default TTLs and counters.
///
/// Keys are stored as `"{namespace}:{key}"` so unrelated call sites never
/// collide and a whole namespace can be invalidated by prefix. Values are
/// serialized with `serde_json`; a payload that no longer deserializes is
/// treated as a miss and deleted.
///
/// Backend failures and timeouts never reach the caller: they are logged
/// and reported as a miss (on read) or as "not stored" (on write).
pub struct CacheManager {
    backend: Arc<dyn CacheBackend>,
    enabled: bool,
    default_ttl: Option<Duration>,
    operation_timeout: Duration,
    namespace_ttls: RwLock<HashMap<String, Option<Duration>>>,
    stats: Mutex<HashMap<String, NamespaceStats>>,
}

impl CacheManager {
    /// Wrap a backend with no namespaces configured.
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            enabled: backend.is_enabled(),
            backend,
            default_ttl: Some(DEFAULT_TTL),
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            namespace_ttls: RwLock::new(HashMap::new()),
            stats: Mutex::new(HashMap::new()),
        }
    }

    /// Build the backend and namespace table described by `config`.
    pub fn from_config(config: &CacheConfig) -> Result<Self> {
        let backend: Arc<dyn CacheBackend> = if !config.enabled {
            Arc::new(NullBackend)
        } else {
            match config.backend {
                CacheBackendKind::Memory => Arc::new(MemoryBackend::new(config.max_entries)),
                CacheBackendKind::Disk => {
                    let dir = config.directory.clone().unwrap_or_else(default_cache_dir);
                    Arc::new(DiskBackend::open(dir)?)
                }
                CacheBackendKind::None => Arc::new(NullBackend),
            }
        };

        let manager = Self::new(backend)
            .with_default_ttl(config.default_ttl)
            .with_operation_timeout(config.operation_timeout);
        for (namespace, ttl) in &config.namespaces {
            manager.configure_namespace(namespace, *ttl);
        }

        if manager.enabled {
            info!(
                backend = manager.backend.name(),
                namespaces = config.namespaces.len(),
                "cache manager initialized"
            );
        } else {
            info!("cache manager initialized in disabled mode");
        }
        Ok(manager)
    }

    /// TTL used by namespaces without their own entry.
    pub fn with_default_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Set the default TTL of a namespace. `None` or zero disables caching
    /// for it.
    pub fn configure_namespace(&self, namespace: &str, ttl: Option<Duration>) {
        self.namespace_ttls
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(normalize(namespace), ttl);
    }

    /// TTL a write to `namespace` would get without an override.
    pub fn namespace_ttl(&self, namespace: &str) -> Option<Duration> {
        self.effective_ttl(namespace, None)
    }

    fn effective_ttl(&self, namespace: &str, ttl_override: Option<Duration>) -> Option<Duration> {
        if !self.enabled {
            return None;
        }
        let ttl = match ttl_override {
            Some(ttl) => Some(ttl),
            None => self
                .namespace_ttls
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .get(&normalize(namespace))
                .copied()
                .unwrap_or(self.default_ttl),
        };
        backend::effective_ttl(ttl)
    }

    /// Look up a value. `None` is a miss.
    pub async fn get<T: DeserializeOwned>(&self, namespace: &str, key: &str) -> Option<T> {
        if !self.enabled {
            return None;
        }
        let namespace = normalize(namespace);
        let full_key = namespaced_key(&namespace, key);

        let bytes = match tokio::time::timeout(self.operation_timeout, self.backend.get(&full_key))
            .await
        {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(e)) => {
                warn!(namespace = %namespace, error = %e, "cache read failed; treating as miss");
                None
            }
            Err(_) => {
                warn!(namespace = %namespace, "cache read timed out; treating as miss");
                None
            }
        };

        let value = match bytes.map(|bytes| serde_json::from_slice::<T>(&bytes)) {
            Some(Ok(value)) => Some(value),
            Some(Err(e)) => {
                warn!(namespace = %namespace, error = %e, "undeserializable cache entry; deleting");
                self.best_effort(self.backend.delete(&full_key), "delete")
                    .await;
                None
            }
            None => None,
        };

        if value.is_some() {
            self.record(&namespace, Event::Hit);
        } else {
            self.record(&namespace, Event::Miss);
        }
        value
    }

    /// Store a value. Returns `false` when caching is disabled for the
    /// namespace (a valid outcome) or the write failed.
    pub async fn set<T: Serialize>(
        &self,
        namespace: &str,
        key: &str,
        value: &T,
        ttl_override: Option<Duration>,
    ) -> bool {
        let Some(ttl) = self.effective_ttl(namespace, ttl_override) else {
            debug!(namespace, "caching disabled for namespace");
            return false;
        };
        let namespace = normalize(namespace);
        let bytes = match serde_json::to_vec(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(namespace = %namespace, error = %e, "failed to serialize cache value");
                return false;
            }
        };

        let full_key = namespaced_key(&namespace, key);
        let write = self.backend.set(&full_key, bytes, Some(ttl));
        match tokio::time::timeout(self.operation_timeout, write).await {
            Ok(Ok(())) => {
                self.record(&namespace, Event::Store);
                true
            }
            Ok(Err(e)) => {
                warn!(namespace = %namespace, error = %e, "cache write failed");
                false
            }
            Err(_) => {
                warn!(namespace = %namespace, "cache write timed out");
                false
            }
        }
    }

    /// Remove one entry.
    pub async fn delete(&self, namespace: &str, key: &str) {
        let full_key = namespaced_key(&normalize(namespace), key);
        self.best_effort(self.backend.delete(&full_key), "delete").await;
    }

    /// Remove every entry of a namespace.
    pub async fn invalidate_namespace(&self, namespace: &str) {
        let namespace = normalize(namespace);
        let prefix = format!("{namespace}:");
        self.best_effort(self.backend.clear(Some(&prefix)), "invalidate")
            .await;
        metrics::counter!(telemetry::CACHE_INVALIDATIONS_TOTAL, "namespace" => namespace.clone())
            .increment(1);
        info!(namespace = %namespace, "cache namespace invalidated");
    }

    /// Remove every entry of every namespace.
    pub async fn clear(&self) {
        self.best_effort(self.backend.clear(None), "clear").await;
    }

    async fn best_effort(
        &self,
        op: impl std::future::Future<Output = Result<()>>,
        action: &'static str,
    ) {
        match tokio::time::timeout(self.operation_timeout, op).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(action, error = %e, "cache operation failed"),
            Err(_) => warn!(action, "cache operation timed out"),
        }
    }

    fn record(&self, namespace: &str, event: Event) {
        {
            let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
            let entry = stats.entry(namespace.to_owned()).or_default();
            match event {
                Event::Hit => entry.hits += 1,
                Event::Miss => entry.misses += 1,
                Event::Store => entry.stores += 1,
            }
        }

        let name = match event {
            Event::Hit => telemetry::CACHE_HITS_TOTAL,
            Event::Miss => telemetry::CACHE_MISSES_TOTAL,
            Event::Store => telemetry::CACHE_STORES_TOTAL,
        };
        metrics::counter!(name, "namespace" => namespace.to_owned()).increment(1);
    }

    /// Per-namespace counters.
    pub fn metrics(&self) -> BTreeMap<String, NamespaceStats> {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }

    /// Counters for one namespace.
    pub fn namespace_stats(&self, namespace: &str) -> NamespaceStats {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&normalize(namespace))
            .copied()
            .unwrap_or_default()
    }

    /// Snapshot of configuration and counters.
    pub async fn describe(&self) -> CacheDescription {
        let stats = self.metrics();
        let ttls: Vec<(String, Option<Duration>)> = self
            .namespace_ttls
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();

        let mut namespaces = BTreeMap::new();
        for (name, ttl) in ttls {
            let stats = stats.get(&name).copied().unwrap_or_default();
            namespaces.insert(
                name,
                NamespaceDescription {
                    ttl_secs: ttl.filter(|t| !t.is_zero()).map(|t| t.as_secs()),
                    stats,
                },
            );
        }
        for (name, stats) in stats {
            namespaces
                .entry(name.clone())
                .or_insert_with(|| NamespaceDescription {
                    ttl_secs: self.namespace_ttl(&name).map(|t| t.as_secs()),
                    stats,
                });
        }

        CacheDescription {
            enabled: self.enabled,
            backend: self.backend.name().to_owned(),
            default_ttl_secs: self.default_ttl.map(|t| t.as_secs()),
            entries: self.backend.len().await,
            namespaces,
        }
    }
}

#[derive(Clone, Copy)]
enum Event {
    Hit,
    Miss,
    Store,
}

fn normalize(namespace: &str) -> String {
    namespace.trim().to_lowercase()
}

fn namespaced_key(namespace: &str, key: &str) -> String {
    format!("{namespace}:{key}")
}

impl std::fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheManager")
            .field("backend", &self.backend.name())
            .field("enabled", &self.enabled)
            .field("default_ttl", &self.default_ttl)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn manager() -> CacheManager {
        CacheManager::new(Arc::new(MemoryBackend::default()))
    }

    #[tokio::test]
    async fn set_then_get_counts_hit() {
        let cache = manager();
        assert!(cache.set("search", "k", &json!({"a": 1}), None).await);
        let value: Option<Value> = cache.get("search", "k").await;
        assert_eq!(value, Some(json!({"a": 1})));

        let stats = cache.namespace_stats("search");
        assert_eq!(stats, NamespaceStats { hits: 1, misses: 0, stores: 1 });
    }

    #[tokio::test]
    async fn namespaces_do_not_collide() {
        let cache = manager();
        cache.set("search", "k", &1u32, None).await;
        cache.set("category", "k", &2u32, None).await;
        assert_eq!(cache.get::<u32>("search", "k").await, Some(1));
        assert_eq!(cache.get::<u32>("category", "k").await, Some(2));
    }

    #[tokio::test]
    async fn namespace_names_are_normalized() {
        let cache = manager();
        cache.set(" Search ", "k", &1u32, None).await;
        assert_eq!(cache.get::<u32>("search", "k").await, Some(1));
    }

    #[tokio::test]
    async fn disabled_namespace_skips_store() {
        let cache = manager();
        cache.configure_namespace("volatile", None);
        assert!(!cache.set("volatile", "k", &1u32, None).await);
        assert_eq!(cache.get::<u32>("volatile", "k").await, None);
        assert_eq!(cache.namespace_stats("volatile").stores, 0);
    }

    #[tokio::test]
    async fn override_beats_namespace_ttl() {
        let cache = manager();
        cache.configure_namespace("volatile", None);
        assert!(
            cache
                .set("volatile", "k", &1u32, Some(Duration::from_secs(10)))
                .await
        );
        assert_eq!(cache.get::<u32>("volatile", "k").await, Some(1));
    }

    #[tokio::test]
    async fn type_mismatch_is_miss_and_deletes() {
        let cache = manager();
        cache.set("search", "k", &"text", None).await;
        assert_eq!(cache.get::<u32>("search", "k").await, None);
        assert_eq!(cache.get::<String>("search", "k").await, None);
        assert_eq!(cache.namespace_stats("search").misses, 2);
    }

    #[tokio::test]
    async fn null_backend_disables_everything() {
        let cache = CacheManager::new(Arc::new(NullBackend));
        assert!(!cache.is_enabled());
        assert!(!cache.set("search", "k", &1u32, None).await);
        assert_eq!(cache.get::<u32>("search", "k").await, None);
        assert_eq!(cache.namespace_ttl("search"), None);
    }

    #[test]
    fn default_config_has_builtin_namespaces() {
        let config = CacheConfig::default();
        assert_eq!(
            config.namespaces["category"],
            Some(Duration::from_secs(3600))
        );
        assert_eq!(
            config.namespaces["search_series"],
            Some(Duration::from_secs(300))
        );
    }

    #[test]
    fn disabled_config_builds_null_backend() {
        let cache = CacheManager::from_config(&CacheConfig::disabled()).unwrap();
        assert_eq!(cache.backend_name(), "none");
        assert!(!cache.is_enabled());
    }
}
