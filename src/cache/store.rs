//! Fail-soft cache wrapper.

use super::backend::CacheBackend;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Process-wide namespace prepended to every key. Prevents collisions
    /// across deployments sharing one store.
    pub namespace: String,
    pub default_ttl: Duration,
    /// How long a degraded cache short-circuits before letting one call
    /// through to re-probe the backend.
    pub probe_cooldown: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            namespace: "classify-guard".into(),
            default_ttl: Duration::from_secs(3600),
            probe_cooldown: Duration::from_secs(5),
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_namespace(mut self, ns: impl Into<String>) -> Self {
        self.namespace = ns.into();
        self
    }
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }
    pub fn with_probe_cooldown(mut self, cooldown: Duration) -> Self {
        self.probe_cooldown = cooldown;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub errors: u64,
}

impl CacheStats {
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Default)]
struct AtomicStats {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    errors: AtomicU64,
}

impl AtomicStats {
    fn to_stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Health probe result, queryable independently for readiness checks.
#[derive(Debug, Clone)]
pub struct CacheHealth {
    pub healthy: bool,
    pub latency_ms: Option<u64>,
    pub backend: &'static str,
}

/// Shared key-value cache with JSON serialization and fail-soft semantics.
///
/// Every operation absorbs backend connectivity errors: they are logged and
/// converted to `None`/`false`, never propagated. A failed operation flips an
/// internal unhealthy flag; while it is set, calls short-circuit except that
/// one call per `probe_cooldown` is let through to re-probe the backend, so a
/// sustained outage does not pay a connection timeout per request and the
/// cache restores itself once the store is reachable again. An explicit
/// [`SharedCache::health`] probe also refreshes the flag.
pub struct SharedCache {
    config: CacheConfig,
    backend: Arc<dyn CacheBackend>,
    healthy: AtomicBool,
    started: Instant,
    /// Milliseconds since `started` before a degraded cache probes again.
    next_probe_ms: AtomicU64,
    stats: AtomicStats,
}

impl SharedCache {
    pub fn new(config: CacheConfig, backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            config,
            backend,
            healthy: AtomicBool::new(true),
            started: Instant::now(),
            next_probe_ms: AtomicU64::new(0),
            stats: AtomicStats::default(),
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.config.default_ttl
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}:{}", self.config.namespace, key)
    }

    fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// Whether this call may touch the backend. Healthy caches always may; a
    /// degraded cache admits exactly one probing call per cooldown and
    /// short-circuits the rest.
    fn may_attempt(&self) -> bool {
        if self.healthy.load(Ordering::Relaxed) {
            return true;
        }
        let now = self.elapsed_ms();
        let next = self.next_probe_ms.load(Ordering::Relaxed);
        now >= next
            && self
                .next_probe_ms
                .compare_exchange(
                    next,
                    now + self.config.probe_cooldown.as_millis() as u64,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                )
                .is_ok()
    }

    fn mark_recovered(&self) {
        if !self.healthy.swap(true, Ordering::Relaxed) {
            tracing::info!(backend = self.backend.name(), "cache backend reachable again, resuming service");
        }
    }

    fn mark_error(&self, op: &str, key: &str, err: &crate::Error) {
        self.stats.errors.fetch_add(1, Ordering::Relaxed);
        self.healthy.store(false, Ordering::Relaxed);
        self.next_probe_ms.store(
            self.elapsed_ms() + self.config.probe_cooldown.as_millis() as u64,
            Ordering::Relaxed,
        );
        tracing::warn!(op, key, error = %err, "cache operation failed, degrading to miss");
    }

    /// Read a raw JSON value. Payloads that are not valid JSON come back as
    /// `Value::String`, so non-JSON writers sharing the store are not treated
    /// as errors.
    pub async fn get_value(&self, key: &str) -> Option<Value> {
        if !self.may_attempt() {
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }
        let full = self.namespaced(key);
        match self.backend.get(&full).await {
            Ok(Some(raw)) => {
                self.mark_recovered();
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                Some(
                    serde_json::from_str(&raw)
                        .unwrap_or_else(|_| Value::String(raw)),
                )
            }
            Ok(None) => {
                self.mark_recovered();
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(e) => {
                self.mark_error("get", key, &e);
                None
            }
        }
    }

    /// Typed read. A value that fails to decode as `T` is a miss, not an
    /// error.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get_value(key).await?;
        serde_json::from_value(value).ok()
    }

    /// Write a value with a TTL. Returns whether the write landed.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> bool {
        if !self.may_attempt() {
            return false;
        }
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(key, error = %e, "unserializable cache value dropped");
                return false;
            }
        };
        let full = self.namespaced(key);
        match self.backend.set(&full, &raw, ttl).await {
            Ok(()) => {
                self.mark_recovered();
                self.stats.sets.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(e) => {
                self.mark_error("set", key, &e);
                false
            }
        }
    }

    pub async fn delete(&self, key: &str) -> bool {
        if !self.may_attempt() {
            return false;
        }
        let full = self.namespaced(key);
        match self.backend.delete(&full).await {
            Ok(removed) => {
                self.mark_recovered();
                removed
            }
            Err(e) => {
                self.mark_error("delete", key, &e);
                false
            }
        }
    }

    pub async fn exists(&self, key: &str) -> bool {
        if !self.may_attempt() {
            return false;
        }
        let full = self.namespaced(key);
        match self.backend.exists(&full).await {
            Ok(found) => {
                self.mark_recovered();
                found
            }
            Err(e) => {
                self.mark_error("exists", key, &e);
                false
            }
        }
    }

    /// Atomic windowed increment. Returns the post-increment value, or `None`
    /// when the store is unavailable; callers decide their own fail-open or
    /// fail-closed policy.
    pub async fn increment(&self, key: &str, amount: i64, ttl: Duration) -> Option<i64> {
        if !self.may_attempt() {
            return None;
        }
        let full = self.namespaced(key);
        match self.backend.incr_by(&full, amount, ttl).await {
            Ok(value) => {
                self.mark_recovered();
                Some(value)
            }
            Err(e) => {
                self.mark_error("increment", key, &e);
                None
            }
        }
    }

    /// Ping the backend and refresh the unhealthy flag without waiting for
    /// the probe cooldown.
    pub async fn health(&self) -> CacheHealth {
        let started = Instant::now();
        match self.backend.ping().await {
            Ok(()) => {
                self.mark_recovered();
                CacheHealth {
                    healthy: true,
                    latency_ms: Some(started.elapsed().as_millis() as u64),
                    backend: self.backend.name(),
                }
            }
            Err(e) => {
                self.healthy.store(false, Ordering::Relaxed);
                tracing::warn!(error = %e, "cache health probe failed");
                CacheHealth {
                    healthy: false,
                    latency_ms: None,
                    backend: self.backend.name(),
                }
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.to_stats()
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }
}

#[cfg(test)]
mod tests {
    use super::super::backend::{MemoryStore, UnreachableStore};
    use super::*;
    use serde::Deserialize;

    fn memory_cache() -> SharedCache {
        SharedCache::new(CacheConfig::default(), Arc::new(MemoryStore::new()))
    }

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Payload {
        category: String,
        confidence: f64,
    }

    #[tokio::test]
    async fn round_trip_typed_value() {
        let cache = memory_cache();
        let payload = Payload {
            category: "image_generation".into(),
            confidence: 0.92,
        };
        assert!(cache.set("k", &payload, Duration::from_secs(60)).await);
        let back: Payload = cache.get("k").await.unwrap();
        assert_eq!(back, payload);
    }

    #[tokio::test]
    async fn unset_key_is_absent() {
        let cache = memory_cache();
        assert_eq!(cache.get_value("missing").await, None);
        assert!(!cache.exists("missing").await);
    }

    #[tokio::test]
    async fn expired_key_is_absent() {
        let cache = memory_cache();
        assert!(cache.set("k", &1u32, Duration::from_millis(20)).await);
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(cache.get::<u32>("k").await, None);
    }

    #[tokio::test]
    async fn non_json_value_falls_back_to_string() {
        let backend = Arc::new(MemoryStore::new());
        let cache = SharedCache::new(CacheConfig::default(), backend.clone());
        use super::super::backend::CacheBackend;
        backend
            .set("classify-guard:raw", "not json at all", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(
            cache.get_value("raw").await,
            Some(Value::String("not json at all".into()))
        );
    }

    #[tokio::test]
    async fn backend_errors_become_absent() {
        let cache = SharedCache::new(CacheConfig::default(), Arc::new(UnreachableStore));
        assert_eq!(cache.get_value("k").await, None);
        assert!(!cache.set("k", &1u32, Duration::from_secs(1)).await);
        assert!(!cache.delete("k").await);
        assert_eq!(cache.increment("n", 1, Duration::from_secs(1)).await, None);
        assert!(cache.stats().errors >= 1);
    }

    /// Backend whose availability can be flipped mid-test, counting how many
    /// calls actually reach it.
    struct ToggleStore {
        inner: MemoryStore,
        down: std::sync::atomic::AtomicBool,
        calls: AtomicU64,
    }

    impl ToggleStore {
        fn new() -> Self {
            Self {
                inner: MemoryStore::new(),
                down: std::sync::atomic::AtomicBool::new(false),
                calls: AtomicU64::new(0),
            }
        }

        fn set_down(&self, down: bool) {
            self.down.store(down, Ordering::Relaxed);
        }

        fn gate(&self) -> crate::Result<()> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            if self.down.load(Ordering::Relaxed) {
                Err(crate::Error::CacheUnavailable {
                    message: "store down".into(),
                })
            } else {
                Ok(())
            }
        }
    }

    #[async_trait::async_trait]
    impl super::super::backend::CacheBackend for ToggleStore {
        async fn get(&self, key: &str) -> crate::Result<Option<String>> {
            self.gate()?;
            self.inner.get(key).await
        }
        async fn set(&self, key: &str, value: &str, ttl: Duration) -> crate::Result<()> {
            self.gate()?;
            self.inner.set(key, value, ttl).await
        }
        async fn delete(&self, key: &str) -> crate::Result<bool> {
            self.gate()?;
            self.inner.delete(key).await
        }
        async fn exists(&self, key: &str) -> crate::Result<bool> {
            self.gate()?;
            self.inner.exists(key).await
        }
        async fn incr_by(&self, key: &str, amount: i64, ttl: Duration) -> crate::Result<i64> {
            self.gate()?;
            self.inner.incr_by(key, amount, ttl).await
        }
        async fn ping(&self) -> crate::Result<()> {
            self.gate()
        }
        fn name(&self) -> &'static str {
            "toggle"
        }
    }

    #[tokio::test]
    async fn degraded_cache_short_circuits_within_cooldown() {
        let backend = Arc::new(ToggleStore::new());
        let cache = SharedCache::new(
            CacheConfig::new().with_probe_cooldown(Duration::from_secs(60)),
            backend.clone(),
        );
        backend.set_down(true);
        assert!(!cache.set("k", &1u32, Duration::from_secs(60)).await);
        let after_failure = backend.calls.load(Ordering::Relaxed);
        // Cooldown has not elapsed: these never reach the backend.
        for _ in 0..5 {
            assert_eq!(cache.get::<u32>("k").await, None);
            assert!(!cache.set("k", &1u32, Duration::from_secs(60)).await);
        }
        assert_eq!(backend.calls.load(Ordering::Relaxed), after_failure);
    }

    #[tokio::test]
    async fn degraded_cache_self_recovers_after_cooldown() {
        let backend = Arc::new(ToggleStore::new());
        let cache = SharedCache::new(
            CacheConfig::new().with_probe_cooldown(Duration::from_millis(20)),
            backend.clone(),
        );
        backend.set_down(true);
        assert!(!cache.set("k", &1u32, Duration::from_secs(60)).await);

        // Backend comes back; once the cooldown elapses the next call probes
        // through and restores service with no external health() poll.
        backend.set_down(false);
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(cache.set("k", &1u32, Duration::from_secs(60)).await);
        assert_eq!(cache.get::<u32>("k").await, Some(1));
        assert_eq!(cache.increment("n", 1, Duration::from_secs(60)).await, Some(1));
    }

    #[tokio::test]
    async fn failed_probe_rearms_the_cooldown() {
        let backend = Arc::new(ToggleStore::new());
        let cache = SharedCache::new(
            CacheConfig::new().with_probe_cooldown(Duration::from_millis(20)),
            backend.clone(),
        );
        backend.set_down(true);
        assert!(!cache.set("k", &1u32, Duration::from_secs(60)).await);
        tokio::time::sleep(Duration::from_millis(40)).await;

        // Still down: the probe fails and the flag stays degraded.
        assert_eq!(cache.get::<u32>("k").await, None);
        let after_probe = backend.calls.load(Ordering::Relaxed);
        assert_eq!(cache.get::<u32>("k").await, None);
        assert_eq!(backend.calls.load(Ordering::Relaxed), after_probe);
    }

    #[tokio::test]
    async fn health_probe_restores_service_immediately() {
        let backend = Arc::new(ToggleStore::new());
        let cache = SharedCache::new(
            CacheConfig::new().with_probe_cooldown(Duration::from_secs(60)),
            backend.clone(),
        );
        backend.set_down(true);
        assert!(!cache.set("k", &1u32, Duration::from_secs(60)).await);
        backend.set_down(false);
        // health() bypasses the cooldown.
        assert!(cache.health().await.healthy);
        assert!(cache.set("k", &1u32, Duration::from_secs(60)).await);
        assert_eq!(cache.get::<u32>("k").await, Some(1));
    }

    #[tokio::test]
    async fn keys_are_namespaced() {
        let backend = Arc::new(MemoryStore::new());
        let a = SharedCache::new(
            CacheConfig::new().with_namespace("deploy-a"),
            backend.clone(),
        );
        let b = SharedCache::new(
            CacheConfig::new().with_namespace("deploy-b"),
            backend,
        );
        assert!(a.set("k", &"va", Duration::from_secs(60)).await);
        assert_eq!(b.get::<String>("k").await, None);
        assert_eq!(a.get::<String>("k").await, Some("va".into()));
    }

    #[tokio::test]
    async fn stats_track_hits_and_misses() {
        let cache = memory_cache();
        cache.set("k", &1u32, Duration::from_secs(60)).await;
        cache.get::<u32>("k").await;
        cache.get::<u32>("absent").await;
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.sets, 1);
        assert!(stats.hit_ratio() > 0.49 && stats.hit_ratio() < 0.51);
    }
}
