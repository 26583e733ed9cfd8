//! Environment-sourced configuration, read once at startup.
//!
//! No runtime mutation path: a process restart (or an external configuration
//! layer) is the only way values change.

use crate::cache::{CacheConfig, RedisStore, SharedCache};
use crate::resilience::{CircuitBreakerConfig, RateLimit, RateLimitSet};
use crate::Result;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

const ENV_PREFIX: &str = "CLASSIFY_GUARD";

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// URL of the shared key-value store (`redis://` or `rediss://` for TLS).
    pub store_url: String,
    pub cache: CacheConfig,
    pub breaker: CircuitBreakerConfig,
    pub limits: RateLimitSet,
    /// TTL for cached classification results.
    pub result_ttl: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            store_url: "redis://127.0.0.1:6379".into(),
            cache: CacheConfig::default(),
            breaker: CircuitBreakerConfig::default(),
            limits: RateLimitSet::default(),
            result_ttl: Duration::from_secs(3600),
        }
    }
}

impl PipelineConfig {
    /// Read configuration from `CLASSIFY_GUARD_*` environment variables,
    /// falling back to defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let var = |suffix: &str| get(&format!("{}_{}", ENV_PREFIX, suffix));
        let parse = |suffix: &str, fallback: u64| parse_or(var(suffix), fallback);

        let cache = CacheConfig::new()
            .with_namespace(var("NAMESPACE").unwrap_or(defaults.cache.namespace))
            .with_default_ttl(Duration::from_secs(parse(
                "CACHE_TTL_SECS",
                defaults.cache.default_ttl.as_secs(),
            )));

        let breaker = CircuitBreakerConfig::new()
            .with_failure_threshold(parse("FAILURE_THRESHOLD", 5) as u32)
            .with_timeout(Duration::from_secs(parse("BREAKER_TIMEOUT_SECS", 60)))
            .with_success_threshold(parse("SUCCESS_THRESHOLD", 2) as u32)
            .with_call_timeout(Duration::from_secs(parse("CALL_TIMEOUT_SECS", 30)));

        let mut per_user = RateLimit::per_user(
            parse("USER_REQUESTS", 30) as u32,
            Duration::from_secs(parse("USER_WINDOW_SECS", 60)),
        );
        if let Some(limit) = var("USER_COST_LIMIT").and_then(|v| f64::from_str(&v).ok()) {
            per_user = per_user.with_cost_limit(limit);
        } else if let Some(limit) = defaults.limits.per_user.cost_limit {
            per_user = per_user.with_cost_limit(limit);
        }

        let limits = RateLimitSet {
            per_user,
            global: RateLimit::global(
                parse("GLOBAL_REQUESTS", 600) as u32,
                Duration::from_secs(parse("GLOBAL_WINDOW_SECS", 60)),
            ),
            per_endpoint: RateLimit::per_endpoint(
                parse("ENDPOINT_REQUESTS", 120) as u32,
                Duration::from_secs(parse("ENDPOINT_WINDOW_SECS", 60)),
            ),
        };

        let result_ttl = Duration::from_secs(parse(
            "RESULT_TTL_SECS",
            defaults.result_ttl.as_secs(),
        ));

        Self {
            store_url: var("STORE_URL").unwrap_or(defaults.store_url),
            cache,
            breaker,
            limits,
            result_ttl,
        }
    }

    /// Connect to the configured store and wrap it in a [`SharedCache`].
    pub async fn connect_cache(&self) -> Result<Arc<SharedCache>> {
        let backend = RedisStore::connect(&self.store_url).await?;
        Ok(Arc::new(SharedCache::new(
            self.cache.clone(),
            Arc::new(backend),
        )))
    }
}

fn parse_or(value: Option<String>, fallback: u64) -> u64 {
    value.and_then(|v| v.parse().ok()).unwrap_or(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_without_environment() {
        let cfg = PipelineConfig::from_lookup(|_| None);
        assert_eq!(cfg.store_url, "redis://127.0.0.1:6379");
        assert_eq!(cfg.breaker.failure_threshold, 5);
        assert_eq!(cfg.limits.per_user.requests, 30);
        assert_eq!(cfg.result_ttl, Duration::from_secs(3600));
    }

    #[test]
    fn environment_overrides_apply() {
        let mut env = HashMap::new();
        env.insert("CLASSIFY_GUARD_STORE_URL", "rediss://cache.internal:6380");
        env.insert("CLASSIFY_GUARD_NAMESPACE", "prod-eu");
        env.insert("CLASSIFY_GUARD_FAILURE_THRESHOLD", "3");
        env.insert("CLASSIFY_GUARD_USER_REQUESTS", "10");
        env.insert("CLASSIFY_GUARD_USER_COST_LIMIT", "7.5");
        let cfg = PipelineConfig::from_lookup(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.store_url, "rediss://cache.internal:6380");
        assert_eq!(cfg.cache.namespace, "prod-eu");
        assert_eq!(cfg.breaker.failure_threshold, 3);
        assert_eq!(cfg.limits.per_user.requests, 10);
        assert_eq!(cfg.limits.per_user.cost_limit, Some(7.5));
    }

    #[test]
    fn unparsable_values_fall_back() {
        let mut env = HashMap::new();
        env.insert("CLASSIFY_GUARD_FAILURE_THRESHOLD", "banana");
        let cfg = PipelineConfig::from_lookup(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.breaker.failure_threshold, 5);
    }
}
