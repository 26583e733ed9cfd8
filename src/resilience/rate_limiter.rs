use crate::cache::SharedCache;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Extra TTL on window counters so a bucket outlives its window slightly
/// instead of vanishing mid-check.
const WINDOW_TTL_BUFFER: Duration = Duration::from_secs(10);

/// Identifier used for process-global limits.
pub const GLOBAL_IDENTIFIER: &str = "global";

/// Source of the wall-clock seconds that window buckets are derived from.
/// Injectable so window tests can pin the bucket instead of straddling a
/// real boundary.
pub type WindowClock = Arc<dyn Fn() -> u64 + Send + Sync>;

fn wall_clock() -> WindowClock {
    Arc::new(|| {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitScope {
    User,
    Global,
    Endpoint,
    ApiKey,
}

impl LimitScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            LimitScope::User => "user",
            LimitScope::Global => "global",
            LimitScope::Endpoint => "endpoint",
            LimitScope::ApiKey => "api_key",
        }
    }
}

/// Immutable limit configuration: a fixed-window request budget plus an
/// optional cumulative cost budget for the same window.
#[derive(Debug, Clone)]
pub struct RateLimit {
    pub requests: u32,
    pub window: Duration,
    pub scope: LimitScope,
    pub cost_limit: Option<f64>,
}

impl RateLimit {
    pub fn new(scope: LimitScope, requests: u32, window: Duration) -> Self {
        Self {
            requests: requests.max(1),
            window,
            scope,
            cost_limit: None,
        }
    }

    pub fn per_user(requests: u32, window: Duration) -> Self {
        Self::new(LimitScope::User, requests, window)
    }

    pub fn global(requests: u32, window: Duration) -> Self {
        Self::new(LimitScope::Global, requests, window)
    }

    pub fn per_endpoint(requests: u32, window: Duration) -> Self {
        Self::new(LimitScope::Endpoint, requests, window)
    }

    pub fn with_cost_limit(mut self, limit: f64) -> Self {
        self.cost_limit = Some(limit);
        self
    }
}

/// Outcome of an admission check, including diagnostics for denied and
/// degraded paths.
#[derive(Debug, Clone)]
pub struct RateDecision {
    pub allowed: bool,
    pub scope: LimitScope,
    pub identifier: String,
    pub limit: u32,
    /// Requests left in the current window (0 when denied).
    pub remaining: u32,
    pub current_count: i64,
    pub window_resets_in: Duration,
    /// Accumulated cost in this window, after this check.
    pub current_cost: f64,
    /// Denial was caused by the cost budget, not the request count.
    pub cost_exceeded: bool,
    /// The store was unreachable and the limiter failed open.
    pub degraded: bool,
}

impl RateDecision {
    fn fail_open(limit: &RateLimit, identifier: &str, resets_in: Duration) -> Self {
        Self {
            allowed: true,
            scope: limit.scope,
            identifier: identifier.to_string(),
            limit: limit.requests,
            remaining: limit.requests,
            current_count: 0,
            window_resets_in: resets_in,
            current_cost: 0.0,
            cost_exceeded: false,
            degraded: true,
        }
    }
}

/// Fixed-window rate limiter for one `(limit, identifier)` pair.
///
/// All mutable state lives in the shared cache under
/// `ratelimit:{scope}:{identifier}:{bucket}`, serialized only by the store's
/// atomic increment, with no in-process locks. On any cache error the limiter
/// fails open: admission control must never amplify a store outage into a
/// hard outage.
pub struct RateLimiter {
    limit: RateLimit,
    identifier: String,
    cache: Arc<SharedCache>,
    clock: WindowClock,
}

impl RateLimiter {
    pub fn new(limit: RateLimit, identifier: impl Into<String>, cache: Arc<SharedCache>) -> Self {
        Self {
            limit,
            identifier: identifier.into(),
            cache,
            clock: wall_clock(),
        }
    }

    /// Override the bucket clock.
    pub fn with_clock(mut self, clock: WindowClock) -> Self {
        self.clock = clock;
        self
    }

    fn window_secs(&self) -> u64 {
        self.limit.window.as_secs().max(1)
    }

    fn bucket(&self, now_secs: u64) -> u64 {
        now_secs / self.window_secs()
    }

    fn count_key(&self, bucket: u64) -> String {
        format!(
            "ratelimit:{}:{}:{}",
            self.limit.scope.as_str(),
            self.identifier,
            bucket
        )
    }

    /// Check admission for one request carrying `cost` units of work.
    ///
    /// The request counter is incremented first (atomic, lossless under
    /// concurrency). If a cost budget is configured and the budget check is
    /// the sole reason for denial, the just-made increment is compensated
    /// with a decrement since the work will not run. Compensation is a
    /// second independent atomic op and can drift under contention; that
    /// drift is accepted (see DESIGN.md).
    pub async fn check(&self, cost: f64) -> RateDecision {
        let now_secs = (self.clock)();
        let window = self.window_secs();
        let resets_in = Duration::from_secs(window - (now_secs % window));
        let bucket = self.bucket(now_secs);
        let count_key = self.count_key(bucket);
        let ttl = self.limit.window + WINDOW_TTL_BUFFER;

        let count = match self.cache.increment(&count_key, 1, ttl).await {
            Some(count) => count,
            None => {
                tracing::warn!(
                    scope = self.limit.scope.as_str(),
                    identifier = %self.identifier,
                    "rate limit store unavailable, failing open"
                );
                return RateDecision::fail_open(&self.limit, &self.identifier, resets_in);
            }
        };

        let count_ok = count <= i64::from(self.limit.requests);

        let mut current_cost = 0.0;
        let mut cost_exceeded = false;
        if let Some(budget) = self.limit.cost_limit {
            if cost > 0.0 {
                let cost_key = format!("{}:cost", count_key);
                current_cost = self.cache.get::<f64>(&cost_key).await.unwrap_or(0.0);
                if current_cost + cost > budget {
                    cost_exceeded = true;
                } else {
                    current_cost += cost;
                    self.cache.set(&cost_key, &current_cost, ttl).await;
                }
            }
        }

        let allowed = count_ok && !cost_exceeded;

        if !allowed && count_ok {
            // Denied solely by cost: the request never runs, so take the
            // increment back rather than inflating the window count.
            self.cache.increment(&count_key, -1, ttl).await;
        }

        let remaining = if allowed {
            self.limit.requests.saturating_sub(count.max(0) as u32)
        } else {
            0
        };

        if !allowed {
            tracing::debug!(
                scope = self.limit.scope.as_str(),
                identifier = %self.identifier,
                count,
                cost_exceeded,
                "rate limit denied"
            );
        }

        RateDecision {
            allowed,
            scope: self.limit.scope,
            identifier: self.identifier.clone(),
            limit: self.limit.requests,
            remaining,
            current_count: count,
            window_resets_in: resets_in,
            current_cost,
            cost_exceeded,
            degraded: false,
        }
    }
}

/// Per-scope limits for the composite check.
#[derive(Debug, Clone)]
pub struct RateLimitSet {
    pub per_user: RateLimit,
    pub global: RateLimit,
    pub per_endpoint: RateLimit,
}

impl Default for RateLimitSet {
    fn default() -> Self {
        Self {
            per_user: RateLimit::per_user(30, Duration::from_secs(60)).with_cost_limit(10.0),
            global: RateLimit::global(600, Duration::from_secs(60)),
            per_endpoint: RateLimit::per_endpoint(120, Duration::from_secs(60)),
        }
    }
}

/// Combined admission decision; `allowed` is the AND of all three scopes and
/// each sub-decision is retained for diagnostics.
#[derive(Debug, Clone)]
pub struct CompositeDecision {
    pub allowed: bool,
    pub user: RateDecision,
    pub global: RateDecision,
    pub endpoint: RateDecision,
}

impl CompositeDecision {
    /// The first scope that denied, if any.
    pub fn denied_scope(&self) -> Option<LimitScope> {
        [&self.user, &self.global, &self.endpoint]
            .into_iter()
            .find(|d| !d.allowed)
            .map(|d| d.scope)
    }
}

/// Runs the per-user, global and per-dependency limiters in sequence.
pub struct CompositeLimiter {
    limits: RateLimitSet,
    cache: Arc<SharedCache>,
    clock: WindowClock,
}

impl CompositeLimiter {
    pub fn new(limits: RateLimitSet, cache: Arc<SharedCache>) -> Self {
        Self {
            limits,
            cache,
            clock: wall_clock(),
        }
    }

    /// Override the bucket clock for all three scopes.
    pub fn with_clock(mut self, clock: WindowClock) -> Self {
        self.clock = clock;
        self
    }

    pub async fn check(&self, identifier: &str, dependency: &str, cost: f64) -> CompositeDecision {
        let user = RateLimiter::new(self.limits.per_user.clone(), identifier, self.cache.clone())
            .with_clock(self.clock.clone())
            .check(cost)
            .await;
        let global = RateLimiter::new(
            self.limits.global.clone(),
            GLOBAL_IDENTIFIER,
            self.cache.clone(),
        )
        .with_clock(self.clock.clone())
        .check(cost)
        .await;
        let endpoint = RateLimiter::new(
            self.limits.per_endpoint.clone(),
            dependency,
            self.cache.clone(),
        )
        .with_clock(self.clock.clone())
        .check(cost)
        .await;

        let allowed = user.allowed && global.allowed && endpoint.allowed;
        CompositeDecision {
            allowed,
            user,
            global,
            endpoint,
        }
    }
}
