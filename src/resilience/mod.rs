//! 弹性模式模块：提供熔断器和多范围限流器等可靠性保障机制。
//!
//! # Resilience Primitives Module
//!
//! Resilience patterns protecting calls to unreliable, rate-limited
//! dependencies: per-dependency circuit breakers and scope-keyed,
//! cost-aware rate limiting.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`circuit_breaker`] | Three-state breaker (Closed/Open/HalfOpen) with a lazy registry |
//! | [`rate_limiter`] | Fixed-window, cost-aware admission built on atomic store counters |
//!
//! ## Circuit Breaker
//!
//! ```rust
//! use classify_guard::resilience::{BreakerRegistry, CircuitBreakerConfig};
//! use std::time::Duration;
//!
//! let registry = BreakerRegistry::default().with_config(
//!     "classifier",
//!     CircuitBreakerConfig::new()
//!         .with_failure_threshold(5)
//!         .with_timeout(Duration::from_secs(60)),
//! );
//! let breaker = registry.get("classifier");
//! if breaker.try_acquire().is_ok() {
//!     // call the dependency...
//!     breaker.on_success();
//! }
//! ```
//!
//! ## Rate Limiter
//!
//! The limiter keeps no in-process state; counters live in the shared cache
//! keyed by `scope:identifier:window-bucket`, and concurrency correctness
//! rests entirely on the store's atomic increment. On store failure the
//! limiter fails open.

pub mod circuit_breaker;
pub mod rate_limiter;

pub use circuit_breaker::{
    BreakerRegistry, CircuitBreaker, CircuitBreakerConfig, CircuitState, CircuitStats,
};
pub use rate_limiter::{
    CompositeDecision, CompositeLimiter, LimitScope, RateDecision, RateLimit, RateLimitSet,
    RateLimiter, WindowClock,
};
