//! # classify-guard
//!
//! 弹性决策管道：为不可靠、限流、按量计费的外部分类服务提供熔断、限流、
//! 缓存与本地降级保护。
//!
//! Resilience and decision pipeline protecting calls to an unreliable,
//! rate-limited, cost-metered external classification provider.
//!
//! ## Overview
//!
//! Every classification request flows through one pipeline: rate-limit
//! admission, cache lookup, a circuit-protected provider call with bounded
//! retry, and a deterministic local fallback. The pipeline always returns a
//! structured result: degraded paths lower confidence and explain
//! themselves, they never surface raw errors.
//!
//! ## Core Philosophy
//!
//! - **Fail-soft cache**: store outages degrade to misses, never to errors
//! - **Fail-open admission**: rate limiting must not amplify a store outage
//! - **Fail-fast circuits**: a broken dependency is rejected, not hammered
//! - **Always answer**: the local fallback classifier cannot fail
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use classify_guard::{ClassificationPipeline, PipelineConfig, RequestContext};
//! use classify_guard::pipeline::Classifier;
//! use async_trait::async_trait;
//! use std::sync::Arc;
//!
//! struct MyProvider;
//!
//! #[async_trait]
//! impl Classifier for MyProvider {
//!     async fn complete(&self, prompt: &str) -> classify_guard::Result<String> {
//!         // call your model here
//!         Ok(r#"{"category":"conversation","confidence":0.9}"#.into())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = PipelineConfig::from_env();
//!     let cache = config.connect_cache().await?;
//!     let pipeline = ClassificationPipeline::builder(Arc::new(MyProvider))
//!         .with_cache(cache)
//!         .with_limits(config.limits.clone())
//!         .build()?;
//!
//!     let result = pipeline
//!         .classify("draw me a fox", "user-42", &RequestContext::default())
//!         .await;
//!     println!("{} ({:.2})", result.category.as_str(), result.confidence);
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`cache`] | Fail-soft shared key-value cache with TTL and JSON values |
//! | [`resilience`] | Circuit breakers and fixed-window, cost-aware rate limiting |
//! | [`pipeline`] | Orchestration, retry, response parsing, fallback, audit |
//! | [`config`] | Environment-sourced startup configuration |

pub mod cache;
pub mod config;
pub mod pipeline;
pub mod resilience;

// Re-export main types for convenience
pub use cache::{CacheHealth, CacheStats, SharedCache};
pub use config::PipelineConfig;
pub use pipeline::{
    Category, ClassificationPipeline, ClassificationResult, PipelineBuilder, RequestContext,
};
pub use resilience::{BreakerRegistry, CircuitBreakerConfig, CircuitState, RateLimit, RateLimitSet};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};
