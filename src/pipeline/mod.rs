//! 分类管道模块：编排限流、缓存、熔断与本地降级的决策流水线。
//!
//! # Classification Pipeline Module
//!
//! Orchestrates the resilience primitives around a call to an external
//! classifier: admission → cache lookup → circuit-protected provider call
//! with retry → local fallback → audit. The pipeline always returns a
//! structured result; degraded paths lower confidence and explain themselves
//! in the reasoning string instead of surfacing errors.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`ClassificationPipeline`] | The orchestrator; one instance per process |
//! | [`Classifier`] | Trait for the opaque external provider |
//! | [`retry`] | Bounded retry with backoff and jitter inside the breaker |
//! | [`parse`] | Balanced-JSON extraction from noisy provider output |
//! | [`fallback`] | Deterministic keyword classifier that never fails |
//! | [`audit`] | Fire-and-forget audit trail over a bounded channel |

pub mod audit;
pub mod fallback;
pub mod parse;
pub mod retry;

use crate::cache::{classification_key, input_digest, CacheHealth, SharedCache};
use crate::resilience::{BreakerRegistry, CircuitStats, CompositeLimiter, RateLimitSet, WindowClock};
use crate::{Error, ErrorContext, Result};
use async_trait::async_trait;
use audit::{AuditLog, AuditRecord, AuditSink, TracingAuditSink};
use retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Decision categories the pipeline routes between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    ImageGeneration,
    ImageEdit,
    ProductLookup,
    Conversation,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::ImageGeneration => "image_generation",
            Category::ImageEdit => "image_edit",
            Category::ProductLookup => "product_lookup",
            Category::Conversation => "conversation",
        }
    }
}

/// Request context the classifier and fallback may consult.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// An image is currently open for editing in the caller's session.
    pub active_image: bool,
    /// Free-form context attributes forwarded into the prompt.
    pub attributes: BTreeMap<String, String>,
}

impl RequestContext {
    pub fn has_flags(&self) -> bool {
        self.active_image || !self.attributes.is_empty()
    }
}

/// The pipeline's answer. Immutable once returned; cached copies come back
/// verbatim with `cache_hit` set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub category: Category,
    /// In `[0, 1]`; degraded paths report reduced confidence.
    pub confidence: f64,
    /// Human-readable explanation, naming the degraded path when taken.
    pub reasoning: String,
    pub used_fallback: bool,
    pub cache_hit: bool,
}

/// The external classification provider: an opaque, untrusted async callable
/// from prompt text to raw response text. Any error or malformed payload is a
/// failure signal to the circuit breaker.
///
/// Inherently synchronous providers must offload themselves (e.g. via
/// `tokio::task::spawn_blocking`) so they do not stall the scheduler.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Estimated units of work for admission cost accounting, roughly
/// proportional to prompt size.
pub fn estimate_cost(input: &str) -> f64 {
    (input.len() as f64 / 400.0).clamp(0.1, 5.0)
}

fn build_prompt(input: &str, context: &RequestContext) -> String {
    let mut prompt = String::from(
        "Classify the user request into one of: image_generation, image_edit, \
         product_lookup, conversation. Reply with a JSON object \
         {\"category\", \"confidence\", \"reasoning\"}.\n",
    );
    if context.active_image {
        prompt.push_str("Context: an active image is being edited.\n");
    }
    for (key, value) in &context.attributes {
        prompt.push_str(&format!("Context: {} = {}\n", key, value));
    }
    prompt.push_str("Request: ");
    prompt.push_str(input);
    prompt
}

/// Builder for [`ClassificationPipeline`].
pub struct PipelineBuilder {
    provider: Arc<dyn Classifier>,
    cache: Option<Arc<SharedCache>>,
    breakers: Option<Arc<BreakerRegistry>>,
    limits: RateLimitSet,
    retry: RetryPolicy,
    audit_sink: Option<Arc<dyn AuditSink>>,
    audit_capacity: usize,
    dependency: String,
    result_ttl: Duration,
    window_clock: Option<WindowClock>,
}

impl PipelineBuilder {
    pub fn new(provider: Arc<dyn Classifier>) -> Self {
        Self {
            provider,
            cache: None,
            breakers: None,
            limits: RateLimitSet::default(),
            retry: RetryPolicy::default(),
            audit_sink: None,
            audit_capacity: 1024,
            dependency: "classifier".into(),
            result_ttl: Duration::from_secs(3600),
            window_clock: None,
        }
    }

    pub fn with_cache(mut self, cache: Arc<SharedCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_breakers(mut self, breakers: Arc<BreakerRegistry>) -> Self {
        self.breakers = Some(breakers);
        self
    }

    pub fn with_limits(mut self, limits: RateLimitSet) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit_sink = Some(sink);
        self
    }

    pub fn with_audit_capacity(mut self, capacity: usize) -> Self {
        self.audit_capacity = capacity;
        self
    }

    /// Name of the protected dependency; keys the breaker and the
    /// per-endpoint rate limit.
    pub fn with_dependency_name(mut self, name: impl Into<String>) -> Self {
        self.dependency = name.into();
        self
    }

    pub fn with_result_ttl(mut self, ttl: Duration) -> Self {
        self.result_ttl = ttl;
        self
    }

    /// Override the admission window clock (wall clock when unset).
    pub fn with_window_clock(mut self, clock: WindowClock) -> Self {
        self.window_clock = Some(clock);
        self
    }

    pub fn build(self) -> Result<ClassificationPipeline> {
        let cache = self.cache.ok_or_else(|| {
            Error::configuration_with_context(
                "pipeline requires a shared cache",
                ErrorContext::new().with_source("pipeline_builder"),
            )
        })?;
        let breakers = self
            .breakers
            .unwrap_or_else(|| Arc::new(BreakerRegistry::default()));
        let sink = self
            .audit_sink
            .unwrap_or_else(|| Arc::new(TracingAuditSink));
        let mut limiter = CompositeLimiter::new(self.limits, cache.clone());
        if let Some(clock) = self.window_clock {
            limiter = limiter.with_clock(clock);
        }
        Ok(ClassificationPipeline {
            provider: self.provider,
            limiter,
            cache,
            breakers,
            retry: self.retry,
            audit: AuditLog::spawn(sink, self.audit_capacity),
            dependency: self.dependency,
            result_ttl: self.result_ttl,
        })
    }
}

/// The resilience and decision pipeline.
///
/// Per request: composite rate-limit admission, cache lookup, circuit-
/// protected provider call with bounded retry, deterministic local fallback,
/// and one audit row regardless of the path taken. `classify` never returns
/// an error; every failure mode resolves to a fallback result.
pub struct ClassificationPipeline {
    provider: Arc<dyn Classifier>,
    cache: Arc<SharedCache>,
    breakers: Arc<BreakerRegistry>,
    limiter: CompositeLimiter,
    retry: RetryPolicy,
    audit: AuditLog,
    dependency: String,
    result_ttl: Duration,
}

impl ClassificationPipeline {
    pub fn builder(provider: Arc<dyn Classifier>) -> PipelineBuilder {
        PipelineBuilder::new(provider)
    }

    /// Classify one request. Always returns a result; see the degraded-path
    /// flags on [`ClassificationResult`].
    pub async fn classify(
        &self,
        input: &str,
        identifier: &str,
        context: &RequestContext,
    ) -> ClassificationResult {
        let started = Instant::now();
        let digest = input_digest(input);
        let breaker = self.breakers.get(&self.dependency);

        if input.trim().is_empty() {
            let result = fallback::classify(input, context, "invalid input");
            self.emit(identifier, &digest, &result, started, false);
            return result;
        }

        // 1. Admission.
        let cost = estimate_cost(input);
        let admission = self.limiter.check(identifier, &self.dependency, cost).await;
        if !admission.allowed {
            let scope = admission
                .denied_scope()
                .map(|s| s.as_str())
                .unwrap_or("unknown");
            tracing::info!(identifier, scope, "classification rate limited");
            let result = fallback::classify(input, context, &format!("rate limited: {} scope", scope));
            self.emit(identifier, &digest, &result, started, true);
            return result;
        }

        // 2. Cache lookup. A miss or cache error falls through.
        let key = classification_key(input, identifier, context.has_flags());
        if let Some(mut cached) = self.cache.get::<ClassificationResult>(&key).await {
            cached.cache_hit = true;
            self.emit(identifier, &digest, &cached, started, false);
            return cached;
        }

        // 3. Protected call: breaker admission, then bounded retry around the
        // provider. The breaker counts one failure per exhausted sequence.
        let verdict = match breaker.try_acquire() {
            Ok(()) => {
                let prompt = build_prompt(input, context);
                let provider = self.provider.clone();
                let attempt = self
                    .retry
                    .run(|| {
                        let provider = provider.clone();
                        let prompt = prompt.clone();
                        async move {
                            let raw = provider.complete(&prompt).await?;
                            parse::parse_verdict(&raw)
                        }
                    })
                    .await;
                match attempt {
                    Ok(verdict) => {
                        breaker.on_success();
                        Ok(verdict)
                    }
                    Err(e) => {
                        breaker.on_failure();
                        Err(e)
                    }
                }
            }
            Err(e) => Err(e),
        };

        let result = match verdict {
            Ok(verdict) => {
                let result = ClassificationResult {
                    category: verdict.category,
                    confidence: verdict.confidence,
                    reasoning: if verdict.reasoning.is_empty() {
                        "provider classification".into()
                    } else {
                        verdict.reasoning
                    },
                    used_fallback: false,
                    cache_hit: false,
                };
                self.cache.set(&key, &result, self.result_ttl).await;
                result
            }
            // 4. Any protected-call failure routes to the local classifier.
            Err(e) => {
                let cause = match &e {
                    Error::CircuitOpen { retry_after, .. } => {
                        format!("circuit open, retry in {}s", retry_after.as_secs())
                    }
                    other => other.to_string(),
                };
                tracing::warn!(identifier, error = %e, "provider path failed, using fallback");
                fallback::classify(input, context, &cause)
            }
        };

        // 5. Audit, regardless of path.
        self.emit(identifier, &digest, &result, started, false);
        result
    }

    fn emit(
        &self,
        identifier: &str,
        digest: &str,
        result: &ClassificationResult,
        started: Instant,
        rate_limited: bool,
    ) {
        let breaker = self.breakers.get(&self.dependency);
        self.audit.record(AuditRecord {
            id: uuid::Uuid::new_v4().to_string(),
            identifier: identifier.to_string(),
            input_digest: digest.to_string(),
            category: result.category,
            confidence: result.confidence,
            latency_ms: started.elapsed().as_millis() as u64,
            used_fallback: result.used_fallback,
            cache_hit: result.cache_hit,
            circuit_state: breaker.current_state().as_str().to_string(),
            rate_limited,
            timestamp: AuditRecord::now_timestamp(),
        });
    }

    /// Breaker stats for readiness probes.
    pub fn breaker_stats(&self) -> Vec<CircuitStats> {
        self.breakers.all_stats()
    }

    /// Cache health for liveness probes; also re-arms a degraded cache.
    pub async fn cache_health(&self) -> CacheHealth {
        self.cache.health().await
    }

    /// Audit rows dropped under backpressure.
    pub fn audit_dropped(&self) -> u64 {
        self.audit.dropped()
    }
}
