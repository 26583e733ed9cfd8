use crate::{Error, Result};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Breaker states. Initial state is `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls pass through; failures are counted.
    Closed,
    /// Calls are rejected without invoking the dependency.
    Open,
    /// Probationary: a bounded number of trial calls test recovery.
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive-ish failures in Closed before opening.
    pub failure_threshold: u32,
    /// How long Open rejects calls before probing.
    pub timeout: Duration,
    /// Successes required in HalfOpen to close again.
    pub success_threshold: u32,
    /// Per-call deadline applied by [`CircuitBreaker::call`].
    pub call_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::from_secs(60),
            success_threshold: 2,
            call_timeout: Duration::from_secs(30),
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the failure threshold
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    /// Set the open-state timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the half-open success threshold
    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold.max(1);
        self
    }

    /// Set the per-call deadline
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }
}

#[derive(Debug)]
struct State {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    half_open_inflight: u32,
    last_failure: Option<Instant>,
    last_transition: Instant,
    total_calls: u64,
    successful_calls: u64,
    failed_calls: u64,
    blocked_calls: u64,
}

/// Point-in-time view of a breaker, for health endpoints and logs.
#[derive(Debug, Clone)]
pub struct CircuitStats {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub blocked_calls: u64,
    /// Successful / (successful + failed); 1.0 when nothing has run yet.
    pub success_rate: f64,
    pub since_last_transition: Duration,
    /// Remaining cooldown if currently open.
    pub open_remaining: Option<Duration>,
}

/// Per-dependency circuit breaker.
///
/// State transitions:
/// - Closed → Open after `failure_threshold` failures. Successes decay the
///   failure count by one instead of resetting it, so isolated failures do
///   not accumulate forever but a burst still trips the breaker.
/// - Open → HalfOpen on the first call attempt after `timeout` elapses.
/// - HalfOpen → Closed after `success_threshold` successes; any single
///   failure reopens immediately.
pub struct CircuitBreaker {
    name: String,
    cfg: CircuitBreakerConfig,
    state: Mutex<State>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, cfg: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            cfg,
            state: Mutex::new(State {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                half_open_inflight: 0,
                last_failure: None,
                last_transition: Instant::now(),
                total_calls: 0,
                successful_calls: 0,
                failed_calls: 0,
                blocked_calls: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn transition(st: &mut State, name: &str, to: CircuitState) {
        if st.state != to {
            tracing::info!(breaker = name, from = st.state.as_str(), to = to.as_str(), "circuit transition");
            st.state = to;
            st.last_transition = Instant::now();
            st.success_count = 0;
            if to == CircuitState::Closed {
                st.failure_count = 0;
            }
            if to != CircuitState::HalfOpen {
                st.half_open_inflight = 0;
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // A panic while holding this short, await-free critical section is a
        // bug; recover the guard rather than wedging the breaker.
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Admission check. Transitions Open → HalfOpen once the cooldown has
    /// elapsed, before the caller executes anything.
    pub fn try_acquire(&self) -> Result<()> {
        let mut st = self.lock();
        st.total_calls += 1;
        match st.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let elapsed = st
                    .last_failure
                    .map(|at| at.elapsed())
                    .unwrap_or(self.cfg.timeout);
                if elapsed >= self.cfg.timeout {
                    Self::transition(&mut st, &self.name, CircuitState::HalfOpen);
                    st.half_open_inflight = 1;
                    Ok(())
                } else {
                    st.blocked_calls += 1;
                    Err(Error::CircuitOpen {
                        name: self.name.clone(),
                        retry_after: self.cfg.timeout - elapsed,
                    })
                }
            }
            CircuitState::HalfOpen => {
                // Bound concurrent probes to the number of successes still
                // needed; everything else is rejected like Open.
                let budget = self.cfg.success_threshold.saturating_sub(st.success_count);
                if st.half_open_inflight < budget {
                    st.half_open_inflight += 1;
                    Ok(())
                } else {
                    st.blocked_calls += 1;
                    Err(Error::CircuitOpen {
                        name: self.name.clone(),
                        retry_after: Duration::from_secs(1),
                    })
                }
            }
        }
    }

    pub fn on_success(&self) {
        let mut st = self.lock();
        st.successful_calls += 1;
        match st.state {
            CircuitState::Closed => {
                // Decay instead of reset: one success forgives one failure.
                st.failure_count = st.failure_count.saturating_sub(1);
            }
            CircuitState::HalfOpen => {
                st.half_open_inflight = st.half_open_inflight.saturating_sub(1);
                st.success_count += 1;
                if st.success_count >= self.cfg.success_threshold {
                    Self::transition(&mut st, &self.name, CircuitState::Closed);
                    st.failure_count = 0;
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn on_failure(&self) {
        let mut st = self.lock();
        st.failed_calls += 1;
        st.last_failure = Some(Instant::now());
        match st.state {
            CircuitState::Closed => {
                st.failure_count = st.failure_count.saturating_add(1);
                if st.failure_count >= self.cfg.failure_threshold {
                    Self::transition(&mut st, &self.name, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                // No partial credit: one failed probe reopens.
                Self::transition(&mut st, &self.name, CircuitState::Open);
            }
            CircuitState::Open => {}
        }
    }

    /// Run an async operation under this breaker with the configured
    /// per-call deadline. Timeouts count as failures.
    pub async fn call<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.try_acquire()?;
        match tokio::time::timeout(self.cfg.call_timeout, f()).await {
            Ok(Ok(value)) => {
                self.on_success();
                Ok(value)
            }
            Ok(Err(e)) => {
                self.on_failure();
                Err(e)
            }
            Err(_) => {
                self.on_failure();
                Err(Error::Timeout {
                    elapsed: self.cfg.call_timeout,
                })
            }
        }
    }

    /// Maintenance override: reject everything until `force_close` or the
    /// normal cooldown path recovers.
    pub fn force_open(&self) {
        let mut st = self.lock();
        st.last_failure = Some(Instant::now());
        Self::transition(&mut st, &self.name, CircuitState::Open);
    }

    /// Maintenance override: resume normal operation immediately.
    pub fn force_close(&self) {
        let mut st = self.lock();
        Self::transition(&mut st, &self.name, CircuitState::Closed);
        st.failure_count = 0;
        st.last_failure = None;
    }

    pub fn current_state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn get_stats(&self) -> CircuitStats {
        let st = self.lock();
        let decided = st.successful_calls + st.failed_calls;
        let success_rate = if decided == 0 {
            1.0
        } else {
            st.successful_calls as f64 / decided as f64
        };
        let open_remaining = if st.state == CircuitState::Open {
            st.last_failure.map(|at| {
                self.cfg.timeout.saturating_sub(at.elapsed())
            })
        } else {
            None
        };
        CircuitStats {
            name: self.name.clone(),
            state: st.state,
            failure_count: st.failure_count,
            success_count: st.success_count,
            total_calls: st.total_calls,
            successful_calls: st.successful_calls,
            failed_calls: st.failed_calls,
            blocked_calls: st.blocked_calls,
            success_rate,
            since_last_transition: st.last_transition.elapsed(),
            open_remaining,
        }
    }
}

/// Name-keyed breaker registry, created once at startup and passed by
/// reference. Breakers are created lazily on first reference and live for
/// the process lifetime.
pub struct BreakerRegistry {
    default_config: CircuitBreakerConfig,
    overrides: HashMap<String, CircuitBreakerConfig>,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    pub fn new(default_config: CircuitBreakerConfig) -> Self {
        Self {
            default_config,
            overrides: HashMap::new(),
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// Register a per-dependency config, replacing the default for `name`.
    pub fn with_config(mut self, name: impl Into<String>, cfg: CircuitBreakerConfig) -> Self {
        self.overrides.insert(name.into(), cfg);
        self
    }

    /// Fetch the breaker for a dependency, creating it on first reference.
    pub fn get(&self, name: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().unwrap_or_else(|p| p.into_inner());
        breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                let cfg = self
                    .overrides
                    .get(name)
                    .cloned()
                    .unwrap_or_else(|| self.default_config.clone());
                Arc::new(CircuitBreaker::new(name, cfg))
            })
            .clone()
    }

    /// Stats for every breaker created so far.
    pub fn all_stats(&self) -> Vec<CircuitStats> {
        let breakers = self.breakers.lock().unwrap_or_else(|p| p.into_inner());
        breakers.values().map(|b| b.get_stats()).collect()
    }
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
