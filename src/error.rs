use std::time::Duration;
use thiserror::Error;

/// Structured error context for better error handling and debugging.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ErrorContext {
    /// Additional context about the error (e.g., key name, attempt number)
    pub details: Option<String>,
    /// Source of the error (e.g., "cache", "circuit_breaker", "provider")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self {
            details: None,
            source: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// Unified error type for the classification pipeline.
///
/// Tagged variants replace exception-style control flow: admission denial and
/// circuit rejection are ordinary values a caller can match on, never panics.
#[derive(Debug, Error)]
pub enum Error {
    /// The shared key-value store is unreachable. Absorbed inside the cache
    /// layer; callers of [`crate::cache::SharedCache`] never observe it.
    #[error("cache unavailable: {message}")]
    CacheUnavailable { message: String },

    /// The circuit breaker for a dependency is open; the call was not made.
    #[error("circuit '{name}' open, retry after {retry_after:?}")]
    CircuitOpen { name: String, retry_after: Duration },

    /// Admission denied by a rate limiter.
    #[error("rate limit exceeded for scope '{scope}': {message}")]
    RateLimited { scope: String, message: String },

    /// Transient provider failure (network, 5xx, overload). Retryable.
    #[error("provider error: {message}")]
    Provider { message: String, retryable: bool },

    /// The provider answered, but the payload could not be decoded.
    /// Never retried; retrying cannot fix a parse failure.
    #[error("malformed provider response: {message}")]
    MalformedResponse { message: String },

    /// A protected call exceeded its per-attempt timeout.
    #[error("call timed out after {elapsed:?}")]
    Timeout { elapsed: Duration },

    /// Input rejected before any downstream work.
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    #[error("configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// Helper function to format error context for display
fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    /// Create a transient, retryable provider error.
    pub fn provider_transient(msg: impl Into<String>) -> Self {
        Error::Provider {
            message: msg.into(),
            retryable: true,
        }
    }

    /// Create a permanent provider error (bad request, auth failure).
    pub fn provider_permanent(msg: impl Into<String>) -> Self {
        Error::Provider {
            message: msg.into(),
            retryable: false,
        }
    }

    /// Create a configuration error with structured context
    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    /// Whether a retry attempt could plausibly succeed.
    ///
    /// Malformed responses and open circuits are deliberately not retryable:
    /// the former cannot be fixed by repetition, the latter must wait out the
    /// cooldown.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Provider { retryable, .. } => *retryable,
            Error::Timeout { .. } => true,
            _ => false,
        }
    }
}
