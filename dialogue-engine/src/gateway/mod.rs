//! LLM gateway - provider abstraction for participant workers
//!
//! A gateway turns a prompt into generated text. Workers hold a
//! `dyn LlmGateway` so tests can substitute scripted responders for a live
//! provider. Retry with exponential backoff lives here, not in the worker:
//! transient provider errors are a gateway concern.

pub mod ollama;

use std::time::Duration;

use async_trait::async_trait;

pub use ollama::OllamaGateway;

/// Errors from a generation attempt.
#[derive(Debug, thiserror::Error, Clone)]
pub enum GatewayError {
    /// Provider unreachable or returned a server-side error. Retryable.
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Provider throttled the request. Retryable.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Provider answered but the payload was unusable. Not retryable here;
    /// the orchestrator owns the corrective re-prompt.
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
}

impl GatewayError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ProviderUnavailable(_) | Self::RateLimited(_))
    }
}

/// Everything a gateway needs to produce one reply.
#[derive(Debug, Clone)]
pub struct PromptContext {
    pub model: String,
    pub temperature: f32,
    /// Persona/system guidance, when the role carries any.
    pub system: Option<String>,
    pub prompt: String,
}

/// One successful generation.
#[derive(Debug, Clone)]
pub struct GenerateOutput {
    pub text: String,
    pub tokens_generated: Option<u32>,
}

/// Provider abstraction. Implementations must be safe to share across tasks.
#[async_trait]
pub trait LlmGateway: Send + Sync {
    async fn generate(&self, context: &PromptContext) -> Result<GenerateOutput, GatewayError>;
}

/// Bounded retry with exponential backoff for transient provider errors.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    fn backoff_for(&self, attempt: u32) -> Duration {
        self.base_backoff * 2u32.saturating_pow(attempt)
    }
}

/// Run `generate`, retrying retryable errors per `policy`. The last error is
/// returned once attempts are exhausted; non-retryable errors short-circuit.
pub async fn generate_with_retry(
    gateway: &dyn LlmGateway,
    context: &PromptContext,
    policy: RetryPolicy,
) -> Result<GenerateOutput, GatewayError> {
    let mut attempt = 0;
    loop {
        match gateway.generate(context).await {
            Ok(output) => return Ok(output),
            Err(e) if e.is_retryable() && attempt + 1 < policy.max_attempts => {
                let backoff = policy.backoff_for(attempt);
                tracing::warn!(
                    model = %context.model,
                    attempt = attempt + 1,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "generation failed, retrying"
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyGateway {
        failures_before_success: u32,
        calls: AtomicU32,
        error: GatewayError,
    }

    #[async_trait]
    impl LlmGateway for FlakyGateway {
        async fn generate(
            &self,
            _context: &PromptContext,
        ) -> Result<GenerateOutput, GatewayError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures_before_success {
                Err(self.error.clone())
            } else {
                Ok(GenerateOutput {
                    text: "recovered".to_string(),
                    tokens_generated: Some(4),
                })
            }
        }
    }

    fn context() -> PromptContext {
        PromptContext {
            model: "llama2".to_string(),
            temperature: 0.7,
            system: None,
            prompt: "say something".to_string(),
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_backoff: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_failure() {
        let gateway = FlakyGateway {
            failures_before_success: 2,
            calls: AtomicU32::new(0),
            error: GatewayError::ProviderUnavailable("connection refused".to_string()),
        };

        let output = generate_with_retry(&gateway, &context(), fast_policy())
            .await
            .unwrap();
        assert_eq!(output.text, "recovered");
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_exhaustion_returns_last_error() {
        let gateway = FlakyGateway {
            failures_before_success: 10,
            calls: AtomicU32::new(0),
            error: GatewayError::RateLimited("slow down".to_string()),
        };

        let err = generate_with_retry(&gateway, &context(), fast_policy())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::RateLimited(_)));
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_invalid_response_is_not_retried() {
        let gateway = FlakyGateway {
            failures_before_success: 10,
            calls: AtomicU32::new(0),
            error: GatewayError::InvalidResponse("empty body".to_string()),
        };

        let err = generate_with_retry(&gateway, &context(), fast_policy())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidResponse(_)));
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 1);
    }
}
