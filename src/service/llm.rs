//! LLM provider seam and its OpenAI implementation
//!
//! The orchestrator only sees `LlmProvider::query`; provider failures are
//! classified as transient (retryable) or fatal here, once.

use std::fmt;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use rig::client::CompletionClient;
use rig::completion::Prompt;
use rig::providers::openai;

/// Why a transient provider failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransientCause {
    Timeout,
    RateLimited,
    Transport,
    ServerError,
}

impl fmt::Display for TransientCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TransientCause::Timeout => "timeout",
            TransientCause::RateLimited => "rate limited",
            TransientCause::Transport => "transport error",
            TransientCause::ServerError => "server error",
        };
        f.write_str(label)
    }
}

/// Error returned by an LLM provider call
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum ProviderError {
    /// Worth retrying: timeout, rate limit, transport or 5xx
    #[error("transient provider error ({cause}): {message}")]
    Transient {
        cause: TransientCause,
        message: String,
    },

    /// Not retryable: authentication failure, invalid request
    #[error("fatal provider error: {message}")]
    Fatal { message: String },
}

impl ProviderError {
    pub fn transient(cause: TransientCause, message: impl Into<String>) -> Self {
        ProviderError::Transient {
            cause,
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        ProviderError::Fatal {
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::Transient { .. })
    }

    pub fn is_rate_limit(&self) -> bool {
        matches!(
            self,
            ProviderError::Transient {
                cause: TransientCause::RateLimited,
                ..
            }
        )
    }

    /// Classify a provider error message
    ///
    /// Rate limits, timeouts and server-side failures are transient; auth and
    /// request-shape failures are fatal; anything else is assumed to be a
    /// transport problem. Status codes only count as whole words.
    pub fn classify(message: &str) -> Self {
        if RATE_LIMITED.is_match(message) {
            return Self::transient(TransientCause::RateLimited, message);
        }
        if TIMED_OUT.is_match(message) {
            return Self::transient(TransientCause::Timeout, message);
        }
        if SERVER_ERROR.is_match(message) {
            return Self::transient(TransientCause::ServerError, message);
        }
        if FATAL.is_match(message) {
            return Self::fatal(message);
        }
        Self::transient(TransientCause::Transport, message)
    }
}

static RATE_LIMITED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b429\b|rate[ _]limit|too many requests").expect("valid rate limit regex")
});

static TIMED_OUT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)timed out|timeout").expect("valid timeout regex")
});

static SERVER_ERROR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b5\d\d\b|server error|bad gateway|service unavailable|overloaded")
        .expect("valid server error regex")
});

static FATAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(400|401|403|404)\b|unauthorized|forbidden|invalid[ _]api[ _]key|incorrect api key|authentication|invalid[ _]request|model_not_found|does not exist",
    )
    .expect("valid fatal error regex")
});

/// Opaque `query(prompt) -> text` collaborator
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn query(&self, prompt: &str) -> Result<String, ProviderError>;

    /// Model identifier used for logging
    fn model(&self) -> &str;
}

/// Sampling parameters passed to the OpenAI provider
#[derive(Debug, Clone)]
pub struct CompletionSettings {
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u64,
    pub preamble: String,
}

/// OpenAI chat completion provider backed by rig
#[derive(Clone)]
pub struct OpenAiProvider {
    client: openai::Client,
    settings: CompletionSettings,
}

impl OpenAiProvider {
    /// Create a new provider with the provided API key
    pub fn new(api_key: &str, settings: CompletionSettings) -> Result<Self, String> {
        let client = openai::Client::new(api_key)
            .map_err(|e| format!("Failed to create OpenAI client: {}", e))?;

        tracing::info!(model = %settings.model, "OpenAI provider initialized");

        Ok(Self { client, settings })
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn query(&self, prompt: &str) -> Result<String, ProviderError> {
        let agent = self
            .client
            .agent(&self.settings.model)
            .preamble(&self.settings.preamble)
            .temperature(self.settings.temperature)
            .max_tokens(self.settings.max_tokens)
            .build();

        let response = agent
            .prompt(prompt)
            .await
            .map_err(|e| ProviderError::classify(&e.to_string()))?;

        if response.trim().is_empty() {
            return Err(ProviderError::transient(
                TransientCause::ServerError,
                "empty response from provider",
            ));
        }

        Ok(response)
    }

    fn model(&self) -> &str {
        &self.settings.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_rate_limit() {
        let err = ProviderError::classify("ProviderError: 429 Too Many Requests: rate limit reached");
        assert!(err.is_retryable());
        assert!(err.is_rate_limit());
    }

    #[test]
    fn test_classify_auth_is_fatal() {
        let err = ProviderError::classify("HTTP 401 Unauthorized: Incorrect API key provided");
        assert!(!err.is_retryable());
        let err = ProviderError::classify("invalid_request_error: unknown parameter");
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_classify_server_and_transport() {
        assert_eq!(
            ProviderError::classify("503 Service Unavailable"),
            ProviderError::transient(TransientCause::ServerError, "503 Service Unavailable")
        );
        assert_eq!(
            ProviderError::classify("error sending request: connection reset"),
            ProviderError::transient(
                TransientCause::Transport,
                "error sending request: connection reset"
            )
        );
        assert!(matches!(
            ProviderError::classify("operation timed out"),
            ProviderError::Transient {
                cause: TransientCause::Timeout,
                ..
            }
        ));
    }

    #[test]
    fn test_classify_ignores_digits_inside_identifiers() {
        let message = "HTTP status server error (500 Internal Server Error) for request_id req_4003ab";
        assert_eq!(
            ProviderError::classify(message),
            ProviderError::transient(TransientCause::ServerError, message)
        );

        let message = "error sending request: connection reset after 14012 bytes";
        assert_eq!(
            ProviderError::classify(message),
            ProviderError::transient(TransientCause::Transport, message)
        );

        let message = "502 Bad Gateway: upstream answered 401 to health check";
        assert!(ProviderError::classify(message).is_retryable());

        assert!(!ProviderError::classify("status 403: Forbidden").is_retryable());
    }
}
