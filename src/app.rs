//! Application state and service initialization
//!
//! Builds the provider, orchestrator, batch runner and validation engine from
//! one `Config` so the binary and tests share the same wiring.

use std::sync::Arc;

use crate::model::Config;
use crate::service::{
    AssessmentOrchestrator, BatchRunner, LlmProvider, OpenAiProvider, OrchestratorConfig,
    ValidationEngine,
};

const ENV_OPENAI_API_KEY: &str = "OPENAI_API_KEY";

/// Services shared by every command
pub struct AppState {
    pub config: Config,
    pub orchestrator: Arc<AssessmentOrchestrator>,
    pub batch_runner: Arc<BatchRunner>,
    pub validation_engine: ValidationEngine,
}

impl AppState {
    /// Initialize services with the OpenAI provider
    ///
    /// Requires OPENAI_API_KEY.
    pub fn new(config: Config) -> Result<Self, AppError> {
        let api_key = std::env::var(ENV_OPENAI_API_KEY).ok();
        Self::with_api_key(config, api_key.as_deref())
    }

    fn with_api_key(config: Config, api_key: Option<&str>) -> Result<Self, AppError> {
        let api_key = api_key
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .ok_or(AppError::MissingConfig(ENV_OPENAI_API_KEY))?;

        let orchestrator_config = OrchestratorConfig::from(&config);
        let provider = OpenAiProvider::new(api_key, orchestrator_config.completion_settings())
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to initialize OpenAI provider");
                AppError::InvalidConfig("Invalid OPENAI_API_KEY")
            })?;

        Ok(Self::with_provider(config, Arc::new(provider)))
    }

    /// Build the service graph around any provider
    pub fn with_provider(config: Config, provider: Arc<dyn LlmProvider>) -> Self {
        let orchestrator = Arc::new(AssessmentOrchestrator::new(
            provider,
            OrchestratorConfig::from(&config),
        ));
        let batch_runner = Arc::new(BatchRunner::new(
            Arc::clone(&orchestrator),
            config.max_concurrent,
        ));
        let validation_engine = ValidationEngine::new(Arc::clone(&batch_runner));

        Self {
            config,
            orchestrator,
            batch_runner,
            validation_engine,
        }
    }
}

/// Application-level errors
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum AppError {
    /// Missing required configuration
    #[error("Missing required configuration: {0}")]
    MissingConfig(&'static str),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    InvalidConfig(&'static str),
}
