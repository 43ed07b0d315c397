//! Variant actionability assessment using an LLM
//!
//! Builds the prompt, drives provider calls through the retry state machine,
//! parses the answer and re-prompts once when it is malformed.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::model::{AssessmentRecord, Config, VariantRequest};
use crate::service::assessment::parser::parse_response;
use crate::service::assessment::prompts::{
    ASSESSMENT_SYSTEM_PROMPT, build_assessment_prompt, build_reformat_prompt,
};
use crate::service::assessment::retry::{BackoffCounter, RetryMachine, RetryPolicy, Step};
use crate::service::llm::{CompletionSettings, LlmProvider, ProviderError, TransientCause};
use crate::service::lookup::{VariantLookup, VariantMetadata};

pub mod error;
pub mod parser;
pub mod prompts;
pub mod retry;

pub use error::{AssessmentError, FieldError, FieldProblem, ParseError};

/// Settings the orchestrator is constructed with
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u64,
    pub retry: RetryPolicy,
    /// Upper bound on a single provider call
    pub request_timeout: Duration,
}

impl OrchestratorConfig {
    /// Sampling parameters for a provider serving this orchestrator
    pub fn completion_settings(&self) -> CompletionSettings {
        CompletionSettings {
            model: self.model.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            preamble: ASSESSMENT_SYSTEM_PROMPT.to_string(),
        }
    }
}

impl From<&Config> for OrchestratorConfig {
    fn from(config: &Config) -> Self {
        Self {
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            retry: RetryPolicy::from(&config.retry),
            request_timeout: config.request_timeout,
        }
    }
}

/// Turns variant requests into validated assessment records
pub struct AssessmentOrchestrator {
    provider: Arc<dyn LlmProvider>,
    lookup: Option<Arc<dyn VariantLookup>>,
    config: OrchestratorConfig,
    backoff: BackoffCounter,
}

impl AssessmentOrchestrator {
    pub fn new(provider: Arc<dyn LlmProvider>, config: OrchestratorConfig) -> Self {
        tracing::info!(
            model = %config.model,
            max_attempts = config.retry.max_attempts,
            timeout_secs = config.request_timeout.as_secs(),
            "Assessment orchestrator initialized"
        );

        Self {
            provider,
            lookup: None,
            config,
            backoff: BackoffCounter::new(),
        }
    }

    /// Quote variant database metadata in prompts
    pub fn with_lookup(mut self, lookup: Arc<dyn VariantLookup>) -> Self {
        self.lookup = Some(lookup);
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Rate-limit pressure shared by all requests of this orchestrator
    pub fn backoff(&self) -> &BackoffCounter {
        &self.backoff
    }

    /// Assess a single variant
    ///
    /// Returns exactly one record, or an error naming the request.
    pub async fn assess(
        &self,
        request: &VariantRequest,
    ) -> Result<AssessmentRecord, AssessmentError> {
        let start_time = Instant::now();
        let evidence = self.fetch_evidence(request).await;
        let prompt = build_assessment_prompt(request, evidence.as_ref());

        tracing::debug!(
            gene = %request.gene,
            variant = %request.variant,
            tumor_type = %request.tumor_type,
            model = %self.provider.model(),
            has_evidence = evidence.is_some(),
            "Starting variant assessment"
        );

        let response = self.query_with_retry(request, &prompt).await?;

        let parse_error = match parse_response(&response, request) {
            Ok(record) => {
                self.log_assessed(&record, start_time, false);
                return Ok(record);
            }
            Err(e) => e,
        };

        tracing::warn!(
            gene = %request.gene,
            variant = %request.variant,
            fields = ?parse_error.fields(),
            "Model output malformed, asking for a reformatted answer"
        );

        let reformat_prompt = build_reformat_prompt(&prompt, &response, &parse_error);
        let response = self.query_with_retry(request, &reformat_prompt).await?;

        match parse_response(&response, request) {
            Ok(record) => {
                self.log_assessed(&record, start_time, true);
                Ok(record)
            }
            Err(e) => {
                tracing::error!(
                    gene = %request.gene,
                    variant = %request.variant,
                    tumor_type = %request.tumor_type,
                    elapsed_ms = start_time.elapsed().as_millis(),
                    error = %e,
                    "Model output still malformed after reformat prompt"
                );
                Err(AssessmentError::Parse {
                    request: request.clone(),
                    source: e,
                })
            }
        }
    }

    /// Lookup failures only cost the prompt its evidence section
    async fn fetch_evidence(&self, request: &VariantRequest) -> Option<VariantMetadata> {
        let lookup = self.lookup.as_ref()?;
        match lookup.lookup(&request.gene, &request.variant).await {
            Ok(metadata) => metadata,
            Err(e) => {
                tracing::warn!(
                    variant = %request.to_hgvs(),
                    error = %e,
                    "Variant lookup failed, assessing without database evidence"
                );
                None
            }
        }
    }

    /// Send one prompt, retrying transient failures with backoff
    async fn query_with_retry(
        &self,
        request: &VariantRequest,
        prompt: &str,
    ) -> Result<String, AssessmentError> {
        let mut machine = RetryMachine::new(&self.config.retry, &self.backoff);

        loop {
            let attempt = machine.attempts();
            let call_start = Instant::now();

            tracing::debug!(
                gene = %request.gene,
                variant = %request.variant,
                model = %self.provider.model(),
                attempt = attempt,
                prompt_length = prompt.len(),
                "Initiating LLM call for variant assessment"
            );

            let outcome =
                match tokio::time::timeout(self.config.request_timeout, self.provider.query(prompt))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(ProviderError::transient(
                        TransientCause::Timeout,
                        format!(
                            "no response within {}s",
                            self.config.request_timeout.as_secs()
                        ),
                    )),
                };

            match machine.on_outcome(outcome) {
                Step::Done(text) => {
                    tracing::info!(
                        gene = %request.gene,
                        variant = %request.variant,
                        model = %self.provider.model(),
                        attempt = attempt,
                        elapsed_ms = call_start.elapsed().as_millis(),
                        response_length = text.len(),
                        "LLM call for variant assessment completed successfully"
                    );
                    return Ok(text);
                }
                Step::RetryAfter(delay) => {
                    tracing::warn!(
                        gene = %request.gene,
                        variant = %request.variant,
                        attempt = attempt,
                        max_attempts = self.config.retry.max_attempts,
                        delay_ms = delay.as_millis(),
                        "LLM call failed with a transient error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Step::GiveUp(error) => {
                    tracing::error!(
                        gene = %request.gene,
                        variant = %request.variant,
                        model = %self.provider.model(),
                        attempts = attempt,
                        elapsed_ms = call_start.elapsed().as_millis(),
                        error = %error,
                        "LLM call for variant assessment failed"
                    );
                    return Err(AssessmentError::Provider {
                        request: request.clone(),
                        attempts: attempt,
                        source: error,
                    });
                }
            }
        }
    }

    fn log_assessed(&self, record: &AssessmentRecord, start_time: Instant, reformatted: bool) {
        tracing::info!(
            gene = %record.gene,
            variant = %record.variant,
            tier = %record.tier,
            confidence = record.confidence.value(),
            warnings = record.warnings.len(),
            reformatted = reformatted,
            elapsed_ms = start_time.elapsed().as_millis(),
            "Variant assessment completed"
        );
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::model::Tier;

    pub(crate) const BRAF_RESPONSE: &str = r#"{
        "tier": "Tier I",
        "confidence_score": 0.95,
        "evidence_strength": "Strong",
        "summary": "BRAF V600E is targetable in melanoma.",
        "recommended_therapies": [
            {"drug_name": "Dabrafenib + Trametinib", "evidence_level": "FDA-approved"}
        ]
    }"#;

    /// Provider answering from a script and recording every prompt
    pub(crate) struct ScriptedProvider {
        responses: Mutex<VecDeque<Result<String, ProviderError>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedProvider {
        pub(crate) fn new(responses: Vec<Result<String, ProviderError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        async fn query(&self, prompt: &str) -> Result<String, ProviderError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ProviderError::fatal("script exhausted")))
        }

        fn model(&self) -> &str {
            "scripted"
        }
    }

    struct StaticLookup;

    #[async_trait]
    impl VariantLookup for StaticLookup {
        async fn lookup(
            &self,
            gene: &str,
            _variant: &str,
        ) -> Result<Option<VariantMetadata>, String> {
            if gene == "BRAF" {
                Ok(Some(VariantMetadata {
                    summary: "CIViC lists 3 level A evidence items".to_string(),
                    sources: vec!["CIViC".to_string()],
                }))
            } else {
                Err("lookup service unavailable".to_string())
            }
        }
    }

    pub(crate) fn test_config() -> OrchestratorConfig {
        OrchestratorConfig {
            model: "scripted".to_string(),
            temperature: 0.1,
            max_tokens: 1000,
            retry: RetryPolicy {
                max_attempts: 3,
                initial_delay: Duration::from_millis(100),
                max_delay: Duration::from_millis(1000),
            },
            request_timeout: Duration::from_secs(5),
        }
    }

    fn orchestrator(provider: Arc<ScriptedProvider>) -> AssessmentOrchestrator {
        AssessmentOrchestrator::new(provider, test_config())
    }

    fn braf() -> VariantRequest {
        VariantRequest::new("BRAF", "V600E", "Melanoma")
    }

    fn timeout() -> ProviderError {
        ProviderError::transient(TransientCause::Timeout, "timed out")
    }

    #[tokio::test(start_paused = true)]
    async fn test_assess_returns_record() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(BRAF_RESPONSE.to_string())]));
        let record = orchestrator(provider.clone())
            .assess(&braf())
            .await
            .unwrap();

        assert_eq!(record.tier, Tier::I);
        assert_eq!(record.therapies[0].name, "Dabrafenib + Trametinib");
        assert_eq!(record.raw_model_output, BRAF_RESPONSE);
        assert_eq!(provider.prompts().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Err(timeout()),
            Err(ProviderError::transient(TransientCause::ServerError, "503")),
            Ok(BRAF_RESPONSE.to_string()),
        ]));
        let record = orchestrator(provider.clone()).assess(&braf()).await;

        assert!(record.is_ok());
        assert_eq!(provider.prompts().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_surface_provider_error() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Err(timeout()),
            Err(timeout()),
            Err(timeout()),
            Ok(BRAF_RESPONSE.to_string()),
        ]));
        let err = orchestrator(provider.clone())
            .assess(&braf())
            .await
            .unwrap_err();

        match &err {
            AssessmentError::Provider {
                request, attempts, ..
            } => {
                assert_eq!(request, &braf());
                assert_eq!(*attempts, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(err.kind(), "transient_provider_error");
        assert_eq!(provider.prompts().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_failure_is_not_retried() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Err(ProviderError::fatal("401 Unauthorized")),
            Ok(BRAF_RESPONSE.to_string()),
        ]));
        let err = orchestrator(provider.clone())
            .assess(&braf())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "fatal_provider_error");
        assert_eq!(provider.prompts().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_provider_times_out_as_transient() {
        struct SlowProvider;

        #[async_trait]
        impl LlmProvider for SlowProvider {
            async fn query(&self, _prompt: &str) -> Result<String, ProviderError> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(BRAF_RESPONSE.to_string())
            }

            fn model(&self) -> &str {
                "slow"
            }
        }

        let err = AssessmentOrchestrator::new(Arc::new(SlowProvider), test_config())
            .assess(&braf())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            AssessmentError::Provider {
                attempts: 3,
                source: ProviderError::Transient {
                    cause: TransientCause::Timeout,
                    ..
                },
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_output_triggers_single_reformat() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(r#"{"confidence": 0.9, "summary": "no tier here"}"#.to_string()),
            Ok(BRAF_RESPONSE.to_string()),
        ]));
        let record = orchestrator(provider.clone())
            .assess(&braf())
            .await
            .unwrap();

        assert_eq!(record.tier, Tier::I);
        let prompts = provider.prompts();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[1].contains("Correction required"));
        assert!(prompts[1].contains("tier: missing"));
        assert!(prompts[1].contains("no tier here"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_malformed_output_is_parse_error() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok("I am not sure.".to_string()),
            Ok("Still not sure.".to_string()),
            Ok(BRAF_RESPONSE.to_string()),
        ]));
        let err = orchestrator(provider.clone())
            .assess(&braf())
            .await
            .unwrap_err();

        match &err {
            AssessmentError::Parse { request, .. } => assert_eq!(request, &braf()),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(err.kind(), "parse_error");
        assert_eq!(provider.prompts().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookup_evidence_is_quoted_and_failures_tolerated() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(BRAF_RESPONSE.to_string()),
            Ok(BRAF_RESPONSE
                .replace("BRAF", "KRAS")
                .replace("V600E", "G12C")),
        ]));
        let orchestrator = orchestrator(provider.clone()).with_lookup(Arc::new(StaticLookup));

        orchestrator.assess(&braf()).await.unwrap();
        orchestrator
            .assess(&VariantRequest::new("KRAS", "G12C", "Melanoma"))
            .await
            .unwrap();

        let prompts = provider.prompts();
        assert!(prompts[0].contains("CIViC lists 3 level A evidence items"));
        assert!(prompts[1].contains("No database evidence available"));
    }

    #[test]
    fn test_config_conversion() {
        let config = OrchestratorConfig::from(&Config::default());
        assert_eq!(config.model, crate::model::config::DEFAULT_MODEL);
        assert_eq!(config.retry.max_attempts, 3);
        let settings = config.completion_settings();
        assert_eq!(settings.preamble, ASSESSMENT_SYSTEM_PROMPT);
        assert_eq!(settings.max_tokens, 2000);
    }
}
