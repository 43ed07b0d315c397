pub mod assessment;
pub mod batch;
pub mod llm;
pub mod lookup;
pub mod report;
pub mod validation;

pub use assessment::{AssessmentError, AssessmentOrchestrator, OrchestratorConfig, ParseError};
pub use batch::{BatchOutcome, BatchRunner, BatchSummary, CancellationToken};
pub use llm::{LlmProvider, OpenAiProvider, ProviderError};
pub use lookup::{VariantLookup, VariantMetadata};
pub use validation::{ValidationEngine, ValidationInputError};
