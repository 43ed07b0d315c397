pub mod assessment;
pub mod config;
pub mod extracted;
pub mod request;
pub mod tier;
pub mod validation;

pub use assessment::{
    AssessmentRecord, AssessmentWarning, Confidence, EvidenceLevel, EvidenceStrength, Therapy,
};
pub use config::{BatchExitPolicy, Config, RetryConfig};
pub use request::{CaseKey, VariantRequest};
pub use tier::Tier;
pub use validation::{FailureEntry, GoldStandardCase, TierMetrics, ValidationReport};
