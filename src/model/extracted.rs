//! Payload shape the model is asked to produce
//!
//! Only used to describe the expected JSON to the model. The response parser
//! reads the payload field by field so it can report every failing field.

use schemars::JsonSchema;
use serde::Serialize;

/// Structured actionability judgment requested from the model
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct ExtractedAssessment {
    /// One of "Tier I", "Tier II", "Tier III", "Tier IV"
    pub tier: String,
    /// Confidence in the tier assignment, between 0 and 1
    pub confidence_score: f64,
    /// One of "Strong", "Moderate", "Weak"
    pub evidence_strength: String,
    pub summary: String,
    pub rationale: Option<String>,
    pub recommended_therapies: Vec<ExtractedTherapy>,
    pub clinical_trials_available: Option<bool>,
    pub references: Option<Vec<String>>,
}

/// Therapy entry requested from the model
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct ExtractedTherapy {
    pub drug_name: String,
    /// One of "FDA-approved", "Off-label", "Investigational", "Preclinical"
    pub evidence_level: String,
    pub approval_status: Option<String>,
    /// e.g. first-line, after progression on ...
    pub clinical_context: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_names_payload_fields() {
        let schema = serde_json::to_value(schemars::schema_for!(ExtractedAssessment)).unwrap();
        let properties = schema["properties"].as_object().unwrap();
        for field in ["tier", "confidence_score", "evidence_strength", "recommended_therapies"] {
            assert!(properties.contains_key(field), "{field}");
        }
        assert!(schema.to_string().contains("drug_name"));
    }
}
