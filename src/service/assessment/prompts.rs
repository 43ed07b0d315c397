//! Prompts for variant actionability assessment

use schemars::schema_for;

use crate::model::VariantRequest;
use crate::model::extracted::ExtractedAssessment;
use crate::service::assessment::error::ParseError;
use crate::service::lookup::VariantMetadata;

/// Longest slice of a previous response quoted back in a reformat prompt
const MAX_ECHOED_RESPONSE_CHARS: usize = 4000;

/// System prompt for actionability assessment
pub const ASSESSMENT_SYSTEM_PROMPT: &str = r#"You are a molecular tumor board expert in precision oncology.

Your role is to classify the clinical actionability of a somatic variant in a
given tumor type using the AMP/ASCO/CAP tiering system:
- Tier I: strong clinical significance (FDA-approved therapy or professional guideline for this tumor type)
- Tier II: potential clinical significance (FDA-approved in another tumor type, or strong clinical trial evidence)
- Tier III: unknown clinical significance
- Tier IV: benign or likely benign, no known actionability

You must:
- Base conclusions on established clinical evidence
- Be conservative when evidence is weak or conflicting
- List therapies only when they are relevant to the variant in this tumor type

Your output must be a single JSON object only and conform to the requested schema."#;

/// JSON schema of the expected payload, rendered for the prompt
pub fn payload_schema() -> String {
    let schema = schema_for!(ExtractedAssessment);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}

/// Build the assessment prompt for one variant
pub fn build_assessment_prompt(
    request: &VariantRequest,
    evidence: Option<&VariantMetadata>,
) -> String {
    let evidence_section = match evidence {
        Some(metadata) if !metadata.summary.trim().is_empty() => {
            let sources = if metadata.sources.is_empty() {
                String::new()
            } else {
                format!("\nSources: {}", metadata.sources.join(", "))
            };
            format!("{}{}", metadata.summary.trim(), sources)
        }
        _ => "No database evidence available. Rely on established clinical knowledge.".to_string(),
    };

    format!(
        r#"Assess the clinical actionability of the following variant.

## Variant
Gene: {gene}
Variant: {variant}
Tumor Type: {tumor_type}

## Evidence
{evidence_section}

## Instructions
Respond with one JSON object matching this schema:
{schema}

Rules:
- "tier" must be exactly one of "Tier I", "Tier II", "Tier III", "Tier IV"
- "confidence_score" is a number between 0 and 1
- "evidence_strength" must be exactly one of "Strong", "Moderate", "Weak"
- each therapy "evidence_level" must be one of "FDA-approved", "Off-label", "Investigational", "Preclinical"
- Tier IV assessments list no therapies"#,
        gene = request.gene,
        variant = request.variant,
        tumor_type = request.tumor_type,
        evidence_section = evidence_section,
        schema = payload_schema(),
    )
}

/// Build the follow-up prompt asking the model to fix a malformed answer
pub fn build_reformat_prompt(
    original_prompt: &str,
    previous_response: &str,
    error: &ParseError,
) -> String {
    let echoed: String = previous_response
        .chars()
        .take(MAX_ECHOED_RESPONSE_CHARS)
        .collect();
    let problems: Vec<String> = error.errors().iter().map(ToString::to_string).collect();

    format!(
        r#"{original_prompt}

## Correction required
Your previous answer could not be used:
{echoed}

Problems:
- {problems}

Reply again with only the corrected JSON object. Do not add any text outside it."#,
        original_prompt = original_prompt,
        echoed = echoed,
        problems = problems.join("\n- "),
    )
}
