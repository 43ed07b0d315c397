//! Response parser: raw model text to a validated assessment record
//!
//! Strict by construction: every required field is matched against its closed
//! vocabulary and each failure is reported by field name. Nothing is defaulted
//! except free-text fields, whose absence is recorded as a warning.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::model::{
    AssessmentRecord, AssessmentWarning, Confidence, EvidenceLevel, EvidenceStrength, Therapy,
    Tier, VariantRequest,
};
use crate::service::assessment::error::{FieldError, FieldProblem, ParseError};

static FENCED_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[A-Za-z]*[ \t]*\r?\n?(.*?)```").expect("valid fenced block regex")
});

static KEY_VALUE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*(?:[-*][ \t]*)?\**([A-Za-z][A-Za-z _]*?)\**[ \t]*:[ \t]*(.+?)[ \t]*$")
        .expect("valid key/value regex")
});

/// Keys accepted in the delimited `key: value` form
const KEY_VALUE_FIELDS: &[&str] = &[
    "tier",
    "confidence",
    "confidence_score",
    "evidence_strength",
    "summary",
    "rationale",
];

/// Parse raw model output into an assessment record for `request`
pub fn parse_response(
    raw: &str,
    request: &VariantRequest,
) -> Result<AssessmentRecord, ParseError> {
    let payload = locate_payload(raw)
        .ok_or_else(|| ParseError::single("payload", FieldProblem::Missing))?;

    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    let tier = parse_tier(&payload).map_err(|e| errors.push(e)).ok();

    let confidence = match parse_confidence(&payload) {
        Ok((confidence, raw_value)) => {
            if confidence.value() != raw_value {
                warnings.push(AssessmentWarning::ConfidenceClamped {
                    original: raw_value,
                });
            }
            Some(confidence)
        }
        Err(e) => {
            errors.push(e);
            None
        }
    };

    let evidence_strength = parse_evidence_strength(&payload)
        .map_err(|e| errors.push(e))
        .ok();

    let therapies = match parse_therapies(&payload) {
        Ok(therapies) => therapies,
        Err(mut therapy_errors) => {
            errors.append(&mut therapy_errors);
            Vec::new()
        }
    };

    let (Some(tier), Some(confidence), Some(evidence_strength), true) =
        (tier, confidence, evidence_strength, errors.is_empty())
    else {
        return Err(ParseError::new(errors));
    };

    let summary = optional_string(&payload, &["summary"]);
    if summary.is_none() {
        warnings.push(AssessmentWarning::MissingSummary);
    }

    if tier.is_actionable() && therapies.is_empty() {
        warnings.push(AssessmentWarning::MissingTherapies { tier });
    }
    if !tier.is_actionable() && !therapies.is_empty() {
        warnings.push(AssessmentWarning::TherapiesForNonActionableTier {
            count: therapies.len(),
        });
    }

    for (field, expected) in [
        ("gene", &request.gene),
        ("variant", &request.variant),
        ("tumor_type", &request.tumor_type),
    ] {
        if let Some(found) = optional_string(&payload, &[field])
            && !found.trim().eq_ignore_ascii_case(expected.trim())
        {
            warnings.push(AssessmentWarning::RequestMismatch {
                field: field.to_string(),
                expected: expected.clone(),
                found,
            });
        }
    }

    Ok(AssessmentRecord {
        gene: request.gene.clone(),
        variant: request.variant.clone(),
        tumor_type: request.tumor_type.clone(),
        tier,
        confidence,
        evidence_strength,
        summary: summary.unwrap_or_default(),
        therapies,
        rationale: optional_string(&payload, &["rationale"]),
        references: string_list(&payload, "references"),
        clinical_trials_available: payload
            .get("clinical_trials_available")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        warnings,
        raw_model_output: raw.to_string(),
    })
}

/// Find the structured payload: fenced JSON, bare JSON object, then `key: value` lines
fn locate_payload(raw: &str) -> Option<Map<String, Value>> {
    for captures in FENCED_BLOCK.captures_iter(raw) {
        if let Some(object) = captures.get(1).and_then(|m| find_json_object(m.as_str())) {
            return Some(object);
        }
    }

    find_json_object(raw).or_else(|| parse_key_values(raw))
}

/// First balanced `{...}` span that parses as a JSON object
fn find_json_object(text: &str) -> Option<Map<String, Value>> {
    let bytes = text.as_bytes();

    for (start, _) in text.match_indices('{') {
        let Some(end) = balanced_end(&bytes[start..]) else {
            continue;
        };
        if let Ok(Value::Object(object)) = serde_json::from_str(&text[start..start + end]) {
            return Some(object);
        }
    }

    None
}

/// Length of the balanced brace span starting at `bytes[0] == b'{'`, string-aware
fn balanced_end(bytes: &[u8]) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate() {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }

    None
}

/// Strictly delimited `key: value` block, one known field per line
fn parse_key_values(raw: &str) -> Option<Map<String, Value>> {
    let mut object = Map::new();

    for captures in KEY_VALUE_LINE.captures_iter(raw) {
        let key = captures[1].trim().to_lowercase().replace(' ', "_");
        if !KEY_VALUE_FIELDS.contains(&key.as_str()) || object.contains_key(&key) {
            continue;
        }
        // `**Tier:** Tier I` leaves the closing bold marker on the value
        let value = captures[2]
            .trim_matches(|c: char| c == '*' || c == '"' || c.is_whitespace())
            .to_string();
        object.insert(key, Value::String(value));
    }

    (!object.is_empty()).then_some(object)
}

/// First non-null value among `keys`, with the key it was found under
fn present<'a>(
    payload: &'a Map<String, Value>,
    keys: &[&'static str],
) -> Option<(&'static str, &'a Value)> {
    keys.iter().find_map(|&key| {
        payload
            .get(key)
            .filter(|v| !v.is_null())
            .map(|v| (key, v))
    })
}

fn invalid(field: &str, reason: impl Into<String>) -> FieldError {
    FieldError {
        field: field.to_string(),
        problem: FieldProblem::Invalid(reason.into()),
    }
}

fn missing(field: &str) -> FieldError {
    FieldError {
        field: field.to_string(),
        problem: FieldProblem::Missing,
    }
}

fn parse_tier(payload: &Map<String, Value>) -> Result<Tier, FieldError> {
    let (_, value) = present(payload, &["tier"]).ok_or_else(|| missing("tier"))?;
    let label = value
        .as_str()
        .ok_or_else(|| invalid("tier", format!("expected a tier label, found {}", value)))?;
    label.parse().map_err(|e: crate::model::tier::UnknownTier| invalid("tier", e.to_string()))
}

/// Returns the clamped confidence and the unclamped value it came from
fn parse_confidence(payload: &Map<String, Value>) -> Result<(Confidence, f64), FieldError> {
    let (_, value) =
        present(payload, &["confidence", "confidence_score"]).ok_or_else(|| missing("confidence"))?;

    let raw_value = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_confidence_text(s),
        _ => None,
    }
    .ok_or_else(|| invalid("confidence", format!("not a number: {}", value)))?;

    let confidence = Confidence::clamped(raw_value)
        .ok_or_else(|| invalid("confidence", format!("not a finite number: {}", value)))?;

    Ok((confidence, raw_value))
}

/// `"0.95"` -> 0.95, `"95%"` -> 0.95
fn parse_confidence_text(text: &str) -> Option<f64> {
    let text = text.trim();
    match text.strip_suffix('%') {
        Some(percent) => percent.trim().parse::<f64>().ok().map(|p| p / 100.0),
        None => text.parse().ok(),
    }
}

fn parse_evidence_strength(payload: &Map<String, Value>) -> Result<EvidenceStrength, FieldError> {
    let (_, value) =
        present(payload, &["evidence_strength"]).ok_or_else(|| missing("evidence_strength"))?;
    value
        .as_str()
        .ok_or_else(|| invalid("evidence_strength", format!("expected a label, found {}", value)))?
        .parse()
        .map_err(|e: String| invalid("evidence_strength", e))
}

fn parse_therapies(payload: &Map<String, Value>) -> Result<Vec<Therapy>, Vec<FieldError>> {
    let Some((key, value)) = present(payload, &["therapies", "recommended_therapies"]) else {
        return Ok(Vec::new());
    };
    let Some(entries) = value.as_array() else {
        return Err(vec![invalid(key, "expected a list")]);
    };

    let mut therapies = Vec::with_capacity(entries.len());
    let mut errors = Vec::new();

    for (i, entry) in entries.iter().enumerate() {
        let prefix = format!("therapies[{}]", i);
        let Some(object) = entry.as_object() else {
            errors.push(invalid(&prefix, "expected an object"));
            continue;
        };

        let name = optional_string(object, &["name", "drug_name"]).filter(|n| !n.trim().is_empty());
        if name.is_none() {
            errors.push(missing(&format!("{}.name", prefix)));
        }

        let level_field = format!("{}.evidence_level", prefix);
        let evidence_level = match present(object, &["evidence_level"]) {
            None => {
                errors.push(missing(&level_field));
                None
            }
            Some((_, value)) => match value.as_str().map(str::parse::<EvidenceLevel>) {
                Some(Ok(level)) => Some(level),
                Some(Err(e)) => {
                    errors.push(invalid(&level_field, e));
                    None
                }
                None => {
                    errors.push(invalid(&level_field, format!("expected a label, found {}", value)));
                    None
                }
            },
        };

        if let (Some(name), Some(evidence_level)) = (name, evidence_level) {
            therapies.push(Therapy {
                name,
                evidence_level,
                approval_status: optional_string(object, &["approval_status"]).unwrap_or_default(),
                clinical_context: optional_string(object, &["clinical_context"]).unwrap_or_default(),
            });
        }
    }

    if errors.is_empty() {
        Ok(therapies)
    } else {
        Err(errors)
    }
}

fn optional_string(payload: &Map<String, Value>, keys: &[&'static str]) -> Option<String> {
    present(payload, keys)
        .and_then(|(_, v)| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn string_list(payload: &Map<String, Value>, key: &str) -> Vec<String> {
    payload
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn braf() -> VariantRequest {
        VariantRequest::new("BRAF", "V600E", "Melanoma")
    }

    const BRAF_RESPONSE: &str = r#"{
        "tier": "Tier I",
        "confidence_score": 0.95,
        "evidence_strength": "Strong",
        "summary": "BRAF V600E is a well-established actionable mutation in melanoma.",
        "rationale": "FDA-approved BRAF/MEK inhibitor combinations.",
        "recommended_therapies": [
            {
                "drug_name": "Vemurafenib",
                "evidence_level": "FDA-approved",
                "approval_status": "Approved",
                "clinical_context": "First-line"
            },
            {
                "drug_name": "Dabrafenib + Trametinib",
                "evidence_level": "FDA-approved",
                "approval_status": "Approved",
                "clinical_context": "First-line combination"
            }
        ],
        "clinical_trials_available": true,
        "references": ["PMID:20818844"]
    }"#;

    #[test]
    fn test_parses_plain_json() {
        let record = parse_response(BRAF_RESPONSE, &braf()).unwrap();

        assert_eq!(record.tier, Tier::I);
        assert_eq!(record.confidence.value(), 0.95);
        assert_eq!(record.evidence_strength, EvidenceStrength::Strong);
        assert_eq!(record.therapies.len(), 2);
        assert_eq!(record.therapies[0].name, "Vemurafenib");
        assert_eq!(record.therapies[1].evidence_level, EvidenceLevel::FdaApproved);
        assert!(record.clinical_trials_available);
        assert_eq!(record.references, vec!["PMID:20818844"]);
        assert!(record.warnings.is_empty());
        assert_eq!(record.raw_model_output, BRAF_RESPONSE);
    }

    #[test]
    fn test_parses_markdown_fenced_json_with_prose() {
        let raw = format!("Here is my assessment:\n```json\n{}\n```\nLet me know.", BRAF_RESPONSE);
        let record = parse_response(&raw, &braf()).unwrap();
        assert_eq!(record.tier, Tier::I);
        assert_eq!(record.raw_model_output, raw);
    }

    #[test]
    fn test_parses_json_embedded_in_prose_with_braces_in_strings() {
        let raw = r#"Assessment {draft} follows: {"tier": "tier 2", "confidence": "80%",
            "evidence_strength": "moderate", "summary": "uses {braces} inside",
            "therapies": [{"name": "Osimertinib", "evidence_level": "Off-label"}]} done"#;
        let record = parse_response(raw, &braf()).unwrap();
        assert_eq!(record.tier, Tier::II);
        assert!((record.confidence.value() - 0.8).abs() < 1e-9);
        assert_eq!(record.summary, "uses {braces} inside");
        assert_eq!(record.therapies[0].evidence_level, EvidenceLevel::OffLabel);
        assert_eq!(record.therapies[0].approval_status, "");
    }

    #[test]
    fn test_parses_bold_key_value_block() {
        let raw = "**Tier:** Tier I\n**Confidence:** 0.8\n**Evidence Strength:** Moderate\n**Summary:** \"Approved.\"";
        let record = parse_response(raw, &braf()).unwrap();
        assert_eq!(record.tier, Tier::I);
        assert!((record.confidence.value() - 0.8).abs() < 1e-9);
        assert_eq!(record.evidence_strength, EvidenceStrength::Moderate);
        assert_eq!(record.summary, "Approved.");
    }

    #[test]
    fn test_parses_key_value_block() {
        let raw = "Tier: Tier III\nConfidence: 40%\nEvidence Strength: Weak\nSummary: Limited data.";
        let record = parse_response(raw, &braf()).unwrap();
        assert_eq!(record.tier, Tier::III);
        assert!((record.confidence.value() - 0.4).abs() < 1e-9);
        assert_eq!(record.evidence_strength, EvidenceStrength::Weak);
        assert_eq!(record.summary, "Limited data.");
        assert!(record
            .warnings
            .contains(&AssessmentWarning::MissingTherapies { tier: Tier::III }));
    }

    #[test]
    fn test_missing_payload() {
        let err = parse_response("I cannot help with that.", &braf()).unwrap_err();
        assert_eq!(err.fields(), vec!["payload"]);
    }

    #[test]
    fn test_missing_tier_is_named_and_never_synthesized() {
        let raw = r#"{"confidence": 0.9, "evidence_strength": "Strong", "summary": "x"}"#;
        let err = parse_response(raw, &braf()).unwrap_err();
        assert!(err.names_field("tier"));
        assert_eq!(err.errors()[0].problem, FieldProblem::Missing);
    }

    #[test]
    fn test_reports_every_failing_field() {
        let raw = r#"{"tier": "Unknown", "evidence_strength": "High", "summary": "x"}"#;
        let err = parse_response(raw, &braf()).unwrap_err();
        assert_eq!(err.fields(), vec!["tier", "confidence", "evidence_strength"]);
        assert!(matches!(err.errors()[0].problem, FieldProblem::Invalid(_)));
    }

    #[test]
    fn test_null_tier_counts_as_missing() {
        let raw = r#"{"tier": null, "confidence": 0.5, "evidence_strength": "Weak"}"#;
        let err = parse_response(raw, &braf()).unwrap_err();
        assert_eq!(err.errors()[0].problem, FieldProblem::Missing);
    }

    #[test]
    fn test_confidence_over_100_percent_is_clamped_and_flagged() {
        let raw = r#"{"tier": "Tier IV", "confidence": "107%", "evidence_strength": "Weak", "summary": "x"}"#;
        let record = parse_response(raw, &braf()).unwrap();
        assert_eq!(record.confidence.value(), 1.0);
        assert!(record.confidence_clamped());
        assert!(matches!(
            record.warnings[0],
            AssessmentWarning::ConfidenceClamped { original } if (original - 1.07).abs() < 1e-9
        ));
    }

    #[test]
    fn test_negative_confidence_is_clamped_to_zero() {
        let raw = r#"{"tier": "Tier IV", "confidence": -0.2, "evidence_strength": "Weak", "summary": "x"}"#;
        let record = parse_response(raw, &braf()).unwrap();
        assert_eq!(record.confidence.value(), 0.0);
        assert!(record.confidence_clamped());
    }

    #[test]
    fn test_non_numeric_confidence_is_rejected() {
        for confidence in [r#""high""#, r#""NaN""#, "true", "[0.5]"] {
            let raw = format!(
                r#"{{"tier": "Tier I", "confidence": {}, "evidence_strength": "Strong"}}"#,
                confidence
            );
            let err = parse_response(&raw, &braf()).unwrap_err();
            assert_eq!(err.fields(), vec!["confidence"], "confidence {confidence}");
        }
    }

    #[test]
    fn test_actionable_tier_without_therapies_warns() {
        let raw = r#"{"tier": "Tier II", "confidence": 0.7, "evidence_strength": "Moderate", "summary": "x", "therapies": []}"#;
        let record = parse_response(raw, &braf()).unwrap();
        assert_eq!(
            record.warnings,
            vec![AssessmentWarning::MissingTherapies { tier: Tier::II }]
        );
    }

    #[test]
    fn test_tier_iv_with_therapies_warns() {
        let raw = r#"{"tier": "Tier IV", "confidence": 0.7, "evidence_strength": "Weak", "summary": "x",
            "therapies": [{"name": "Imatinib", "evidence_level": "Investigational"}]}"#;
        let record = parse_response(raw, &braf()).unwrap();
        assert_eq!(
            record.warnings,
            vec![AssessmentWarning::TherapiesForNonActionableTier { count: 1 }]
        );
    }

    #[test]
    fn test_tier_iv_without_therapies_has_no_warning() {
        let raw = r#"{"tier": "Tier IV", "confidence": 0.7, "evidence_strength": "Weak", "summary": "x"}"#;
        let record = parse_response(raw, &braf()).unwrap();
        assert!(record.warnings.is_empty());
    }

    #[test]
    fn test_invalid_therapy_fields_are_named() {
        let raw = r#"{"tier": "Tier I", "confidence": 0.9, "evidence_strength": "Strong",
            "therapies": [
                {"name": "Vemurafenib", "evidence_level": "FDA-approved"},
                {"evidence_level": "Level 1"},
                "Trametinib"
            ]}"#;
        let err = parse_response(raw, &braf()).unwrap_err();
        assert_eq!(
            err.fields(),
            vec!["therapies[1].name", "therapies[1].evidence_level", "therapies[2]"]
        );
    }

    #[test]
    fn test_request_mismatch_warns_but_keeps_request_identity() {
        let raw = r#"{"gene": "NRAS", "variant": "v600e", "tier": "Tier I", "confidence": 0.9,
            "evidence_strength": "Strong", "summary": "x",
            "therapies": [{"name": "Dabrafenib", "evidence_level": "FDA-approved"}]}"#;
        let record = parse_response(raw, &braf()).unwrap();
        assert_eq!(record.gene, "BRAF");
        assert_eq!(
            record.warnings,
            vec![AssessmentWarning::RequestMismatch {
                field: "gene".to_string(),
                expected: "BRAF".to_string(),
                found: "NRAS".to_string(),
            }]
        );
    }

    #[test]
    fn test_missing_summary_warns() {
        let raw = r#"{"tier": "Tier IV", "confidence": 0.3, "evidence_strength": "Weak"}"#;
        let record = parse_response(raw, &braf()).unwrap();
        assert_eq!(record.summary, "");
        assert_eq!(record.warnings, vec![AssessmentWarning::MissingSummary]);
    }

    #[test]
    fn test_parsing_is_idempotent() {
        let raw = format!("```\n{}\n```", BRAF_RESPONSE);
        let first = parse_response(&raw, &braf()).unwrap();
        let second = parse_response(&raw, &braf()).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }
}
