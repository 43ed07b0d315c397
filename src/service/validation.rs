//! Validation of assessments against a gold standard
//!
//! Pairs records with gold cases by normalized key and computes accuracy and
//! per-tier precision/recall/F1.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::model::{
    AssessmentRecord, CaseKey, FailureEntry, GoldStandardCase, Tier, TierMetrics,
    ValidationReport,
};
use crate::service::batch::{BatchOutcome, BatchRunner, CancellationToken};

/// Longest summary quoted in the failure analysis
const MAX_FAILURE_SUMMARY_CHARS: usize = 200;

/// Problems with a gold standard or batch input file
#[derive(Debug, Error)]
pub enum ValidationInputError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed input: {0}")]
    Json(#[from] serde_json::Error),

    #[error("expected a JSON array or an object with an \"entries\" array")]
    UnexpectedShape,

    #[error("duplicate gold standard case {0}")]
    DuplicateCase(CaseKey),

    #[error("gold standard contains no cases")]
    Empty,
}

/// Read a JSON file, attaching the path to I/O errors
pub(crate) fn read_json(path: &Path) -> Result<Value, ValidationInputError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ValidationInputError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_json::from_str(&contents)?)
}

/// Parse gold standard JSON: a bare array of cases or `{"entries": [...]}`
pub fn parse_gold_standard(json: &str) -> Result<Vec<GoldStandardCase>, ValidationInputError> {
    gold_standard_from_value(serde_json::from_str(json)?)
}

/// Load and check a gold standard file
pub fn load_gold_standard(path: &Path) -> Result<Vec<GoldStandardCase>, ValidationInputError> {
    let cases = gold_standard_from_value(read_json(path)?)?;
    tracing::info!(path = %path.display(), cases = cases.len(), "Loaded gold standard");
    Ok(cases)
}

fn gold_standard_from_value(value: Value) -> Result<Vec<GoldStandardCase>, ValidationInputError> {
    let entries = match value {
        Value::Array(_) => value,
        Value::Object(mut map) => match map.remove("entries") {
            Some(entries @ Value::Array(_)) => entries,
            _ => return Err(ValidationInputError::UnexpectedShape),
        },
        _ => return Err(ValidationInputError::UnexpectedShape),
    };

    let cases: Vec<GoldStandardCase> = serde_json::from_value(entries)?;
    index_cases(&cases)?;
    Ok(cases)
}

/// Key every case, rejecting empty input and duplicate keys
fn index_cases(
    cases: &[GoldStandardCase],
) -> Result<HashMap<CaseKey, &GoldStandardCase>, ValidationInputError> {
    if cases.is_empty() {
        return Err(ValidationInputError::Empty);
    }

    let mut index = HashMap::with_capacity(cases.len());
    for case in cases {
        let key = case.request().key();
        if index.contains_key(&key) {
            return Err(ValidationInputError::DuplicateCase(key));
        }
        index.insert(key, case);
    }
    Ok(index)
}

/// Compare assessment records with gold cases
///
/// A gold case without a record counts as a missing prediction. Records
/// without a gold case are ignored.
pub fn evaluate(
    cases: &[GoldStandardCase],
    records: &[AssessmentRecord],
) -> Result<ValidationReport, ValidationInputError> {
    let index = index_cases(cases)?;

    let mut predictions: HashMap<CaseKey, &AssessmentRecord> = HashMap::new();
    for record in records {
        let key = record.request().key();
        if !index.contains_key(&key) {
            tracing::debug!(key = %key, "Ignoring assessment with no gold standard case");
            continue;
        }
        if predictions.contains_key(&key) {
            tracing::debug!(key = %key, "Ignoring repeated assessment for gold standard case");
            continue;
        }
        predictions.insert(key, record);
    }

    let mut counts: BTreeMap<Tier, TierMetrics> =
        Tier::ALL.iter().map(|t| (*t, TierMetrics::default())).collect();
    let mut correct = 0;
    let mut missing = 0;
    let mut confidence_sum = 0.0;
    let mut failures = Vec::new();

    for case in cases {
        let expected = case.expected_tier;
        let prediction = predictions.get(&case.request().key()).copied();

        if let Some(metrics) = counts.get_mut(&expected) {
            metrics.support += 1;
        }

        let Some(record) = prediction else {
            missing += 1;
            if let Some(metrics) = counts.get_mut(&expected) {
                metrics.false_negatives += 1;
            }
            failures.push(failure_entry(case, None));
            continue;
        };

        confidence_sum += record.confidence.value();

        if Tier::equals(record.tier, expected) {
            correct += 1;
            if let Some(metrics) = counts.get_mut(&expected) {
                metrics.true_positives += 1;
            }
        } else {
            if let Some(metrics) = counts.get_mut(&expected) {
                metrics.false_negatives += 1;
            }
            if let Some(metrics) = counts.get_mut(&record.tier) {
                metrics.false_positives += 1;
            }
            failures.push(failure_entry(case, Some(record)));
        }
    }

    let per_tier_metrics = counts
        .into_iter()
        .map(|(tier, counts)| (tier, with_ratios(counts)))
        .collect();

    let total_cases = cases.len();
    let present = total_cases - missing;

    Ok(ValidationReport {
        total_cases,
        correct_predictions: correct,
        overall_accuracy: correct as f64 / total_cases as f64,
        average_confidence: (present > 0).then(|| confidence_sum / present as f64),
        missing_predictions: missing,
        per_tier_metrics,
        failure_analysis: failures,
    })
}

/// Fill precision, recall and F1 from raw counts
fn with_ratios(counts: TierMetrics) -> TierMetrics {
    let predicted = counts.true_positives + counts.false_positives;
    let tp = counts.true_positives as f64;

    let precision = (predicted > 0).then(|| tp / predicted as f64);
    let recall = (counts.support > 0).then(|| tp / counts.support as f64);
    let f1 = match (precision, recall) {
        (None, None) => None,
        (p, r) => {
            let (p, r) = (p.unwrap_or(0.0), r.unwrap_or(0.0));
            if p + r == 0.0 {
                Some(0.0)
            } else {
                Some(2.0 * p * r / (p + r))
            }
        }
    };

    TierMetrics {
        precision,
        recall,
        f1,
        ..counts
    }
}

fn failure_entry(case: &GoldStandardCase, record: Option<&AssessmentRecord>) -> FailureEntry {
    FailureEntry {
        gene: case.gene.clone(),
        variant: case.variant.clone(),
        tumor_type: case.tumor_type.clone(),
        expected: case.expected_tier,
        predicted: record.map(|r| r.tier),
        tier_distance: record.map(|r| Tier::distance(r.tier, case.expected_tier)),
        confidence: record.map(|r| r.confidence.value()),
        summary: record.map(|r| r.summary.chars().take(MAX_FAILURE_SUMMARY_CHARS).collect()),
    }
}

/// Assesses every gold case and scores the results
pub struct ValidationEngine {
    runner: Arc<BatchRunner>,
}

impl ValidationEngine {
    pub fn new(runner: Arc<BatchRunner>) -> Self {
        Self { runner }
    }

    /// Run assessments for all cases, then evaluate them
    ///
    /// Failed or cancelled assessments count as missing predictions.
    pub async fn validate(
        &self,
        cases: &[GoldStandardCase],
        cancel: &CancellationToken,
    ) -> Result<(ValidationReport, Vec<BatchOutcome>), ValidationInputError> {
        index_cases(cases)?;

        let requests = cases.iter().map(GoldStandardCase::request).collect();
        let outcomes = self.runner.run(requests, cancel).await;

        let records: Vec<AssessmentRecord> = outcomes
            .iter()
            .filter_map(|outcome| outcome.record().cloned())
            .collect();

        let report = evaluate(cases, &records)?;

        tracing::info!(
            total_cases = report.total_cases,
            correct = report.correct_predictions,
            missing = report.missing_predictions,
            accuracy = report.overall_accuracy,
            "Validation completed"
        );

        Ok((report, outcomes))
    }
}
