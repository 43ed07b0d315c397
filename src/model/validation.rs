//! Gold-standard benchmark and validation report models

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::{Tier, VariantRequest};

/// Curated benchmark entry used as ground truth
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoldStandardCase {
    pub gene: String,
    pub variant: String,
    pub tumor_type: String,
    pub expected_tier: Tier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_therapies: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default)]
    pub references: Vec<String>,
}

impl GoldStandardCase {
    pub fn request(&self) -> VariantRequest {
        VariantRequest::new(&self.gene, &self.variant, &self.tumor_type)
    }
}

/// Precision/recall/F1 for one tier
///
/// A metric is `None` when its denominator is zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TierMetrics {
    pub precision: Option<f64>,
    pub recall: Option<f64>,
    pub f1: Option<f64>,
    /// Number of gold cases expecting this tier
    pub support: usize,
    pub true_positives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
}

/// One incorrect or missing prediction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureEntry {
    pub gene: String,
    pub variant: String,
    pub tumor_type: String,
    pub expected: Tier,
    /// `None` when no assessment was produced
    pub predicted: Option<Tier>,
    pub tier_distance: Option<usize>,
    pub confidence: Option<f64>,
    pub summary: Option<String>,
}

/// Aggregate comparison of assessments against a gold standard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub total_cases: usize,
    pub correct_predictions: usize,
    pub overall_accuracy: f64,
    /// Mean over cases that produced an assessment; `None` if none did
    pub average_confidence: Option<f64>,
    #[serde(default)]
    pub missing_predictions: usize,
    pub per_tier_metrics: BTreeMap<Tier, TierMetrics>,
    #[serde(default)]
    pub failure_analysis: Vec<FailureEntry>,
}

impl ValidationReport {
    pub fn tier(&self, tier: Tier) -> Option<&TierMetrics> {
        self.per_tier_metrics.get(&tier)
    }
}
