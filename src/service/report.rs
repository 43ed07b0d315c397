//! Plain-text reports for the command line

use std::fmt;

use crate::model::{AssessmentRecord, Tier, ValidationReport};
use crate::service::batch::BatchSummary;

const WIDTH: usize = 80;
/// Failure entries listed before the report elides the rest
const MAX_LISTED_FAILURES: usize = 10;

fn heavy_rule(f: &mut fmt::Formatter<'_>) -> fmt::Result {
    writeln!(f, "{}", "=".repeat(WIDTH))
}

fn section(f: &mut fmt::Formatter<'_>, title: &str) -> fmt::Result {
    writeln!(f, "\n{}", "-".repeat(WIDTH))?;
    writeln!(f, "{title}")?;
    writeln!(f, "{}", "-".repeat(WIDTH))
}

fn percent(value: Option<f64>) -> String {
    value
        .map(|v| format!("{:.2}%", v * 100.0))
        .unwrap_or_else(|| "n/a".to_string())
}

/// Report for a single assessment
pub struct AssessmentReport<'a>(pub &'a AssessmentRecord);

impl fmt::Display for AssessmentReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let record = self.0;

        heavy_rule(f)?;
        writeln!(f, "VARIANT ACTIONABILITY ASSESSMENT REPORT")?;
        heavy_rule(f)?;
        writeln!(f, "\nVariant: {} {}", record.gene, record.variant)?;
        writeln!(f, "Tumor Type: {}", record.tumor_type)?;
        writeln!(f, "\nTier: {}", record.tier)?;
        writeln!(f, "Confidence: {:.1}%", record.confidence.value() * 100.0)?;
        writeln!(f, "Evidence Strength: {}", record.evidence_strength)?;

        section(f, "SUMMARY")?;
        writeln!(f, "{}", record.summary)?;

        if let Some(rationale) = &record.rationale {
            section(f, "RATIONALE")?;
            writeln!(f, "{rationale}")?;
        }

        if !record.therapies.is_empty() {
            section(
                f,
                &format!("RECOMMENDED THERAPIES ({})", record.therapies.len()),
            )?;
            for (idx, therapy) in record.therapies.iter().enumerate() {
                writeln!(f, "\n{}. {}", idx + 1, therapy.name)?;
                writeln!(f, "   Evidence Level: {}", therapy.evidence_level)?;
                if !therapy.approval_status.is_empty() {
                    writeln!(f, "   Approval Status: {}", therapy.approval_status)?;
                }
                if !therapy.clinical_context.is_empty() {
                    writeln!(f, "   Clinical Context: {}", therapy.clinical_context)?;
                }
            }
        }

        if record.clinical_trials_available {
            writeln!(f, "\n{}", "-".repeat(WIDTH))?;
            writeln!(f, "Clinical trials may be available for this variant.")?;
        }

        if !record.references.is_empty() {
            section(f, &format!("KEY REFERENCES ({})", record.references.len()))?;
            for (idx, reference) in record.references.iter().enumerate() {
                writeln!(f, "{}. {}", idx + 1, reference)?;
            }
        }

        if !record.warnings.is_empty() {
            section(f, &format!("WARNINGS ({})", record.warnings.len()))?;
            for warning in &record.warnings {
                writeln!(f, "- {warning}")?;
            }
        }

        write!(f, "\n{}", "=".repeat(WIDTH))
    }
}

/// Report for a validation run
pub struct ValidationSummaryReport<'a>(pub &'a ValidationReport);

impl fmt::Display for ValidationSummaryReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let report = self.0;

        heavy_rule(f)?;
        writeln!(f, "VALIDATION REPORT")?;
        heavy_rule(f)?;
        writeln!(f, "\nTotal Cases: {}", report.total_cases)?;
        writeln!(f, "Correct Predictions: {}", report.correct_predictions)?;
        writeln!(f, "Missing Predictions: {}", report.missing_predictions)?;
        writeln!(
            f,
            "Overall Accuracy: {}",
            percent(Some(report.overall_accuracy))
        )?;
        writeln!(
            f,
            "Average Confidence: {}",
            percent(report.average_confidence)
        )?;

        section(f, "PER-TIER METRICS")?;
        for tier in Tier::ALL {
            let Some(metrics) = report.tier(tier) else {
                continue;
            };
            writeln!(f, "\n{tier} (support {}):", metrics.support)?;
            writeln!(f, "  Precision: {}", percent(metrics.precision))?;
            writeln!(f, "  Recall: {}", percent(metrics.recall))?;
            writeln!(f, "  F1 Score: {}", percent(metrics.f1))?;
            writeln!(
                f,
                "  TP: {}, FP: {}, FN: {}",
                metrics.true_positives, metrics.false_positives, metrics.false_negatives
            )?;
        }

        let failures = &report.failure_analysis;
        if !failures.is_empty() {
            section(f, &format!("FAILURE ANALYSIS ({} errors)", failures.len()))?;
            for (idx, failure) in failures.iter().take(MAX_LISTED_FAILURES).enumerate() {
                writeln!(
                    f,
                    "\n{}. {} {} in {}",
                    idx + 1,
                    failure.gene,
                    failure.variant,
                    failure.tumor_type
                )?;
                match failure.predicted {
                    Some(predicted) => writeln!(
                        f,
                        "   Expected: {} | Predicted: {} | Distance: {}",
                        failure.expected,
                        predicted,
                        failure.tier_distance.unwrap_or_default()
                    )?,
                    None => writeln!(
                        f,
                        "   Expected: {} | Predicted: none (assessment failed)",
                        failure.expected
                    )?,
                }
                if let Some(confidence) = failure.confidence {
                    writeln!(f, "   Confidence: {confidence:.2}")?;
                }
                if let Some(summary) = &failure.summary {
                    writeln!(f, "   Summary: {summary}")?;
                }
            }
            if failures.len() > MAX_LISTED_FAILURES {
                writeln!(
                    f,
                    "\n... and {} more errors",
                    failures.len() - MAX_LISTED_FAILURES
                )?;
            }
        }

        write!(f, "\n{}", "=".repeat(WIDTH))
    }
}

/// Report for a batch run
pub struct BatchReport<'a>(pub &'a BatchSummary);

impl fmt::Display for BatchReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let summary = self.0;

        heavy_rule(f)?;
        writeln!(f, "BATCH ASSESSMENT SUMMARY")?;
        heavy_rule(f)?;
        writeln!(f, "\nTotal: {}", summary.total)?;
        writeln!(f, "Succeeded: {}", summary.succeeded)?;
        writeln!(f, "Failed: {}", summary.failed)?;
        writeln!(f, "Cancelled: {}", summary.cancelled)?;

        if !summary.tier_distribution.is_empty() {
            section(f, "TIER DISTRIBUTION")?;
            for (tier, count) in &summary.tier_distribution {
                writeln!(f, "{tier}: {count}")?;
            }
        }

        if !summary.failures_by_kind.is_empty() {
            section(f, "FAILURES")?;
            for (kind, count) in &summary.failures_by_kind {
                writeln!(f, "{kind}: {count}")?;
            }
        }

        write!(f, "\n{}", "=".repeat(WIDTH))
    }
}
