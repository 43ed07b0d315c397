//! Canonical, validated representation of one model judgment

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::model::{Tier, VariantRequest};

/// Confidence in the supporting literature, independent of the tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EvidenceStrength {
    Strong,
    Moderate,
    Weak,
}

impl FromStr for EvidenceStrength {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strong" => Ok(EvidenceStrength::Strong),
            "moderate" => Ok(EvidenceStrength::Moderate),
            "weak" => Ok(EvidenceStrength::Weak),
            _ => Err(format!("unrecognized evidence strength: '{}'", s)),
        }
    }
}

impl fmt::Display for EvidenceStrength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EvidenceStrength::Strong => "Strong",
            EvidenceStrength::Moderate => "Moderate",
            EvidenceStrength::Weak => "Weak",
        };
        f.write_str(label)
    }
}

/// Level of evidence backing a therapy recommendation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EvidenceLevel {
    #[serde(rename = "FDA-approved")]
    FdaApproved,
    #[serde(rename = "Off-label")]
    OffLabel,
    Investigational,
    Preclinical,
}

impl FromStr for EvidenceLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['-', '_'], " ");
        match normalized.as_str() {
            "fda approved" | "approved" => Ok(EvidenceLevel::FdaApproved),
            "off label" => Ok(EvidenceLevel::OffLabel),
            "investigational" | "clinical trial" => Ok(EvidenceLevel::Investigational),
            "preclinical" | "pre clinical" => Ok(EvidenceLevel::Preclinical),
            _ => Err(format!("unrecognized evidence level: '{}'", s)),
        }
    }
}

impl fmt::Display for EvidenceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EvidenceLevel::FdaApproved => "FDA-approved",
            EvidenceLevel::OffLabel => "Off-label",
            EvidenceLevel::Investigational => "Investigational",
            EvidenceLevel::Preclinical => "Preclinical",
        };
        f.write_str(label)
    }
}

/// Therapy recommended for the assessed variant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Therapy {
    pub name: String,
    pub evidence_level: EvidenceLevel,
    pub approval_status: String,
    /// e.g. first-line, resistant setting
    pub clinical_context: String,
}

/// Confidence score, always within [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Confidence(f64);

impl Confidence {
    /// Rejects values outside [0, 1] and non-finite values
    pub fn new(value: f64) -> Option<Self> {
        (value.is_finite() && (0.0..=1.0).contains(&value)).then_some(Self(value))
    }

    /// Clamps a finite value into [0, 1]. Returns `None` for NaN and infinities.
    pub fn clamped(value: f64) -> Option<Self> {
        value.is_finite().then(|| Self(value.clamp(0.0, 1.0)))
    }

    pub fn value(self) -> f64 {
        self.0
    }
}

impl Serialize for Confidence {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.0)
    }
}

impl<'de> Deserialize<'de> for Confidence {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = f64::deserialize(deserializer)?;
        Confidence::new(value).ok_or_else(|| {
            serde::de::Error::custom(format!("confidence {} is outside [0, 1]", value))
        })
    }
}

/// Consistency issue noticed while parsing; recorded, never fatal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AssessmentWarning {
    /// Extracted confidence was outside [0, 1] and was clamped
    ConfidenceClamped { original: f64 },
    /// Actionable tier reported without any therapy
    MissingTherapies { tier: Tier },
    /// Tier IV reported with therapies attached
    TherapiesForNonActionableTier { count: usize },
    /// Payload names a different gene/variant/tumor type than the request
    RequestMismatch {
        field: String,
        expected: String,
        found: String,
    },
    MissingSummary,
}

impl fmt::Display for AssessmentWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssessmentWarning::ConfidenceClamped { original } => {
                write!(f, "confidence {} was clamped into [0, 1]", original)
            }
            AssessmentWarning::MissingTherapies { tier } => {
                write!(f, "{} assessment lists no therapies", tier)
            }
            AssessmentWarning::TherapiesForNonActionableTier { count } => {
                write!(f, "Tier IV assessment lists {} therapies", count)
            }
            AssessmentWarning::RequestMismatch {
                field,
                expected,
                found,
            } => write!(
                f,
                "model answered for {} '{}' but '{}' was requested",
                field, found, expected
            ),
            AssessmentWarning::MissingSummary => f.write_str("model did not provide a summary"),
        }
    }
}

/// Parsed and validated actionability assessment for one variant
///
/// Built only by the response parser; re-assessment produces a new record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentRecord {
    pub gene: String,
    pub variant: String,
    pub tumor_type: String,
    pub tier: Tier,
    pub confidence: Confidence,
    pub evidence_strength: EvidenceStrength,
    pub summary: String,
    pub therapies: Vec<Therapy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    #[serde(default)]
    pub references: Vec<String>,
    #[serde(default)]
    pub clinical_trials_available: bool,
    #[serde(default)]
    pub warnings: Vec<AssessmentWarning>,
    /// Unmodified model output, retained for audit
    pub raw_model_output: String,
}

impl AssessmentRecord {
    pub fn request(&self) -> VariantRequest {
        VariantRequest::new(&self.gene, &self.variant, &self.tumor_type)
    }

    /// Whether the extracted confidence had to be clamped
    pub fn confidence_clamped(&self) -> bool {
        self.warnings
            .iter()
            .any(|w| matches!(w, AssessmentWarning::ConfidenceClamped { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_range() {
        assert!(Confidence::new(0.0).is_some());
        assert!(Confidence::new(1.0).is_some());
        assert!(Confidence::new(1.07).is_none());
        assert!(Confidence::new(-0.1).is_none());
        assert!(Confidence::new(f64::NAN).is_none());
        assert_eq!(Confidence::clamped(1.07).map(Confidence::value), Some(1.0));
        assert_eq!(Confidence::clamped(-3.0).map(Confidence::value), Some(0.0));
        assert!(Confidence::clamped(f64::INFINITY).is_none());
    }

    #[test]
    fn test_confidence_deserialize_rejects_out_of_range() {
        assert!(serde_json::from_str::<Confidence>("0.5").is_ok());
        assert!(serde_json::from_str::<Confidence>("1.5").is_err());
    }

    #[test]
    fn test_evidence_vocabularies() {
        assert_eq!("STRONG".parse::<EvidenceStrength>(), Ok(EvidenceStrength::Strong));
        assert_eq!(" weak ".parse::<EvidenceStrength>(), Ok(EvidenceStrength::Weak));
        assert!("High".parse::<EvidenceStrength>().is_err());

        assert_eq!("FDA approved".parse::<EvidenceLevel>(), Ok(EvidenceLevel::FdaApproved));
        assert_eq!("fda-approved".parse::<EvidenceLevel>(), Ok(EvidenceLevel::FdaApproved));
        assert_eq!("Off_Label".parse::<EvidenceLevel>(), Ok(EvidenceLevel::OffLabel));
        assert_eq!("pre-clinical".parse::<EvidenceLevel>(), Ok(EvidenceLevel::Preclinical));
        assert!("Level 1A".parse::<EvidenceLevel>().is_err());
    }

    #[test]
    fn test_evidence_level_serializes_as_label() {
        let json = serde_json::to_string(&EvidenceLevel::FdaApproved).unwrap();
        assert_eq!(json, "\"FDA-approved\"");
        assert_eq!(
            serde_json::from_str::<EvidenceLevel>(&json).unwrap(),
            EvidenceLevel::FdaApproved
        );
    }
}
