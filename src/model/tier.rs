//! Clinical actionability tiers (AMP/ASCO/CAP)
//!
//! The vocabulary is closed: a tier is only ever produced by matching a label
//! against the accepted surface forms below, never inferred from prose.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// AMP/ASCO/CAP actionability tier, ordered from strongest (I) to none (IV)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Tier {
    /// Strong clinical significance (FDA-approved, guideline-endorsed)
    I,
    /// Potential clinical significance
    II,
    /// Unknown clinical significance
    III,
    /// No known actionability
    IV,
}

impl Tier {
    /// All tiers in canonical order
    pub const ALL: [Tier; 4] = [Tier::I, Tier::II, Tier::III, Tier::IV];

    /// Canonical label, e.g. `Tier II`
    pub fn label(self) -> &'static str {
        match self {
            Tier::I => "Tier I",
            Tier::II => "Tier II",
            Tier::III => "Tier III",
            Tier::IV => "Tier IV",
        }
    }

    /// Zero-based position in the canonical order
    pub fn ordinal(self) -> usize {
        match self {
            Tier::I => 0,
            Tier::II => 1,
            Tier::III => 2,
            Tier::IV => 3,
        }
    }

    pub fn equals(a: Tier, b: Tier) -> bool {
        a == b
    }

    /// Number of tiers between `a` and `b` (0-3)
    pub fn distance(a: Tier, b: Tier) -> usize {
        a.ordinal().abs_diff(b.ordinal())
    }

    /// Tier IV conventionally carries no therapies
    pub fn is_actionable(self) -> bool {
        !matches!(self, Tier::IV)
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Error returned when a label is outside the tier vocabulary
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognized tier label: '{0}'")]
pub struct UnknownTier(pub String);

impl FromStr for Tier {
    type Err = UnknownTier;

    /// Accepts `Tier I`..`Tier IV`, `Tier 1`..`Tier 4` and the bare numerals,
    /// case-insensitive, with spaces, `-`, `_` or nothing after "tier".
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        let numeral = lowered
            .strip_prefix("tier")
            .unwrap_or(&lowered)
            .trim_start_matches([' ', '-', '_']);

        match numeral {
            "i" | "1" => Ok(Tier::I),
            "ii" | "2" => Ok(Tier::II),
            "iii" | "3" => Ok(Tier::III),
            "iv" | "4" => Ok(Tier::IV),
            _ => Err(UnknownTier(s.to_string())),
        }
    }
}

impl Serialize for Tier {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

impl<'de> Deserialize<'de> for Tier {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let label = String::deserialize(deserializer)?;
        label.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_surface_forms_normalize_identically() {
        for label in ["Tier I", "TIER 1", "tier1", "tier-i", "tier_I", "  Tier   I ", "I", "1"] {
            assert_eq!(label.parse::<Tier>(), Ok(Tier::I), "label {label:?}");
        }
        for label in ["Tier IV", "tier 4", "TIER-IV", "iv"] {
            assert_eq!(label.parse::<Tier>(), Ok(Tier::IV), "label {label:?}");
        }
    }

    #[test]
    fn test_rejects_outside_vocabulary() {
        for label in ["Unknown", "Tier V", "Tier I/II", "", "tier", "first tier", "Tier 0"] {
            assert!(label.parse::<Tier>().is_err(), "label {label:?}");
        }
    }

    #[test]
    fn test_ordering_and_distance() {
        let mut tiers = vec![Tier::III, Tier::I, Tier::IV, Tier::II];
        tiers.sort();
        assert_eq!(tiers, Tier::ALL.to_vec());
        assert_eq!(Tier::distance(Tier::I, Tier::IV), 3);
        assert_eq!(Tier::distance(Tier::III, Tier::II), 1);
        assert!(Tier::equals(Tier::II, Tier::II));
        assert!(!Tier::equals(Tier::II, Tier::III));
    }

    #[test]
    fn test_serde_uses_canonical_label() {
        assert_eq!(serde_json::to_string(&Tier::III).unwrap(), "\"Tier III\"");
        let tier: Tier = serde_json::from_str("\"tier 2\"").unwrap();
        assert_eq!(tier, Tier::II);
        assert!(serde_json::from_str::<Tier>("\"Unknown\"").is_err());
    }
}
