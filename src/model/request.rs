use std::fmt;

use serde::{Deserialize, Serialize};

/// One variant to assess: also the row format of a batch input file
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VariantRequest {
    /// Gene symbol (e.g., BRAF)
    pub gene: String,
    /// Variant notation (e.g., V600E)
    pub variant: String,
    /// Tumor type (e.g., Melanoma)
    pub tumor_type: String,
}

impl VariantRequest {
    pub fn new(
        gene: impl Into<String>,
        variant: impl Into<String>,
        tumor_type: impl Into<String>,
    ) -> Self {
        Self {
            gene: gene.into(),
            variant: variant.into(),
            tumor_type: tumor_type.into(),
        }
    }

    /// Matching key: trimmed and case-folded (gene, variant, tumor_type)
    pub fn key(&self) -> CaseKey {
        CaseKey::new(&self.gene, &self.variant, &self.tumor_type)
    }

    /// HGVS-like notation used for database lookups, e.g. `BRAF:V600E`
    pub fn to_hgvs(&self) -> String {
        format!("{}:{}", self.gene, self.variant)
    }
}

impl fmt::Display for VariantRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} in {}", self.gene, self.variant, self.tumor_type)
    }
}

/// Normalized (gene, variant, tumor_type) key used to pair predictions with gold cases
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CaseKey {
    gene: String,
    variant: String,
    tumor_type: String,
}

impl CaseKey {
    pub fn new(gene: &str, variant: &str, tumor_type: &str) -> Self {
        Self {
            gene: gene.trim().to_lowercase(),
            variant: variant.trim().to_lowercase(),
            tumor_type: tumor_type.trim().to_lowercase(),
        }
    }
}

impl fmt::Display for CaseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.gene, self.variant, self.tumor_type)
    }
}
