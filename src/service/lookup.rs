//! Variant database lookup seam
//!
//! The lookup service itself lives outside this crate. When one is plugged
//! into the orchestrator its metadata is quoted in the prompt as evidence.

use async_trait::async_trait;

/// Metadata known about a variant in an external database
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VariantMetadata {
    /// Free-text evidence summary suitable for the prompt
    pub summary: String,
    /// Source identifiers (e.g. CIViC, ClinVar accessions)
    pub sources: Vec<String>,
}

/// Opaque `lookup(gene, variant) -> metadata | not-found` collaborator
#[async_trait]
pub trait VariantLookup: Send + Sync {
    /// `Ok(None)` means the variant is unknown to the database
    async fn lookup(&self, gene: &str, variant: &str) -> Result<Option<VariantMetadata>, String>;
}
