//! Clinical actionability assessment of cancer variants
//!
//! Normalizes free-form LLM answers into tiered assessment records, runs
//! them in bounded batches and scores them against a gold standard.

pub mod app;
pub mod model;
pub mod service;
