//! Application use cases / business logic

pub mod classify;
pub mod embedding;
pub mod report;
pub mod rules;
pub mod run;

pub use classify::{ClassifyConfig, HybridClassifier, MergePolicy};
pub use embedding::{EmbeddingConfig, EmbeddingIndex, Similarity, cosine_similarity};
pub use report::{ReportContext, build_report};
pub use rules::{RULE_CONFIDENCE, RuleHit, RuleMatcher};
pub use run::{ClassificationRun, RunConfig, RunError, RunSummary};
