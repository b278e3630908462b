//! post-classifier domain crate
//!
//! This crate contains the core domain logic following hexagonal architecture:
//! - `model`: Domain entities and value objects
//! - `ports`: Trait definitions for external dependencies (adapters)
//! - `taxonomy`: Taxonomy validation and lookup
//! - `usecases`: Rule matching, embedding similarity, hybrid classification,
//!   batch runs and coverage reporting

pub mod model;
pub mod ports;
pub mod taxonomy;
pub mod usecases;

pub use model::*;
pub use ports::*;
pub use taxonomy::TaxonomyRegistry;

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Compute a deterministic hash of a taxonomy.
/// Layers are visited in their natural order; category and rule order matter.
pub fn compute_taxonomy_hash(layers: &BTreeMap<Layer, Vec<CategoryDefinition>>) -> String {
    let mut hasher = Sha256::new();
    for (layer, categories) in layers {
        hasher.update(layer.as_str().as_bytes());
        hasher.update([0u8]);
        for category in categories {
            hasher.update(category.name.as_bytes());
            hasher.update([0u8]);
            for rule in &category.rules {
                let kind: &[u8] = match rule.kind {
                    RuleKind::Keyword => b"k",
                    RuleKind::Regex => b"r",
                };
                hasher.update(kind);
                hasher.update([u8::from(rule.case_sensitive)]);
                hasher.update(rule.pattern.as_bytes());
                hasher.update([0u8]);
            }
            if let Some(text) = &category.reference_text {
                hasher.update(text.as_bytes());
            }
            hasher.update([1u8]);
        }
    }
    format!("{:x}", hasher.finalize())
}
