//! Validated, read-only view over the loaded taxonomy

use std::collections::HashSet;

use crate::model::{CategoryDefinition, Layer, Taxonomy};
use crate::ports::{ConfigError, TaxonomyError};
use crate::usecases::rules::CompiledRule;

/// Validated taxonomy. Construction fails on the first invalid definition,
/// so holding a registry means every required layer is usable.
#[derive(Debug, Clone)]
pub struct TaxonomyRegistry {
    taxonomy: Taxonomy,
}

impl TaxonomyRegistry {
    /// Validate a taxonomy that must define every layer
    pub fn new(taxonomy: Taxonomy) -> Result<Self, ConfigError> {
        Self::with_required_layers(taxonomy, &Layer::ALL)
    }

    /// Validate a taxonomy that must define at least `required` layers.
    /// Any other layer present is validated as well.
    pub fn with_required_layers(
        taxonomy: Taxonomy,
        required: &[Layer],
    ) -> Result<Self, ConfigError> {
        for layer in required {
            if taxonomy.categories(*layer).is_none() {
                return Err(ConfigError::MissingLayer(*layer));
            }
        }

        for (layer, categories) in taxonomy.layers() {
            validate_layer(layer, categories)?;
        }

        tracing::debug!(
            taxonomy_hash = %taxonomy.hash,
            categories = taxonomy.category_count(),
            "Taxonomy validated"
        );

        Ok(Self { taxonomy })
    }

    /// Ordered categories of a layer
    pub fn categories_for(&self, layer: Layer) -> Result<&[CategoryDefinition], TaxonomyError> {
        self.taxonomy
            .categories(layer)
            .ok_or(TaxonomyError::UndefinedLayer(layer))
    }

    pub fn taxonomy(&self) -> &Taxonomy {
        &self.taxonomy
    }

    pub fn hash(&self) -> &str {
        &self.taxonomy.hash
    }

    pub fn layers(&self) -> impl Iterator<Item = Layer> + '_ {
        self.taxonomy.layers().map(|(layer, _)| layer)
    }
}

fn validate_layer(layer: Layer, categories: &[CategoryDefinition]) -> Result<(), ConfigError> {
    if categories.is_empty() {
        return Err(ConfigError::EmptyLayer(layer));
    }

    let mut names = HashSet::new();
    for category in categories {
        if category.name.trim().is_empty() {
            return Err(ConfigError::EmptyCategoryName { layer });
        }
        if !names.insert(category.name.as_str()) {
            return Err(ConfigError::DuplicateCategory {
                layer,
                category: category.name.clone(),
            });
        }
        if category.rules.is_empty() && !category.has_reference_text() {
            return Err(ConfigError::NoMatchingMechanism {
                layer,
                category: category.name.clone(),
            });
        }
        for (rule_index, rule) in category.rules.iter().enumerate() {
            if rule.pattern.is_empty() {
                return Err(ConfigError::EmptyPattern {
                    layer,
                    category: category.name.clone(),
                    rule_index,
                });
            }
            CompiledRule::compile(rule).map_err(|e| ConfigError::InvalidRegex {
                layer,
                category: category.name.clone(),
                rule_index,
                message: e.to_string(),
            })?;
        }
    }

    Ok(())
}
