//! Deterministic keyword and regex matching

use regex::{Regex, RegexBuilder};
use std::collections::BTreeMap;

use crate::model::{Layer, Post, Rule, RuleKind};
use crate::ports::{ConfigError, TaxonomyError};
use crate::taxonomy::TaxonomyRegistry;

/// Confidence of every rule hit
pub const RULE_CONFIDENCE: f64 = 1.0;

/// A rule ready to run against post text
#[derive(Debug, Clone)]
pub(crate) enum CompiledRule {
    Keyword { needle: String, case_sensitive: bool },
    Regex(Regex),
}

impl CompiledRule {
    pub(crate) fn compile(rule: &Rule) -> Result<Self, regex::Error> {
        match rule.kind {
            RuleKind::Keyword => Ok(CompiledRule::Keyword {
                needle: if rule.case_sensitive {
                    rule.pattern.clone()
                } else {
                    rule.pattern.to_lowercase()
                },
                case_sensitive: rule.case_sensitive,
            }),
            RuleKind::Regex => RegexBuilder::new(&rule.pattern)
                .case_insensitive(!rule.case_sensitive)
                .build()
                .map(CompiledRule::Regex),
        }
    }

    fn is_match(&self, field: &Field<'_>) -> bool {
        match self {
            CompiledRule::Keyword {
                needle,
                case_sensitive: true,
            } => field.original.contains(needle.as_str()),
            CompiledRule::Keyword {
                needle,
                case_sensitive: false,
            } => field.lowered.contains(needle.as_str()),
            CompiledRule::Regex(regex) => regex.is_match(field.original),
        }
    }
}

/// One searchable post field, original and lowercased
struct Field<'a> {
    original: &'a str,
    lowered: String,
}

impl<'a> Field<'a> {
    fn new(original: &'a str) -> Self {
        Self {
            original,
            lowered: original.to_lowercase(),
        }
    }
}

#[derive(Debug)]
struct CompiledCategory {
    name: String,
    rules: Vec<(usize, String, CompiledRule)>,
}

/// A category matched by one of its rules
#[derive(Debug, Clone, PartialEq)]
pub struct RuleHit {
    pub category: String,
    pub confidence: f64,
    /// Index of the first rule that fired
    pub rule_index: usize,
    pub pattern: String,
}

/// Layer-scoped, multi-label rule matcher
#[derive(Debug)]
pub struct RuleMatcher {
    layers: BTreeMap<Layer, Vec<CompiledCategory>>,
}

impl RuleMatcher {
    /// Compile every rule in the registry
    pub fn new(registry: &TaxonomyRegistry) -> Result<Self, ConfigError> {
        let mut layers = BTreeMap::new();

        for (layer, categories) in registry.taxonomy().layers() {
            let mut compiled = Vec::with_capacity(categories.len());
            for category in categories {
                let mut rules = Vec::with_capacity(category.rules.len());
                for (rule_index, rule) in category.rules.iter().enumerate() {
                    let rule_compiled =
                        CompiledRule::compile(rule).map_err(|e| ConfigError::InvalidRegex {
                            layer,
                            category: category.name.clone(),
                            rule_index,
                            message: e.to_string(),
                        })?;
                    rules.push((rule_index, rule.pattern.clone(), rule_compiled));
                }
                compiled.push(CompiledCategory {
                    name: category.name.clone(),
                    rules,
                });
            }
            layers.insert(layer, compiled);
        }

        Ok(Self { layers })
    }

    /// Categories of `layer` with at least one rule matching the title or body,
    /// in taxonomy order
    pub fn match_post(&self, post: &Post, layer: Layer) -> Result<Vec<RuleHit>, TaxonomyError> {
        let categories = self
            .layers
            .get(&layer)
            .ok_or(TaxonomyError::UndefinedLayer(layer))?;

        let title = Field::new(&post.title);
        let body = Field::new(&post.body);

        let hits: Vec<RuleHit> = categories
            .iter()
            .filter_map(|category| {
                category
                    .rules
                    .iter()
                    .find(|(_, _, rule)| rule.is_match(&title) || rule.is_match(&body))
                    .map(|(rule_index, pattern, _)| RuleHit {
                        category: category.name.clone(),
                        confidence: RULE_CONFIDENCE,
                        rule_index: *rule_index,
                        pattern: pattern.clone(),
                    })
            })
            .collect();

        if !hits.is_empty() {
            tracing::debug!(
                post_id = %post.id,
                layer = %layer,
                hits = ?hits.iter().map(|h| (&h.category, &h.pattern)).collect::<Vec<_>>(),
                "Rule hits"
            );
        }

        Ok(hits)
    }
}
