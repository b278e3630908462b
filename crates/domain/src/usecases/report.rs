//! Coverage report derived from stored assignments

use std::collections::{BTreeMap, BTreeSet, HashSet};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::model::{
    Assignment, CategoryCount, ClassificationReport, CoveragePolicy, CoverageViolation, Layer,
    LayerCoverage, Method, ReportOutcome, Taxonomy,
};
use crate::ports::CoverageError;

/// Inputs a report needs besides the assignments themselves
#[derive(Debug, Clone)]
pub struct ReportContext<'a> {
    pub taxonomy: &'a Taxonomy,
    /// Posts the report covers; assignments for other posts are ignored
    pub post_ids: &'a [String],
    /// Layers left unclassified by an embedding failure, counted per layer
    pub encoding_errors: &'a BTreeMap<Layer, usize>,
    pub policy: CoveragePolicy,
    pub run_id: Uuid,
    pub generated_at: OffsetDateTime,
}

#[derive(Default)]
struct Tally<'a> {
    posts: BTreeSet<&'a str>,
    by_rule: usize,
    by_embedding: usize,
    by_both: usize,
}

/// Build the report. Pure: identical assignments and context give an
/// identical report.
pub fn build_report(assignments: &[Assignment], context: &ReportContext<'_>) -> ReportOutcome {
    let universe: HashSet<&str> = context.post_ids.iter().map(String::as_str).collect();
    let total_posts = universe.len();

    let mut tallies: BTreeMap<(Layer, &str), Tally<'_>> = BTreeMap::new();
    let mut layer_posts: BTreeMap<Layer, BTreeSet<&str>> = BTreeMap::new();
    let mut classified: BTreeSet<&str> = BTreeSet::new();

    for assignment in assignments {
        if !universe.contains(assignment.post_id.as_str()) {
            continue;
        }
        let known = context
            .taxonomy
            .categories(assignment.layer)
            .is_some_and(|categories| categories.iter().any(|c| c.name == assignment.category));
        if !known {
            tracing::debug!(
                post_id = %assignment.post_id,
                layer = %assignment.layer,
                category = %assignment.category,
                "Ignoring assignment to a category outside the taxonomy"
            );
            continue;
        }

        let tally = tallies
            .entry((assignment.layer, assignment.category.as_str()))
            .or_default();
        if tally.posts.insert(assignment.post_id.as_str()) {
            match assignment.method {
                Method::Rule => tally.by_rule += 1,
                Method::Embedding => tally.by_embedding += 1,
                Method::Both => tally.by_both += 1,
            }
        }
        layer_posts
            .entry(assignment.layer)
            .or_default()
            .insert(assignment.post_id.as_str());
        classified.insert(assignment.post_id.as_str());
    }

    let mut violations = Vec::new();
    if classified.len() < context.policy.min_total_posts {
        violations.push(CoverageViolation::InsufficientClassifiedPosts {
            classified: classified.len(),
            required: context.policy.min_total_posts,
        });
    }

    let mut sorted_ids: Vec<&str> = universe.iter().copied().collect();
    sorted_ids.sort_unstable();

    let mut layers = Vec::new();
    for (layer, definitions) in context.taxonomy.layers() {
        let assigned = layer_posts.remove(&layer).unwrap_or_default();

        let categories = definitions
            .iter()
            .map(|definition| {
                let tally = tallies
                    .remove(&(layer, definition.name.as_str()))
                    .unwrap_or_default();
                let posts = tally.posts.len();
                let below = posts < context.policy.min_category_posts;
                if below {
                    violations.push(CoverageViolation::BelowMinimumSupport {
                        layer,
                        category: definition.name.clone(),
                        posts,
                        required: context.policy.min_category_posts,
                    });
                }
                CategoryCount {
                    name: definition.name.clone(),
                    posts,
                    by_rule: tally.by_rule,
                    by_embedding: tally.by_embedding,
                    by_both: tally.by_both,
                    below_minimum_support: below,
                }
            })
            .collect();

        let unclassified_post_ids = sorted_ids
            .iter()
            .filter(|id| !assigned.contains(*id))
            .map(|id| id.to_string())
            .collect();

        layers.push(LayerCoverage {
            layer,
            assigned_posts: assigned.len(),
            coverage: if total_posts == 0 {
                0.0
            } else {
                assigned.len() as f64 / total_posts as f64
            },
            encoding_errors: context.encoding_errors.get(&layer).copied().unwrap_or(0),
            categories,
            unclassified_post_ids,
        });
    }

    let coverage_error = if violations.is_empty() {
        None
    } else {
        Some(CoverageError {
            violations: violations.clone(),
        })
    };

    ReportOutcome {
        report: ClassificationReport {
            version: ClassificationReport::SCHEMA_VERSION.to_string(),
            run_id: context.run_id,
            generated_at: context.generated_at,
            taxonomy_hash: context.taxonomy.hash.clone(),
            total_posts,
            classified_posts: classified.len(),
            layers,
            violations,
        },
        coverage_error,
    }
}
