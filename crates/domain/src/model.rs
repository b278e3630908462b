//! Domain models and value objects

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::compute_taxonomy_hash;
use crate::ports::{ConfigError, CoverageError};

/// An independent taxonomy dimension along which posts are classified
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Layer {
    #[serde(alias = "question_type")]
    QuestionType,
    #[serde(alias = "technical_domain")]
    TechnicalDomain,
    #[serde(alias = "tool_stack")]
    ToolStack,
}

impl Layer {
    pub const ALL: [Layer; 3] = [Layer::QuestionType, Layer::TechnicalDomain, Layer::ToolStack];

    pub fn as_str(&self) -> &'static str {
        match self {
            Layer::QuestionType => "QuestionType",
            Layer::TechnicalDomain => "TechnicalDomain",
            Layer::ToolStack => "ToolStack",
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Layer {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "QuestionType" | "question_type" => Ok(Layer::QuestionType),
            "TechnicalDomain" | "technical_domain" => Ok(Layer::TechnicalDomain),
            "ToolStack" | "tool_stack" => Ok(Layer::ToolStack),
            other => Err(ConfigError::UnknownLayer(other.to_string())),
        }
    }
}

/// A preprocessed forum post. Read-only to the classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    /// Post identifier (numeric ids are normalized to strings)
    #[serde(alias = "question_id", deserialize_with = "deserialize_post_id")]
    pub id: String,
    /// Question title
    pub title: String,
    /// Cleaned body text (markup, code, and URLs already stripped)
    pub body: String,
    /// Tag set, never empty
    pub tags: BTreeSet<String>,
    /// Accepted answers in order
    #[serde(default)]
    pub answers: Vec<String>,
    /// Precomputed embedding, if the preprocessing stage supplied one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl Post {
    /// Text submitted to the embedding capability for this post
    pub fn embedding_text(&self) -> String {
        format!("{}\n\n{}", self.title, self.body)
    }
}

fn deserialize_post_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Number(u64),
        Text(String),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Number(n) => n.to_string(),
        RawId::Text(s) => s,
    })
}

/// How a rule pattern is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    /// Plain substring test
    Keyword,
    /// Regular expression
    Regex,
}

/// A single deterministic matching rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub kind: RuleKind,
    pub pattern: String,
    #[serde(default)]
    pub case_sensitive: bool,
}

impl Rule {
    pub fn keyword(pattern: impl Into<String>) -> Self {
        Self {
            kind: RuleKind::Keyword,
            pattern: pattern.into(),
            case_sensitive: false,
        }
    }

    pub fn regex(pattern: impl Into<String>) -> Self {
        Self {
            kind: RuleKind::Regex,
            pattern: pattern.into(),
            case_sensitive: false,
        }
    }
}

/// A category within one taxonomy layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryDefinition {
    /// Name, unique within its layer
    pub name: String,
    /// Ordered rules; any hit matches the category
    #[serde(default)]
    pub rules: Vec<Rule>,
    /// Canonical description used for embedding comparison
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_text: Option<String>,
}

impl CategoryDefinition {
    pub fn has_reference_text(&self) -> bool {
        self.reference_text
            .as_deref()
            .is_some_and(|text| !text.trim().is_empty())
    }
}

/// Category definitions for every layer, with a content hash
#[derive(Debug, Clone)]
pub struct Taxonomy {
    layers: BTreeMap<Layer, Vec<CategoryDefinition>>,
    /// SHA-256 over layers, categories, rules and reference texts
    pub hash: String,
}

impl Taxonomy {
    /// Create a taxonomy, computing its hash. Category order is preserved.
    pub fn new(layers: BTreeMap<Layer, Vec<CategoryDefinition>>) -> Self {
        let hash = compute_taxonomy_hash(&layers);
        Self { layers, hash }
    }

    pub fn categories(&self, layer: Layer) -> Option<&[CategoryDefinition]> {
        self.layers.get(&layer).map(Vec::as_slice)
    }

    pub fn layers(&self) -> impl Iterator<Item = (Layer, &[CategoryDefinition])> {
        self.layers.iter().map(|(layer, defs)| (*layer, defs.as_slice()))
    }

    pub fn category_count(&self) -> usize {
        self.layers.values().map(Vec::len).sum()
    }
}

/// Which strategy produced an assignment
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Method {
    Rule,
    Embedding,
    /// A rule hit that the embedding ranking also put first
    Both,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Rule => "Rule",
            Method::Embedding => "Embedding",
            Method::Both => "Both",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Rule" => Ok(Method::Rule),
            "Embedding" => Ok(Method::Embedding),
            "Both" => Ok(Method::Both),
            other => Err(format!("unknown method '{}'", other)),
        }
    }
}

/// Upsert key of an assignment
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AssignmentKey {
    pub post_id: String,
    pub layer: Layer,
    pub category: String,
}

/// A post placed into one category of one layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub post_id: String,
    pub layer: Layer,
    pub category: String,
    pub method: Method,
    /// Confidence in [0, 1]; exactly 1.0 for rule hits
    pub confidence: f64,
    #[serde(with = "time::serde::rfc3339")]
    pub assigned_at: OffsetDateTime,
}

impl Assignment {
    pub fn key(&self) -> AssignmentKey {
        AssignmentKey {
            post_id: self.post_id.clone(),
            layer: self.layer,
            category: self.category.clone(),
        }
    }
}

/// Why a layer ended without an assignment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum UnclassifiedReason {
    /// No rule hit and no category cleared the similarity threshold
    NoMatch {
        best_category: Option<String>,
        best_confidence: Option<f64>,
    },
    /// The embedding capability failed for this post
    EncodingFailed { message: String },
}

/// Terminal state of one (post, layer) pair
#[derive(Debug, Clone, PartialEq)]
pub enum LayerState {
    Assigned(Vec<Assignment>),
    Unclassified(UnclassifiedReason),
}

impl LayerState {
    pub fn assignments(&self) -> &[Assignment] {
        match self {
            LayerState::Assigned(assignments) => assignments,
            LayerState::Unclassified(_) => &[],
        }
    }

    pub fn is_assigned(&self) -> bool {
        matches!(self, LayerState::Assigned(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayerOutcome {
    pub layer: Layer,
    pub state: LayerState,
}

/// Classification of one post across every configured layer
#[derive(Debug, Clone, PartialEq)]
pub struct PostClassification {
    pub post_id: String,
    pub layers: Vec<LayerOutcome>,
}

impl PostClassification {
    pub fn assignments(&self) -> impl Iterator<Item = &Assignment> {
        self.layers
            .iter()
            .flat_map(|outcome| outcome.state.assignments())
    }

    /// Layers that fell back to Unclassified because embedding failed
    pub fn encoding_failures(&self) -> impl Iterator<Item = Layer> + '_ {
        self.layers.iter().filter_map(|outcome| match &outcome.state {
            LayerState::Unclassified(UnclassifiedReason::EncodingFailed { .. }) => {
                Some(outcome.layer)
            }
            _ => None,
        })
    }

    pub fn state(&self, layer: Layer) -> Option<&LayerState> {
        self.layers
            .iter()
            .find(|outcome| outcome.layer == layer)
            .map(|outcome| &outcome.state)
    }
}

/// Corpus-level minimum support thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoveragePolicy {
    pub min_total_posts: usize,
    pub min_category_posts: usize,
}

impl Default for CoveragePolicy {
    fn default() -> Self {
        Self {
            min_total_posts: 100,
            min_category_posts: 10,
        }
    }
}

/// A corpus invariant that the report did not meet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CoverageViolation {
    InsufficientClassifiedPosts {
        classified: usize,
        required: usize,
    },
    BelowMinimumSupport {
        layer: Layer,
        category: String,
        posts: usize,
        required: usize,
    },
}

impl fmt::Display for CoverageViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoverageViolation::InsufficientClassifiedPosts {
                classified,
                required,
            } => write!(
                f,
                "{} classified posts, at least {} required",
                classified, required
            ),
            CoverageViolation::BelowMinimumSupport {
                layer,
                category,
                posts,
                required,
            } => write!(
                f,
                "{}/{} has {} posts, below minimum support of {}",
                layer, category, posts, required
            ),
        }
    }
}

/// Post count for one category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryCount {
    pub name: String,
    pub posts: usize,
    pub by_rule: usize,
    pub by_embedding: usize,
    pub by_both: usize,
    pub below_minimum_support: bool,
}

/// Coverage of one layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerCoverage {
    pub layer: Layer,
    /// Distinct posts with at least one assignment in this layer
    pub assigned_posts: usize,
    /// assigned_posts / total_posts
    pub coverage: f64,
    pub encoding_errors: usize,
    pub categories: Vec<CategoryCount>,
    pub unclassified_post_ids: Vec<String>,
}

/// Aggregate report derived from stored assignments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationReport {
    pub version: String,
    pub run_id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub generated_at: OffsetDateTime,
    pub taxonomy_hash: String,
    pub total_posts: usize,
    /// Distinct posts with at least one assignment in any layer
    pub classified_posts: usize,
    pub layers: Vec<LayerCoverage>,
    pub violations: Vec<CoverageViolation>,
}

impl ClassificationReport {
    pub const SCHEMA_VERSION: &'static str = "1";

    pub fn layer(&self, layer: Layer) -> Option<&LayerCoverage> {
        self.layers.iter().find(|coverage| coverage.layer == layer)
    }
}

/// A report together with the coverage violation it raised, if any
#[derive(Debug, Clone)]
pub struct ReportOutcome {
    pub report: ClassificationReport,
    pub coverage_error: Option<CoverageError>,
}
