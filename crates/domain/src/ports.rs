//! Port definitions (traits) for external dependencies
//!
//! These traits define the boundaries between the domain and external systems.
//! Adapters implement these traits to connect to real infrastructure.

use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;

use crate::model::{Assignment, CoverageViolation, Layer, Post, ReportOutcome, Taxonomy};
use crate::usecases::report::{ReportContext, build_report};

/// Fatal error in taxonomy configuration, raised before any post is classified
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error in {file}: {message}")]
    Parse { file: String, message: String },
    #[error("Unknown layer '{0}'")]
    UnknownLayer(String),
    #[error("Layer {0} is missing from the taxonomy")]
    MissingLayer(Layer),
    #[error("Layer {0} has no categories")]
    EmptyLayer(Layer),
    #[error("Layer {layer} has a category with an empty name")]
    EmptyCategoryName { layer: Layer },
    #[error("Duplicate category '{category}' in layer {layer}")]
    DuplicateCategory { layer: Layer, category: String },
    #[error("Category {layer}/{category} defines neither rules nor a reference text")]
    NoMatchingMechanism { layer: Layer, category: String },
    #[error("Category {layer}/{category} has an empty pattern in rule {rule_index}")]
    EmptyPattern {
        layer: Layer,
        category: String,
        rule_index: usize,
    },
    #[error("Category {layer}/{category} has an invalid regex in rule {rule_index}: {message}")]
    InvalidRegex {
        layer: Layer,
        category: String,
        rule_index: usize,
        message: String,
    },
    #[error("Similarity threshold {0} is outside [0, 1]")]
    InvalidThreshold(f64),
}

/// Fatal error raised when a run references a layer the registry does not hold
#[derive(Debug, Error)]
pub enum TaxonomyError {
    #[error("Layer {0} is not defined in the taxonomy")]
    UndefinedLayer(Layer),
    #[error("Layer {layer} is not defined in the taxonomy (while classifying post {post_id})")]
    UndefinedLayerForPost { layer: Layer, post_id: String },
}

/// Recoverable failure of the embedding capability
#[derive(Debug, Clone, Error)]
pub enum EncodingError {
    #[error("Embedding capability unavailable: {0}")]
    Unavailable(String),
    #[error("Embedding API error: {0}")]
    Api(String),
    #[error("Invalid embedding response: {0}")]
    InvalidFormat(String),
    #[error("Rate limited")]
    RateLimited,
    #[error("Timeout")]
    Timeout,
    #[error("Embedding dimension {actual} does not match index dimension {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("Empty embedding returned")]
    Empty,
}

impl EncodingError {
    /// Whether another attempt could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EncodingError::Api(_) | EncodingError::RateLimited | EncodingError::Timeout
        )
    }
}

/// Non-fatal: the report was produced but corpus invariants are unmet
#[derive(Debug, Clone, Error)]
#[error("Coverage invariants unmet ({} violation(s)): {}", .violations.len(), summarize(.violations))]
pub struct CoverageError {
    pub violations: Vec<CoverageViolation>,
}

fn summarize(violations: &[CoverageViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Error type for loading posts
#[derive(Debug, Error)]
pub enum PostsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error in {file} at {location}: {message}")]
    Parse {
        file: String,
        location: String,
        message: String,
    },
    #[error("Post {post_id} has an empty tag set")]
    EmptyTags { post_id: String },
    #[error("Duplicate post id '{0}'")]
    DuplicateId(String),
}

/// Port for loading the taxonomy document
#[async_trait]
pub trait TaxonomySource: Send + Sync {
    /// Load the taxonomy from the configured source
    async fn load(&self) -> Result<Taxonomy, ConfigError>;
}

/// Port for loading preprocessed posts
#[async_trait]
pub trait PostSource: Send + Sync {
    async fn load_posts(&self) -> Result<Vec<Post>, PostsError>;
}

/// Port for the external embedding capability.
/// Implementations must be deterministic for identical input.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a single text into a fixed-dimension vector
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EncodingError>;

    /// Embed several texts at once. Output order matches input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EncodingError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }

    /// Provider name for logs
    fn provider(&self) -> &'static str;
}

/// Error type for classification store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Port for persisting assignments
#[async_trait]
pub trait ClassificationStore: Send + Sync {
    /// Idempotent upsert keyed by (post id, layer, category)
    async fn record(&self, assignment: &Assignment) -> Result<(), StoreError>;

    /// Replace every stored assignment of a post with a freshly computed set
    async fn replace_post(
        &self,
        post_id: &str,
        assignments: &[Assignment],
    ) -> Result<(), StoreError>;

    /// All stored assignments, ordered by key
    async fn assignments(&self) -> Result<Vec<Assignment>, StoreError>;

    /// Derive the coverage report from the stored assignments
    async fn report(&self, context: &ReportContext<'_>) -> Result<ReportOutcome, StoreError> {
        let assignments = self.assignments().await?;
        Ok(build_report(&assignments, context))
    }
}

/// Port for time/clock operations (enables deterministic testing)
pub trait Clock: Send + Sync {
    /// Get the current time
    fn now(&self) -> OffsetDateTime;
}

/// Real clock implementation
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}
