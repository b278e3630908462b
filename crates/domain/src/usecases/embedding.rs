//! Reference embeddings, post-embedding cache and cosine ranking

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::Semaphore;

use crate::model::{Layer, Post};
use crate::ports::{Embedder, EncodingError};
use crate::taxonomy::TaxonomyRegistry;

/// Limits applied to calls into the embedding capability
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    /// Per-call timeout
    pub timeout: Duration,
    /// Extra attempts after a retryable failure
    pub retries: u32,
    /// Maximum concurrent calls in flight
    pub max_in_flight: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            retries: 1,
            max_in_flight: 4,
        }
    }
}

/// Similarity of a post to one category's reference text
#[derive(Debug, Clone, PartialEq)]
pub struct Similarity {
    pub category: String,
    /// max(0, cosine similarity)
    pub confidence: f64,
}

#[derive(Debug)]
struct ReferenceEmbedding {
    category: String,
    vector: Vec<f32>,
}

/// Per-run embedding state. Reference vectors are fixed at build time; post
/// vectors are cached write-once by post id and shared by every layer.
/// `references` holds an entry only for layers whose taxonomy defines at
/// least one reference text; the entry is empty when none could be embedded.
pub struct EmbeddingIndex {
    embedder: Arc<dyn Embedder>,
    config: EmbeddingConfig,
    references: BTreeMap<Layer, Vec<ReferenceEmbedding>>,
    missing_references: Vec<(Layer, String)>,
    dimension: Option<usize>,
    cache: RwLock<HashMap<String, Arc<Vec<f32>>>>,
    permits: Semaphore,
}

impl EmbeddingIndex {
    /// Embed the reference text of every category that has one.
    /// Categories whose reference text cannot be embedded are logged and left
    /// out of similarity ranking.
    pub async fn build(
        registry: &TaxonomyRegistry,
        embedder: Arc<dyn Embedder>,
        config: EmbeddingConfig,
    ) -> Self {
        let mut index = Self {
            embedder,
            permits: Semaphore::new(config.max_in_flight.max(1)),
            config,
            references: BTreeMap::new(),
            missing_references: Vec::new(),
            dimension: None,
            cache: RwLock::new(HashMap::new()),
        };

        for (layer, categories) in registry.taxonomy().layers() {
            if !categories.iter().any(|category| category.has_reference_text()) {
                continue;
            }
            let mut layer_refs = Vec::new();
            for category in categories {
                let Some(text) = category.reference_text.as_deref() else {
                    continue;
                };
                if text.trim().is_empty() {
                    continue;
                }

                let result = index
                    .embed_with_retry(text)
                    .await
                    .and_then(|vector| index.check_dimension(&vector).map(|_| vector));

                match result {
                    Ok(vector) => {
                        if index.dimension.is_none() {
                            index.dimension = Some(vector.len());
                        }
                        layer_refs.push(ReferenceEmbedding {
                            category: category.name.clone(),
                            vector,
                        });
                    }
                    Err(error) => {
                        tracing::warn!(
                            layer = %layer,
                            category = %category.name,
                            error = %error,
                            "Failed to embed reference text; category excluded from similarity ranking"
                        );
                        index
                            .missing_references
                            .push((layer, category.name.clone()));
                    }
                }
            }
            index.references.insert(layer, layer_refs);
        }

        tracing::info!(
            provider = index.embedder.provider(),
            references = index.references.values().map(Vec::len).sum::<usize>(),
            missing = index.missing_references.len(),
            dimension = ?index.dimension,
            "Built embedding index"
        );

        index
    }

    /// Categories with a reference text that could not be embedded
    pub fn missing_references(&self) -> &[(Layer, String)] {
        &self.missing_references
    }

    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    pub fn is_cached(&self, post_id: &str) -> bool {
        self.cache
            .read()
            .map(|cache| cache.contains_key(post_id))
            .unwrap_or(false)
    }

    /// Rank `layer`'s categories by similarity to the post, highest first,
    /// ties broken by category name.
    ///
    /// A layer without reference texts ranks nothing. A layer whose reference
    /// texts all failed to embed cannot be ranked and yields
    /// [`EncodingError::Unavailable`].
    pub async fn classify(
        &self,
        post: &Post,
        layer: Layer,
    ) -> Result<Vec<Similarity>, EncodingError> {
        let Some(references) = self.references.get(&layer) else {
            return Ok(Vec::new());
        };
        let vector = self.post_embedding(post).await?;
        if references.is_empty() {
            return Err(EncodingError::Unavailable(format!(
                "no reference embeddings for layer {}",
                layer
            )));
        }
        Ok(self.rank(layer, &vector))
    }

    /// Whether the taxonomy gives any category of `layer` a reference text
    pub fn has_references(&self, layer: Layer) -> bool {
        self.references.contains_key(&layer)
    }

    /// Rank `layer`'s categories against an already computed vector
    pub fn rank(&self, layer: Layer, vector: &[f32]) -> Vec<Similarity> {
        let Some(references) = self.references.get(&layer) else {
            return Vec::new();
        };

        let mut ranked: Vec<Similarity> = references
            .iter()
            .map(|reference| Similarity {
                category: reference.category.clone(),
                confidence: cosine_similarity(vector, &reference.vector).clamp(0.0, 1.0),
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then_with(|| a.category.cmp(&b.category))
        });
        ranked
    }

    /// Cached embedding of a post, computing it on first use
    pub async fn post_embedding(&self, post: &Post) -> Result<Arc<Vec<f32>>, EncodingError> {
        if let Some(vector) = self.cached(&post.id) {
            return Ok(vector);
        }

        let vector = match &post.embedding {
            Some(precomputed) => precomputed.clone(),
            None => self.embed_with_retry(&post.embedding_text()).await?,
        };
        self.check_dimension(&vector)?;

        Ok(self.insert_once(&post.id, vector))
    }

    /// Embed every uncached post in one batch call. A failed batch is logged
    /// and left to lazy per-post embedding.
    pub async fn prefetch(&self, posts: &[&Post]) {
        let mut seen = HashSet::new();
        let pending: Vec<&Post> = posts
            .iter()
            .copied()
            .filter(|post| seen.insert(post.id.as_str()))
            .filter(|post| !self.is_cached(&post.id))
            .collect();

        for post in pending.iter().filter(|post| post.embedding.is_some()) {
            if let Err(error) = self.post_embedding(post).await {
                tracing::warn!(post_id = %post.id, error = %error, "Invalid precomputed embedding");
            }
        }

        let to_embed: Vec<&Post> = pending
            .into_iter()
            .filter(|post| post.embedding.is_none())
            .collect();
        if to_embed.is_empty() {
            return;
        }

        let texts: Vec<String> = to_embed.iter().map(|post| post.embedding_text()).collect();
        let result = match self.permits.acquire().await {
            Ok(_permit) => {
                tokio::time::timeout(self.config.timeout, self.embedder.embed_batch(&texts)).await
            }
            Err(_) => return,
        };

        match result {
            Ok(Ok(vectors)) if vectors.len() == to_embed.len() => {
                for (post, vector) in to_embed.iter().zip(vectors) {
                    if self.check_dimension(&vector).is_ok() {
                        self.insert_once(&post.id, vector);
                    }
                }
                tracing::debug!(count = to_embed.len(), "Prefetched post embeddings");
            }
            Ok(Ok(vectors)) => {
                tracing::warn!(
                    expected = to_embed.len(),
                    actual = vectors.len(),
                    "Batch embedding returned wrong number of vectors"
                );
            }
            Ok(Err(error)) => {
                tracing::warn!(error = %error, "Batch embedding failed, falling back to per-post calls");
            }
            Err(_) => {
                tracing::warn!("Batch embedding timed out, falling back to per-post calls");
            }
        }
    }

    fn cached(&self, post_id: &str) -> Option<Arc<Vec<f32>>> {
        self.cache
            .read()
            .ok()
            .and_then(|cache| cache.get(post_id).cloned())
    }

    /// Atomic check-and-set: the first write for a key wins
    fn insert_once(&self, post_id: &str, vector: Vec<f32>) -> Arc<Vec<f32>> {
        let vector = Arc::new(vector);
        match self.cache.write() {
            Ok(mut cache) => Arc::clone(
                cache
                    .entry(post_id.to_string())
                    .or_insert_with(|| Arc::clone(&vector)),
            ),
            // A poisoned cache only loses memoization
            Err(_) => vector,
        }
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<(), EncodingError> {
        if vector.is_empty() {
            return Err(EncodingError::Empty);
        }
        if let Some(position) = vector.iter().position(|x| !x.is_finite()) {
            return Err(EncodingError::InvalidFormat(format!(
                "non-finite component at index {}",
                position
            )));
        }
        match self.dimension {
            Some(expected) if expected != vector.len() => Err(EncodingError::DimensionMismatch {
                expected,
                actual: vector.len(),
            }),
            _ => Ok(()),
        }
    }

    async fn embed_with_retry(&self, text: &str) -> Result<Vec<f32>, EncodingError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| EncodingError::Unavailable(e.to_string()))?;

        let mut last_error = EncodingError::Timeout;
        for attempt in 0..=self.config.retries {
            if attempt > 0 {
                tracing::warn!(attempt = attempt, error = %last_error, "Retrying embedding");
            }

            match tokio::time::timeout(self.config.timeout, self.embedder.embed(text)).await {
                Ok(Ok(vector)) => return Ok(vector),
                Ok(Err(error)) => {
                    let retryable = error.is_retryable();
                    last_error = error;
                    if !retryable {
                        break;
                    }
                }
                Err(_) => last_error = EncodingError::Timeout,
            }
        }

        Err(last_error)
    }
}

/// Cosine similarity in [-1, 1]. Mismatched or zero-magnitude vectors give 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0)
}
