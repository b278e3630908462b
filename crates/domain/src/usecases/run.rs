//! Batch classification run: classifies a corpus with bounded concurrency and
//! persists each post's assignments

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::watch;

use crate::{
    model::{Assignment, Layer, Post, PostClassification},
    ports::{ClassificationStore, StoreError, TaxonomyError},
    usecases::classify::HybridClassifier,
};

/// Configuration for a classification run
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Maximum posts classified concurrently
    pub max_concurrent: usize,
    /// Posts per batch; cancellation is checked between batches
    pub batch_size: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            batch_size: 64,
        }
    }
}

/// What a run did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub processed_posts: usize,
    pub assigned_layers: usize,
    pub unclassified_layers: usize,
    pub encoding_errors: BTreeMap<Layer, usize>,
    /// Whether the run stopped early on a cancellation request
    pub cancelled: bool,
    /// Ids of processed posts, in input order
    pub post_ids: Vec<String>,
}

impl RunSummary {
    fn absorb(&mut self, classification: &PostClassification) {
        self.processed_posts += 1;
        for outcome in &classification.layers {
            if outcome.state.is_assigned() {
                self.assigned_layers += 1;
            } else {
                self.unclassified_layers += 1;
            }
        }
        for layer in classification.encoding_failures() {
            *self.encoding_errors.entry(layer).or_insert(0) += 1;
        }
    }
}

/// Errors that abort a run
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Taxonomy(#[from] TaxonomyError),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Run orchestrator
pub struct ClassificationRun<St>
where
    St: ClassificationStore + ?Sized,
{
    classifier: Arc<HybridClassifier>,
    store: Arc<St>,
    config: RunConfig,
}

impl<St> ClassificationRun<St>
where
    St: ClassificationStore + ?Sized,
{
    pub fn new(classifier: Arc<HybridClassifier>, store: Arc<St>, config: RunConfig) -> Self {
        Self {
            classifier,
            store,
            config,
        }
    }

    /// Classify every post and replace its stored assignments. Stops between
    /// batches once `cancel` reads true; posts already classified stay stored.
    pub async fn execute(
        &self,
        posts: &[Post],
        cancel: watch::Receiver<bool>,
    ) -> Result<RunSummary, RunError> {
        let mut summary = RunSummary::default();
        let batch_size = self.config.batch_size.max(1);
        let batches = posts.len().div_ceil(batch_size);

        tracing::info!(
            posts = posts.len(),
            batches,
            max_concurrent = self.config.max_concurrent,
            "Starting classification run"
        );

        for (batch_index, batch) in posts.chunks(batch_size).enumerate() {
            if *cancel.borrow() {
                tracing::warn!(
                    processed = summary.processed_posts,
                    remaining = posts.len() - summary.processed_posts,
                    "Run cancelled"
                );
                summary.cancelled = true;
                break;
            }

            let needing: Vec<&Post> = batch
                .iter()
                .filter(|post| self.classifier.needs_embedding(post))
                .collect();
            if !needing.is_empty() {
                self.classifier.index().prefetch(&needing).await;
            }

            let mut classified = self.process_batch(batch).await?;
            classified.sort_by_key(|(position, _)| *position);
            for (_, classification) in classified {
                summary.absorb(&classification);
                summary.post_ids.push(classification.post_id);
            }

            tracing::info!(
                batch = batch_index + 1,
                batches,
                processed = summary.processed_posts,
                "Batch complete"
            );
        }

        Ok(summary)
    }

    /// Classify one batch with bounded concurrency
    async fn process_batch(
        &self,
        batch: &[Post],
    ) -> Result<Vec<(usize, PostClassification)>, RunError> {
        let max_concurrent = self.config.max_concurrent.max(1);
        let mut results = Vec::with_capacity(batch.len());
        let mut tasks: FuturesUnordered<BoxFuture<'_, Result<(usize, PostClassification), RunError>>> =
            FuturesUnordered::new();
        let mut posts_iter = batch.iter().enumerate();

        while tasks.len() < max_concurrent {
            let Some((position, post)) = posts_iter.next() else {
                break;
            };
            tasks.push(Box::pin(async move {
                Ok((position, self.process_post(post).await?))
            }));
        }

        while let Some(result) = tasks.next().await {
            results.push(result?);
            while tasks.len() < max_concurrent {
                let Some((position, post)) = posts_iter.next() else {
                    break;
                };
                tasks.push(Box::pin(async move {
                    Ok((position, self.process_post(post).await?))
                }));
            }
        }

        Ok(results)
    }

    async fn process_post(&self, post: &Post) -> Result<PostClassification, RunError> {
        let classification = self.classifier.classify(post).await?;
        let assignments: Vec<Assignment> = classification.assignments().cloned().collect();
        self.store.replace_post(&post.id, &assignments).await?;
        Ok(classification)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AssignmentKey, CategoryDefinition, Rule, Taxonomy};
    use crate::ports::{Clock, Embedder, EncodingError};
    use crate::taxonomy::TaxonomyRegistry;
    use crate::usecases::classify::ClassifyConfig;
    use crate::usecases::embedding::{EmbeddingConfig, EmbeddingIndex};
    use crate::usecases::rules::RuleMatcher;
    use async_trait::async_trait;
    use std::collections::BTreeSet;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use time::OffsetDateTime;
    use time::macros::datetime;

    struct FakeClock;

    impl Clock for FakeClock {
        fn now(&self) -> OffsetDateTime {
            datetime!(2024-05-01 12:00 UTC)
        }
    }

    /// Embeds texts containing "tokens" next to the Tokenization reference;
    /// fails on texts containing "offline"
    struct KeywordEmbedder {
        batch_calls: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for KeywordEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, EncodingError> {
            if text.contains("offline") {
                Err(EncodingError::Unavailable("offline".to_string()))
            } else if text.contains("tokens") {
                Ok(vec![1.0, 0.0])
            } else {
                Ok(vec![0.0, 1.0])
            }
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EncodingError> {
            self.batch_calls.fetch_add(1, Ordering::SeqCst);
            let mut vectors = Vec::with_capacity(texts.len());
            for text in texts {
                vectors.push(self.embed(text).await?);
            }
            Ok(vectors)
        }

        fn provider(&self) -> &'static str {
            "keyword"
        }
    }

    #[derive(Default)]
    struct FakeStore {
        assignments: Mutex<BTreeMap<AssignmentKey, Assignment>>,
        writes: AtomicUsize,
        fail: bool,
        cancel_after_first_write: Option<watch::Sender<bool>>,
    }

    #[async_trait]
    impl ClassificationStore for FakeStore {
        async fn record(&self, assignment: &Assignment) -> Result<(), StoreError> {
            self.assignments
                .lock()
                .unwrap()
                .insert(assignment.key(), assignment.clone());
            Ok(())
        }

        async fn replace_post(
            &self,
            post_id: &str,
            assignments: &[Assignment],
        ) -> Result<(), StoreError> {
            if self.fail {
                return Err(StoreError::Database("disk full".to_string()));
            }
            self.writes.fetch_add(1, Ordering::SeqCst);
            if let Some(sender) = &self.cancel_after_first_write {
                let _ = sender.send(true);
            }
            let mut stored = self.assignments.lock().unwrap();
            stored.retain(|key, _| key.post_id != post_id);
            for assignment in assignments {
                stored.insert(assignment.key(), assignment.clone());
            }
            Ok(())
        }

        async fn assignments(&self) -> Result<Vec<Assignment>, StoreError> {
            Ok(self.assignments.lock().unwrap().values().cloned().collect())
        }
    }

    fn post(id: &str, title: &str) -> Post {
        Post {
            id: id.to_string(),
            title: title.to_string(),
            body: String::new(),
            tags: BTreeSet::from(["nlp".to_string()]),
            answers: vec![],
            embedding: None,
        }
    }

    async fn classifier(embedder: Arc<KeywordEmbedder>) -> Arc<HybridClassifier> {
        let definition = |name: &str, rules: Vec<Rule>, reference: Option<&str>| {
            CategoryDefinition {
                name: name.to_string(),
                rules,
                reference_text: reference.map(str::to_string),
            }
        };
        let mut layers = BTreeMap::new();
        layers.insert(
            Layer::QuestionType,
            vec![definition("Implementation", vec![Rule::keyword("how to")], None)],
        );
        layers.insert(
            Layer::TechnicalDomain,
            vec![definition("Tokenization", vec![], Some("tokens"))],
        );
        layers.insert(
            Layer::ToolStack,
            vec![definition("spaCy", vec![Rule::keyword("spacy")], None)],
        );
        let registry = Arc::new(TaxonomyRegistry::new(Taxonomy::new(layers)).unwrap());
        let rules = RuleMatcher::new(&registry).unwrap();
        let index = EmbeddingIndex::build(&registry, embedder, EmbeddingConfig::default()).await;
        Arc::new(HybridClassifier::new(
            registry,
            rules,
            index,
            Arc::new(FakeClock),
            ClassifyConfig::default(),
        ))
    }

    fn corpus() -> Vec<Post> {
        vec![
            post("1", "How to split tokens with spaCy"),
            post("2", "Counting tokens"),
            post("3", "Unrelated question"),
            post("4", "Running offline"),
        ]
    }

    #[tokio::test]
    async fn test_run_classifies_and_stores_every_post() {
        let embedder = Arc::new(KeywordEmbedder {
            batch_calls: AtomicUsize::new(0),
        });
        let store = Arc::new(FakeStore::default());
        let run = ClassificationRun::new(
            classifier(Arc::clone(&embedder)).await,
            Arc::clone(&store),
            RunConfig {
                max_concurrent: 2,
                batch_size: 10,
            },
        );
        let (_tx, rx) = watch::channel(false);

        let summary = run.execute(&corpus(), rx).await.unwrap();

        assert_eq!(summary.processed_posts, 4);
        assert_eq!(summary.post_ids, vec!["1", "2", "3", "4"]);
        assert!(!summary.cancelled);
        assert_eq!(summary.encoding_errors.get(&Layer::TechnicalDomain), Some(&1));
        assert_eq!(summary.assigned_layers + summary.unclassified_layers, 12);
        assert_eq!(store.writes.load(Ordering::SeqCst), 4);
        assert_eq!(embedder.batch_calls.load(Ordering::SeqCst), 1);

        let stored = store.assignments().await.unwrap();
        let keys: Vec<_> = stored
            .iter()
            .map(|a| (a.post_id.as_str(), a.layer, a.category.as_str()))
            .collect();
        assert_eq!(
            keys,
            vec![
                ("1", Layer::QuestionType, "Implementation"),
                ("1", Layer::TechnicalDomain, "Tokenization"),
                ("1", Layer::ToolStack, "spaCy"),
                ("2", Layer::TechnicalDomain, "Tokenization"),
            ]
        );
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent() {
        let embedder = Arc::new(KeywordEmbedder {
            batch_calls: AtomicUsize::new(0),
        });
        let store = Arc::new(FakeStore::default());
        let run = ClassificationRun::new(
            classifier(embedder).await,
            Arc::clone(&store),
            RunConfig::default(),
        );

        let (_tx, rx) = watch::channel(false);
        run.execute(&corpus(), rx.clone()).await.unwrap();
        let first = store.assignments().await.unwrap();
        run.execute(&corpus(), rx).await.unwrap();
        let second = store.assignments().await.unwrap();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_assignments_independent_of_order_and_batching() {
        let mut shuffled = corpus();
        shuffled.reverse();
        shuffled.swap(0, 2);

        let mut results = Vec::new();
        for (posts, config) in [
            (
                corpus(),
                RunConfig {
                    max_concurrent: 1,
                    batch_size: 1,
                },
            ),
            (
                shuffled,
                RunConfig {
                    max_concurrent: 4,
                    batch_size: 3,
                },
            ),
        ] {
            let embedder = Arc::new(KeywordEmbedder {
                batch_calls: AtomicUsize::new(0),
            });
            let store = Arc::new(FakeStore::default());
            let run = ClassificationRun::new(classifier(embedder).await, Arc::clone(&store), config);
            let (_tx, rx) = watch::channel(false);

            let summary = run.execute(&posts, rx).await.unwrap();
            assert_eq!(summary.processed_posts, 4);
            results.push((store.assignments().await.unwrap(), summary.encoding_errors));
        }

        assert!(!results[0].0.is_empty());
        assert_eq!(results[0], results[1]);
    }

    #[tokio::test]
    async fn test_cancel_before_start() {
        let embedder = Arc::new(KeywordEmbedder {
            batch_calls: AtomicUsize::new(0),
        });
        let store = Arc::new(FakeStore::default());
        let run = ClassificationRun::new(
            classifier(embedder).await,
            Arc::clone(&store),
            RunConfig::default(),
        );
        let (_tx, rx) = watch::channel(true);

        let summary = run.execute(&corpus(), rx).await.unwrap();

        assert!(summary.cancelled);
        assert_eq!(summary.processed_posts, 0);
        assert_eq!(store.writes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancel_stops_at_batch_boundary() {
        let embedder = Arc::new(KeywordEmbedder {
            batch_calls: AtomicUsize::new(0),
        });
        let (tx, rx) = watch::channel(false);
        let store = Arc::new(FakeStore {
            cancel_after_first_write: Some(tx),
            ..Default::default()
        });
        let run = ClassificationRun::new(
            classifier(embedder).await,
            Arc::clone(&store),
            RunConfig {
                max_concurrent: 1,
                batch_size: 2,
            },
        );

        let summary = run.execute(&corpus(), rx).await.unwrap();

        assert!(summary.cancelled);
        assert_eq!(summary.post_ids, vec!["1", "2"]);
        assert_eq!(store.writes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_store_failure_aborts_run() {
        let embedder = Arc::new(KeywordEmbedder {
            batch_calls: AtomicUsize::new(0),
        });
        let store = Arc::new(FakeStore {
            fail: true,
            ..Default::default()
        });
        let run = ClassificationRun::new(classifier(embedder).await, store, RunConfig::default());
        let (_tx, rx) = watch::channel(false);

        let result = run.execute(&corpus(), rx).await;

        assert!(matches!(result, Err(RunError::Store(_))));
    }
}
