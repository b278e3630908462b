//! Hybrid classification use case: rules first, embedding similarity as fallback

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use time::OffsetDateTime;

use crate::{
    model::{
        Assignment, Layer, LayerOutcome, LayerState, Method, Post, PostClassification,
        UnclassifiedReason,
    },
    ports::{Clock, ConfigError, TaxonomyError},
    taxonomy::TaxonomyRegistry,
    usecases::{
        embedding::{EmbeddingIndex, Similarity},
        rules::{RULE_CONFIDENCE, RuleHit, RuleMatcher},
    },
};

/// How rule hits and embedding similarity are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// Embedding similarity only runs for layers without rule hits
    #[default]
    Fallback,
    /// Embedding similarity also runs for rule-matched layers; a rule hit
    /// that is also the top embedding category is recorded as `Both`
    Corroborate,
}

impl FromStr for MergePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "fallback" => Ok(MergePolicy::Fallback),
            "corroborate" => Ok(MergePolicy::Corroborate),
            other => Err(format!("Unknown merge policy: {}", other)),
        }
    }
}

/// Configuration for the hybrid classifier
#[derive(Debug, Clone)]
pub struct ClassifyConfig {
    /// Minimum embedding confidence for an assignment
    pub threshold: f64,
    pub merge_policy: MergePolicy,
    /// Maximum embedding categories accepted per layer (None = all above threshold)
    pub embedding_top_k: Option<usize>,
    /// Layers to classify, in order
    pub layers: Vec<Layer>,
}

impl Default for ClassifyConfig {
    fn default() -> Self {
        Self {
            threshold: 0.55,
            merge_policy: MergePolicy::default(),
            embedding_top_k: None,
            layers: Layer::ALL.to_vec(),
        }
    }
}

impl ClassifyConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(ConfigError::InvalidThreshold(self.threshold));
        }
        Ok(())
    }
}

/// Orchestrates the rule matcher and the embedding index for each layer
pub struct HybridClassifier {
    registry: Arc<TaxonomyRegistry>,
    rules: RuleMatcher,
    index: EmbeddingIndex,
    clock: Arc<dyn Clock>,
    config: ClassifyConfig,
}

impl HybridClassifier {
    pub fn new(
        registry: Arc<TaxonomyRegistry>,
        rules: RuleMatcher,
        index: EmbeddingIndex,
        clock: Arc<dyn Clock>,
        config: ClassifyConfig,
    ) -> Self {
        Self {
            registry,
            rules,
            index,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &ClassifyConfig {
        &self.config
    }

    pub fn registry(&self) -> &TaxonomyRegistry {
        &self.registry
    }

    pub fn index(&self) -> &EmbeddingIndex {
        &self.index
    }

    /// Classify a post in every configured layer. Each layer ends either
    /// Assigned or Unclassified; only an undefined layer aborts.
    pub async fn classify(&self, post: &Post) -> Result<PostClassification, TaxonomyError> {
        let now = self.clock.now();
        let mut layers = Vec::with_capacity(self.config.layers.len());

        for &layer in &self.config.layers {
            let state = self.classify_layer(post, layer, now).await?;
            layers.push(LayerOutcome { layer, state });
        }

        let classification = PostClassification {
            post_id: post.id.clone(),
            layers,
        };

        tracing::debug!(
            post_id = %post.id,
            assignments = classification.assignments().count(),
            "Classified post"
        );

        Ok(classification)
    }

    /// Whether classifying this post will consult the embedding index
    pub fn needs_embedding(&self, post: &Post) -> bool {
        self.config
            .layers
            .iter()
            .filter(|layer| self.index.has_references(**layer))
            .any(|layer| {
                self.config.merge_policy == MergePolicy::Corroborate
                    || self
                        .rules
                        .match_post(post, *layer)
                        .map(|hits| hits.is_empty())
                        .unwrap_or(false)
            })
    }

    async fn classify_layer(
        &self,
        post: &Post,
        layer: Layer,
        now: OffsetDateTime,
    ) -> Result<LayerState, TaxonomyError> {
        let undefined = |_| TaxonomyError::UndefinedLayerForPost {
            layer,
            post_id: post.id.clone(),
        };
        self.registry.categories_for(layer).map_err(undefined)?;
        let hits = self.rules.match_post(post, layer).map_err(undefined)?;

        if !hits.is_empty() {
            let corroborated = match self.config.merge_policy {
                MergePolicy::Fallback => None,
                MergePolicy::Corroborate => self.corroborate(post, layer, &hits).await,
            };
            let assignments = hits
                .into_iter()
                .map(|hit| {
                    let method = if corroborated.as_deref() == Some(hit.category.as_str()) {
                        Method::Both
                    } else {
                        Method::Rule
                    };
                    self.assignment(post, layer, hit.category, method, RULE_CONFIDENCE, now)
                })
                .collect();
            return Ok(LayerState::Assigned(assignments));
        }

        let ranked = match self.index.classify(post, layer).await {
            Ok(ranked) => ranked,
            Err(error) => {
                tracing::warn!(
                    post_id = %post.id,
                    layer = %layer,
                    error = %error,
                    "Embedding failed; layer left unclassified"
                );
                return Ok(LayerState::Unclassified(
                    UnclassifiedReason::EncodingFailed {
                        message: error.to_string(),
                    },
                ));
            }
        };

        let best = ranked.first().cloned();
        let accepted: Vec<Similarity> = ranked
            .into_iter()
            .take_while(|similarity| similarity.confidence >= self.config.threshold)
            .take(self.config.embedding_top_k.unwrap_or(usize::MAX))
            .collect();

        if accepted.is_empty() {
            tracing::debug!(
                post_id = %post.id,
                layer = %layer,
                best = ?best,
                threshold = self.config.threshold,
                "No category cleared the threshold"
            );
            return Ok(LayerState::Unclassified(UnclassifiedReason::NoMatch {
                best_category: best.as_ref().map(|s| s.category.clone()),
                best_confidence: best.map(|s| s.confidence),
            }));
        }

        Ok(LayerState::Assigned(
            accepted
                .into_iter()
                .map(|similarity| {
                    self.assignment(
                        post,
                        layer,
                        similarity.category,
                        Method::Embedding,
                        similarity.confidence,
                        now,
                    )
                })
                .collect(),
        ))
    }

    /// Rule hit that coincides with the top embedding category, if any.
    /// Embedding failures never downgrade a rule match.
    async fn corroborate(&self, post: &Post, layer: Layer, hits: &[RuleHit]) -> Option<String> {
        match self.index.classify(post, layer).await {
            Ok(ranked) => ranked
                .into_iter()
                .next()
                .filter(|top| top.confidence >= self.config.threshold)
                .filter(|top| hits.iter().any(|hit| hit.category == top.category))
                .map(|top| top.category),
            Err(error) => {
                tracing::debug!(
                    post_id = %post.id,
                    layer = %layer,
                    error = %error,
                    "Corroboration skipped"
                );
                None
            }
        }
    }

    fn assignment(
        &self,
        post: &Post,
        layer: Layer,
        category: String,
        method: Method,
        confidence: f64,
        now: OffsetDateTime,
    ) -> Assignment {
        Assignment {
            post_id: post.id.clone(),
            layer,
            category,
            method,
            confidence,
            assigned_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CategoryDefinition, Rule, Taxonomy};
    use crate::ports::{Embedder, EncodingError};
    use crate::usecases::embedding::EmbeddingConfig;
    use async_trait::async_trait;
    use std::collections::{BTreeMap, BTreeSet, HashMap};
    use time::macros::datetime;

    struct FakeClock {
        time: OffsetDateTime,
    }

    impl Clock for FakeClock {
        fn now(&self) -> OffsetDateTime {
            self.time
        }
    }

    /// Returns fixed vectors for known texts and fails on everything else
    struct FakeEmbedder {
        table: HashMap<String, Vec<f32>>,
    }

    #[async_trait]
    impl Embedder for FakeEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, EncodingError> {
            self.table
                .get(text)
                .cloned()
                .ok_or_else(|| EncodingError::InvalidFormat(format!("no vector for {}", text)))
        }

        fn provider(&self) -> &'static str {
            "fake"
        }
    }

    const TOKENIZE_TITLE: &str = "How to tokenize text using spaCy";
    const TOKENIZE_BODY: &str = "I tried word_tokenize but it splits contractions";

    fn post(id: &str, title: &str, body: &str) -> Post {
        Post {
            id: id.to_string(),
            title: title.to_string(),
            body: body.to_string(),
            tags: BTreeSet::from(["nlp".to_string()]),
            answers: vec![],
            embedding: None,
        }
    }

    fn category(name: &str, rules: Vec<Rule>, reference: Option<&str>) -> CategoryDefinition {
        CategoryDefinition {
            name: name.to_string(),
            rules,
            reference_text: reference.map(str::to_string),
        }
    }

    fn registry() -> Arc<TaxonomyRegistry> {
        let mut layers = BTreeMap::new();
        layers.insert(
            Layer::QuestionType,
            vec![
                category(
                    "Implementation",
                    vec![Rule::keyword("how to")],
                    Some("ref implementation"),
                ),
                category("Error", vec![Rule::keyword("traceback")], None),
            ],
        );
        layers.insert(
            Layer::TechnicalDomain,
            vec![
                category("Tokenization", vec![], Some("ref tokenization")),
                category("Sentiment Analysis", vec![], Some("ref sentiment")),
            ],
        );
        layers.insert(
            Layer::ToolStack,
            vec![category("spaCy", vec![Rule::keyword("spacy")], None)],
        );
        Arc::new(TaxonomyRegistry::new(Taxonomy::new(layers)).unwrap())
    }

    fn embedder() -> Arc<dyn Embedder> {
        let mut table = HashMap::new();
        table.insert("ref implementation".to_string(), vec![0.0, 0.0, 1.0]);
        table.insert("ref tokenization".to_string(), vec![1.0, 0.0, 0.0]);
        table.insert("ref sentiment".to_string(), vec![0.0, 1.0, 0.0]);
        // cos with tokenization = 0.81, with sentiment = 0.30
        table.insert(
            format!("{}\n\n{}", TOKENIZE_TITLE, TOKENIZE_BODY),
            vec![0.81, 0.30, 0.503_885],
        );
        table.insert("Exact\n\nmatch".to_string(), vec![2.0, 0.0, 0.0]);
        // below threshold for every TechnicalDomain category
        table.insert("Weird\n\nnothing matches".to_string(), vec![0.3, 0.3, 0.905_539]);
        Arc::new(FakeEmbedder { table })
    }

    async fn build_classifier(config: ClassifyConfig) -> HybridClassifier {
        let registry = registry();
        let rules = RuleMatcher::new(&registry).unwrap();
        let index =
            EmbeddingIndex::build(&registry, embedder(), EmbeddingConfig::default()).await;
        let clock = Arc::new(FakeClock {
            time: datetime!(2024-05-01 12:00 UTC),
        });
        HybridClassifier::new(registry, rules, index, clock, config)
    }

    fn single(classification: &PostClassification, layer: Layer) -> &Assignment {
        match classification.state(layer) {
            Some(LayerState::Assigned(assignments)) => {
                assert_eq!(assignments.len(), 1);
                &assignments[0]
            }
            other => panic!("expected one assignment in {}, got {:?}", layer, other),
        }
    }

    #[tokio::test]
    async fn test_rule_and_embedding_scenario() {
        let classifier = build_classifier(ClassifyConfig::default()).await;
        let result = classifier
            .classify(&post("42", TOKENIZE_TITLE, TOKENIZE_BODY))
            .await
            .unwrap();

        let question = single(&result, Layer::QuestionType);
        assert_eq!(question.category, "Implementation");
        assert_eq!(question.method, Method::Rule);
        assert_eq!(question.confidence, 1.0);

        let tool = single(&result, Layer::ToolStack);
        assert_eq!(tool.category, "spaCy");
        assert_eq!(tool.method, Method::Rule);
        assert_eq!(tool.confidence, 1.0);

        let domain = single(&result, Layer::TechnicalDomain);
        assert_eq!(domain.category, "Tokenization");
        assert_eq!(domain.method, Method::Embedding);
        assert!((domain.confidence - 0.81).abs() < 1e-3);
    }

    #[tokio::test]
    async fn test_below_threshold_layer_is_unclassified() {
        let classifier = build_classifier(ClassifyConfig::default()).await;
        let result = classifier
            .classify(&post("7", "Weird", "nothing matches"))
            .await
            .unwrap();

        assert!(matches!(
            result.state(Layer::TechnicalDomain),
            Some(LayerState::Unclassified(UnclassifiedReason::NoMatch {
                best_category: Some(_),
                ..
            }))
        ));
        // QuestionType falls back to embedding: cos with implementation ≈ 0.91
        let question = single(&result, Layer::QuestionType);
        assert_eq!(question.method, Method::Embedding);
        assert!(matches!(
            result.state(Layer::ToolStack),
            Some(LayerState::Unclassified(UnclassifiedReason::NoMatch {
                best_category: None,
                best_confidence: None
            }))
        ));
    }

    #[tokio::test]
    async fn test_every_layer_reaches_a_terminal_state() {
        let classifier = build_classifier(ClassifyConfig::default()).await;
        for p in [
            post("1", TOKENIZE_TITLE, TOKENIZE_BODY),
            post("2", "Weird", "nothing matches"),
            post("3", "no vector", "for this one"),
        ] {
            let result = classifier.classify(&p).await.unwrap();
            let layers: Vec<_> = result.layers.iter().map(|o| o.layer).collect();
            assert_eq!(layers, Layer::ALL.to_vec());
        }
    }

    #[tokio::test]
    async fn test_encoding_failure_is_recoverable() {
        let classifier = build_classifier(ClassifyConfig::default()).await;
        let result = classifier
            .classify(&post("9", "Using spaCy pipelines", "no vector for this text"))
            .await
            .unwrap();

        let tool = single(&result, Layer::ToolStack);
        assert_eq!(tool.category, "spaCy");
        assert!(matches!(
            result.state(Layer::TechnicalDomain),
            Some(LayerState::Unclassified(
                UnclassifiedReason::EncodingFailed { .. }
            ))
        ));
        let failures: Vec<_> = result.encoding_failures().collect();
        assert_eq!(failures, vec![Layer::QuestionType, Layer::TechnicalDomain]);
    }

    async fn classifier_over(table: HashMap<String, Vec<f32>>) -> HybridClassifier {
        let registry = registry();
        let rules = RuleMatcher::new(&registry).unwrap();
        let index = EmbeddingIndex::build(
            &registry,
            Arc::new(FakeEmbedder { table }),
            EmbeddingConfig {
                retries: 0,
                ..Default::default()
            },
        )
        .await;
        let clock = Arc::new(FakeClock {
            time: datetime!(2024-05-01 12:00 UTC),
        });
        HybridClassifier::new(registry, rules, index, clock, ClassifyConfig::default())
    }

    #[tokio::test]
    async fn test_unavailable_capability_counts_encoding_errors() {
        let classifier = classifier_over(HashMap::new()).await;
        assert_eq!(classifier.index().missing_references().len(), 3);
        assert!(classifier.needs_embedding(&post("1", "Weird", "nothing matches")));

        let result = classifier
            .classify(&post("1", "Weird", "nothing matches"))
            .await
            .unwrap();

        let failures: Vec<_> = result.encoding_failures().collect();
        assert_eq!(failures, vec![Layer::QuestionType, Layer::TechnicalDomain]);
        // No reference texts in this layer, so no embedding is attempted
        assert!(matches!(
            result.state(Layer::ToolStack),
            Some(LayerState::Unclassified(UnclassifiedReason::NoMatch {
                best_category: None,
                best_confidence: None
            }))
        ));
    }

    #[tokio::test]
    async fn test_layer_without_reference_embeddings_is_an_encoding_failure() {
        // The post embeds, but no reference text of either layer did
        let mut table = HashMap::new();
        table.insert("Weird\n\nnothing matches".to_string(), vec![1.0, 0.0, 0.0]);
        let classifier = classifier_over(table).await;

        let result = classifier
            .classify(&post("1", "Weird", "nothing matches"))
            .await
            .unwrap();

        assert!(matches!(
            result.state(Layer::TechnicalDomain),
            Some(LayerState::Unclassified(
                UnclassifiedReason::EncodingFailed { .. }
            ))
        ));
        assert_eq!(result.encoding_failures().count(), 2);
    }

    #[tokio::test]
    async fn test_deterministic() {
        let classifier = build_classifier(ClassifyConfig::default()).await;
        let p = post("42", TOKENIZE_TITLE, TOKENIZE_BODY);
        let first = classifier.classify(&p).await.unwrap();
        let second = classifier.classify(&p).await.unwrap();
        assert_eq!(first, second);

        let fresh = build_classifier(ClassifyConfig::default()).await;
        assert_eq!(first, fresh.classify(&p).await.unwrap());
    }

    #[tokio::test]
    async fn test_threshold_is_inclusive() {
        let classifier = build_classifier(ClassifyConfig {
            threshold: 1.0,
            layers: vec![Layer::TechnicalDomain],
            ..Default::default()
        })
        .await;
        let result = classifier
            .classify(&post("8", "Exact", "match"))
            .await
            .unwrap();
        let domain = single(&result, Layer::TechnicalDomain);
        assert_eq!(domain.category, "Tokenization");
        assert_eq!(domain.confidence, 1.0);

        let strict = build_classifier(ClassifyConfig {
            threshold: 0.82,
            ..Default::default()
        })
        .await;
        let result = strict
            .classify(&post("42", TOKENIZE_TITLE, TOKENIZE_BODY))
            .await
            .unwrap();
        assert!(!result.state(Layer::TechnicalDomain).unwrap().is_assigned());
    }

    #[tokio::test]
    async fn test_multi_label_embedding_and_top_k() {
        let multi = build_classifier(ClassifyConfig {
            threshold: 0.25,
            ..Default::default()
        })
        .await;
        let result = multi
            .classify(&post("42", TOKENIZE_TITLE, TOKENIZE_BODY))
            .await
            .unwrap();
        let names: Vec<_> = result
            .state(Layer::TechnicalDomain)
            .unwrap()
            .assignments()
            .iter()
            .map(|a| a.category.as_str())
            .collect();
        assert_eq!(names, vec!["Tokenization", "Sentiment Analysis"]);

        let capped = build_classifier(ClassifyConfig {
            threshold: 0.25,
            embedding_top_k: Some(1),
            ..Default::default()
        })
        .await;
        let result = capped
            .classify(&post("42", TOKENIZE_TITLE, TOKENIZE_BODY))
            .await
            .unwrap();
        assert_eq!(
            result.state(Layer::TechnicalDomain).unwrap().assignments().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_corroborate_marks_both() {
        let mut table = HashMap::new();
        table.insert("ref implementation".to_string(), vec![0.0, 0.0, 1.0]);
        table.insert("ref tokenization".to_string(), vec![1.0, 0.0, 0.0]);
        table.insert("ref sentiment".to_string(), vec![0.0, 1.0, 0.0]);
        table.insert("How to ask\n\nquestions".to_string(), vec![0.0, 0.0, 1.0]);
        let registry = registry();
        let rules = RuleMatcher::new(&registry).unwrap();
        let index = EmbeddingIndex::build(
            &registry,
            Arc::new(FakeEmbedder { table }),
            EmbeddingConfig::default(),
        )
        .await;
        let classifier = HybridClassifier::new(
            registry,
            rules,
            index,
            Arc::new(FakeClock {
                time: datetime!(2024-05-01 12:00 UTC),
            }),
            ClassifyConfig {
                merge_policy: MergePolicy::Corroborate,
                ..Default::default()
            },
        );

        let result = classifier
            .classify(&post("5", "How to ask", "questions"))
            .await
            .unwrap();
        let question = single(&result, Layer::QuestionType);
        assert_eq!(question.method, Method::Both);
        assert_eq!(question.confidence, 1.0);
    }

    #[tokio::test]
    async fn test_corroborate_failure_keeps_rule() {
        let classifier = build_classifier(ClassifyConfig {
            merge_policy: MergePolicy::Corroborate,
            ..Default::default()
        })
        .await;
        let result = classifier
            .classify(&post("9", "Using spaCy pipelines", "no vector for this text"))
            .await
            .unwrap();
        let tool = single(&result, Layer::ToolStack);
        assert_eq!(tool.method, Method::Rule);
    }

    #[tokio::test]
    async fn test_undefined_layer_is_fatal() {
        let mut layers = BTreeMap::new();
        layers.insert(
            Layer::QuestionType,
            vec![category("Implementation", vec![Rule::keyword("how to")], None)],
        );
        let registry = Arc::new(
            TaxonomyRegistry::with_required_layers(Taxonomy::new(layers), &[Layer::QuestionType])
                .unwrap(),
        );
        let rules = RuleMatcher::new(&registry).unwrap();
        let index = EmbeddingIndex::build(&registry, embedder(), EmbeddingConfig::default()).await;
        let classifier = HybridClassifier::new(
            registry,
            rules,
            index,
            Arc::new(FakeClock {
                time: datetime!(2024-05-01 12:00 UTC),
            }),
            ClassifyConfig::default(),
        );

        let result = classifier.classify(&post("1", "How to", "x")).await;
        assert!(matches!(
            result,
            Err(TaxonomyError::UndefinedLayerForPost {
                layer: Layer::TechnicalDomain,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_needs_embedding() {
        let classifier = build_classifier(ClassifyConfig {
            layers: vec![Layer::QuestionType, Layer::ToolStack],
            ..Default::default()
        })
        .await;
        assert!(!classifier.needs_embedding(&post("1", TOKENIZE_TITLE, "")));
        assert!(classifier.needs_embedding(&post("2", "Tokenizing", "")));
    }

    #[test]
    fn test_threshold_validation() {
        let config = ClassifyConfig {
            threshold: 1.5,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidThreshold(_))
        ));
        assert!(ClassifyConfig::default().validate().is_ok());
    }

    #[test]
    fn test_merge_policy_parse() {
        assert_eq!(
            "corroborate".parse::<MergePolicy>().unwrap(),
            MergePolicy::Corroborate
        );
        assert!("both".parse::<MergePolicy>().is_err());
    }
}
