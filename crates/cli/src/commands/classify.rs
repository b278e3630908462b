//! Classify command - batch classification of a post corpus

use anyhow::{Context, Result, bail};
use post_classifier_adapters::{
    embedding::{
        EmbeddingProviderConfig, HashingEmbedder, OllamaEmbedder, OpenAiEmbedder, StubEmbedder,
        hashing::DEFAULT_DIMENSIONS,
    },
    posts::FsPostSource,
    report::{write_assignments, write_report},
    store::{InMemoryClassificationStore, SqliteClassificationStore},
};
use post_classifier_domain::usecases::{
    ClassificationRun, EmbeddingIndex, HybridClassifier, ReportContext, RuleMatcher, RunSummary,
};
use post_classifier_domain::{
    ClassificationReport, ClassificationStore, Clock, Embedder, PostSource, SystemClock,
};
use secrecy::SecretString;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use uuid::Uuid;

use crate::args::ClassifyArgs;
use crate::commands::taxonomy::load_registry;
use crate::config::AppConfig;

pub async fn execute(args: ClassifyArgs, config_path: Option<PathBuf>) -> Result<()> {
    let mut config = AppConfig::load(config_path.as_deref())?;

    if let Some(threshold) = args.threshold {
        config.classifier.threshold = threshold;
    }
    if let Some(provider) = args.provider {
        config.embedding.provider = provider;
    }
    let taxonomy_path = args.taxonomy.unwrap_or(config.general.taxonomy_path.clone());
    let posts_path = args.posts.unwrap_or(config.general.posts_path.clone());
    let output_path = args.output.unwrap_or(config.general.output_path.clone());
    let assignments_path = args.assignments.or(config.general.assignments_path.clone());
    let store_db_path = args.store_db.or(config.general.store_db_path.clone());

    let classify_config = config.classify_config();
    classify_config
        .validate()
        .context("Invalid classifier configuration")?;

    // Taxonomy problems abort before any post is read
    let registry = Arc::new(load_registry(&taxonomy_path).await?);
    let rules = RuleMatcher::new(&registry).context("Failed to compile taxonomy rules")?;

    let posts = FsPostSource::new(&posts_path)
        .load_posts()
        .await
        .with_context(|| format!("Failed to load posts from {}", posts_path.display()))?;

    tracing::info!(
        taxonomy_hash = %registry.hash(),
        posts = posts.len(),
        provider = %config.embedding.provider,
        threshold = classify_config.threshold,
        merge_policy = ?classify_config.merge_policy,
        "Starting classification"
    );

    let embedder = build_embedder(&config)?;
    let index = EmbeddingIndex::build(&registry, embedder, config.embedding_config()).await;
    if !index.missing_references().is_empty() {
        println!(
            "Warning: {} categories excluded from similarity ranking (reference text could not be embedded)",
            index.missing_references().len()
        );
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let classifier = Arc::new(HybridClassifier::new(
        Arc::clone(&registry),
        rules,
        index,
        Arc::clone(&clock),
        classify_config,
    ));

    let store: Arc<dyn ClassificationStore> = match &store_db_path {
        Some(path) => Arc::new(
            SqliteClassificationStore::new(path)
                .await
                .with_context(|| format!("Failed to open store {}", path.display()))?,
        ),
        None => Arc::new(InMemoryClassificationStore::new()),
    };

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received; finishing the current batch");
            let _ = cancel_tx.send(true);
        }
    });

    let run = ClassificationRun::new(classifier, Arc::clone(&store), config.run_config());
    let summary = run
        .execute(&posts, cancel_rx)
        .await
        .context("Classification run failed")?;

    let context = ReportContext {
        taxonomy: registry.taxonomy(),
        post_ids: &summary.post_ids,
        encoding_errors: &summary.encoding_errors,
        policy: config.coverage_policy(),
        run_id: Uuid::new_v4(),
        generated_at: clock.now(),
    };
    let outcome = store
        .report(&context)
        .await
        .context("Failed to build report")?;

    write_report(&output_path, &outcome.report)
        .await
        .with_context(|| format!("Failed to write report to {}", output_path.display()))?;

    if let Some(path) = &assignments_path {
        export_assignments(store.as_ref(), &summary, path).await?;
    }

    print_summary(&summary, &outcome.report, &output_path);

    if summary.cancelled {
        bail!(
            "Run cancelled after {} of {} posts; partial report written",
            summary.processed_posts,
            posts.len()
        );
    }

    match outcome.coverage_error {
        Some(coverage_error) => Err(coverage_error.into()),
        None => Ok(()),
    }
}

pub(crate) fn build_embedder(config: &AppConfig) -> Result<Arc<dyn Embedder>> {
    let section = &config.embedding;
    let provider_config = EmbeddingProviderConfig {
        model: config.embedding_model().to_string(),
        dimensions: (section.dimensions > 0).then_some(section.dimensions),
        timeout_secs: section.timeout_secs,
    };

    match section.provider.as_str() {
        "hashing" => {
            let dimensions = if section.dimensions == 0 {
                DEFAULT_DIMENSIONS
            } else {
                section.dimensions
            };
            Ok(Arc::new(HashingEmbedder::new(dimensions)?))
        }
        "ollama" => Ok(Arc::new(OllamaEmbedder::with_base_url(
            section.ollama.base_url.clone(),
            provider_config,
        )?)),
        "openai" => {
            let api_key = load_api_key(&section.openai.api_key_env, "openai")?;
            Ok(Arc::new(OpenAiEmbedder::with_base_url(
                api_key,
                section.openai.base_url.clone(),
                provider_config,
            )?))
        }
        "none" => Ok(Arc::new(StubEmbedder::unavailable())),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

pub(crate) fn load_api_key(env_var: &str, provider: &str) -> Result<SecretString> {
    if env_var.trim().is_empty() {
        bail!("No API key env var configured for provider {}", provider);
    }

    let key = std::env::var(env_var).with_context(|| {
        format!(
            "Missing API key env var {} for provider {}",
            env_var, provider
        )
    })?;

    if key.trim().is_empty() {
        bail!(
            "API key env var {} is empty for provider {}",
            env_var,
            provider
        );
    }

    Ok(SecretString::new(key.into()))
}

async fn export_assignments(
    store: &dyn ClassificationStore,
    summary: &RunSummary,
    path: &Path,
) -> Result<()> {
    let processed: HashSet<&str> = summary.post_ids.iter().map(String::as_str).collect();
    let assignments: Vec<_> = store
        .assignments()
        .await
        .context("Failed to read assignments")?
        .into_iter()
        .filter(|a| processed.contains(a.post_id.as_str()))
        .collect();

    write_assignments(path, &assignments)
        .await
        .with_context(|| format!("Failed to write assignments to {}", path.display()))
}

fn print_summary(summary: &RunSummary, report: &ClassificationReport, output_path: &Path) {
    println!("Classification Results");
    println!("======================");
    println!();
    println!(
        "Posts: {} processed, {} classified in at least one layer",
        summary.processed_posts, report.classified_posts
    );
    println!();

    for layer in &report.layers {
        println!(
            "{}: {}/{} posts ({:.1}%), {} encoding errors",
            layer.layer,
            layer.assigned_posts,
            report.total_posts,
            layer.coverage * 100.0,
            layer.encoding_errors
        );
        for category in &layer.categories {
            let flag = if category.below_minimum_support {
                "  [below minimum support]"
            } else {
                ""
            };
            println!(
                "  - {}: {} (rule {}, embedding {}, both {}){}",
                category.name,
                category.posts,
                category.by_rule,
                category.by_embedding,
                category.by_both,
                flag
            );
        }
    }

    println!();
    println!("Report written to {}", output_path.display());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_embedder_providers() {
        let mut config = AppConfig::default();
        assert_eq!(build_embedder(&config).unwrap().provider(), "hashing");

        config.embedding.provider = "none".to_string();
        assert_eq!(build_embedder(&config).unwrap().provider(), "none");

        config.embedding.provider = "ollama".to_string();
        assert_eq!(build_embedder(&config).unwrap().provider(), "ollama");

        config.embedding.provider = "word2vec".to_string();
        assert!(build_embedder(&config).is_err());
    }

    #[test]
    fn test_openai_requires_api_key() {
        let mut config = AppConfig::default();
        config.embedding.provider = "openai".to_string();
        config.embedding.openai.api_key_env = "POST_CLASSIFIER_TEST_MISSING_KEY".to_string();
        let error = build_embedder(&config).err().unwrap();
        assert!(error.to_string().contains("POST_CLASSIFIER_TEST_MISSING_KEY"));
    }

    #[test]
    fn test_load_api_key_rejects_blank_env_name() {
        assert!(load_api_key("  ", "openai").is_err());
    }
}
