//! Taxonomy command - list and validate the taxonomy document

use anyhow::{Context, Result};
use post_classifier_adapters::taxonomy::FsTaxonomySource;
use post_classifier_domain::{TaxonomyRegistry, TaxonomySource};
use std::path::{Path, PathBuf};

use crate::args::{TaxonomyArgs, TaxonomyCommands};
use crate::config::AppConfig;

pub async fn execute(args: TaxonomyArgs, config_path: Option<PathBuf>) -> Result<()> {
    let config = AppConfig::load(config_path.as_deref())?;

    match args.command {
        TaxonomyCommands::List { taxonomy, json } => {
            let path = taxonomy.unwrap_or(config.general.taxonomy_path);
            list_taxonomy(&path, json).await
        }
        TaxonomyCommands::Validate { taxonomy } => {
            let path = taxonomy.unwrap_or(config.general.taxonomy_path);
            validate_taxonomy(&path).await
        }
    }
}

/// Load and validate the taxonomy at `path`
pub(crate) async fn load_registry(path: &Path) -> Result<TaxonomyRegistry> {
    let source = FsTaxonomySource::new(path)
        .with_context(|| format!("Failed to open taxonomy {}", path.display()))?;
    let taxonomy = source
        .load()
        .await
        .with_context(|| format!("Failed to load taxonomy {}", path.display()))?;
    TaxonomyRegistry::new(taxonomy).context("Taxonomy validation failed")
}

async fn list_taxonomy(path: &Path, json: bool) -> Result<()> {
    let registry = load_registry(path).await?;
    let taxonomy = registry.taxonomy();

    if json {
        let output = serde_json::json!({
            "taxonomy_hash": taxonomy.hash,
            "count": taxonomy.category_count(),
            "layers": taxonomy.layers().map(|(layer, categories)| serde_json::json!({
                "layer": layer,
                "categories": categories,
            })).collect::<Vec<_>>()
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("Taxonomy ({} categories)", taxonomy.category_count());
        println!("========================");
        println!("Hash: {}", taxonomy.hash);
        println!();

        for (layer, categories) in taxonomy.layers() {
            println!("{}:", layer);
            for category in categories {
                let reference = if category.has_reference_text() {
                    ", reference text"
                } else {
                    ""
                };
                println!(
                    "  - {} ({} rules{})",
                    category.name,
                    category.rules.len(),
                    reference
                );
            }
            println!();
        }
    }

    Ok(())
}

async fn validate_taxonomy(path: &Path) -> Result<()> {
    println!("Validating taxonomy: {}", path.display());

    let registry = load_registry(path).await?;
    println!(
        "✓ Validation passed ({} categories, hash {})",
        registry.taxonomy().category_count(),
        registry.hash()
    );

    Ok(())
}
