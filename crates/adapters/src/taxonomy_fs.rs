//! Filesystem taxonomy loader (TOML or JSON)

use async_trait::async_trait;
use post_classifier_domain::{CategoryDefinition, ConfigError, Layer, Taxonomy, TaxonomySource};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Taxonomy document format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaxonomyFormat {
    Toml,
    Json,
}

impl TaxonomyFormat {
    /// `.json` is JSON, anything else is TOML
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => TaxonomyFormat::Json,
            _ => TaxonomyFormat::Toml,
        }
    }
}

/// Taxonomy document stored in a single file
pub struct FsTaxonomySource {
    path: PathBuf,
}

impl FsTaxonomySource {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref().to_path_buf();

        if !path.is_file() {
            return Err(ConfigError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("Taxonomy file not found: {}", path.display()),
            )));
        }

        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl TaxonomySource for FsTaxonomySource {
    async fn load(&self) -> Result<Taxonomy, ConfigError> {
        let content = tokio::fs::read_to_string(&self.path).await?;
        let file = self.path.display().to_string();
        let taxonomy = parse_taxonomy(&content, TaxonomyFormat::from_path(&self.path), &file)?;

        tracing::debug!(
            file = %file,
            taxonomy_hash = %taxonomy.hash,
            categories = taxonomy.category_count(),
            "Loaded taxonomy document"
        );

        Ok(taxonomy)
    }
}

/// Parse a taxonomy document. Structural validation happens in the registry.
pub fn parse_taxonomy(
    content: &str,
    format: TaxonomyFormat,
    file: &str,
) -> Result<Taxonomy, ConfigError> {
    let raw: BTreeMap<String, Vec<CategoryDefinition>> = match format {
        TaxonomyFormat::Toml => toml::from_str(content).map_err(|e| ConfigError::Parse {
            file: file.to_string(),
            message: e.to_string(),
        })?,
        TaxonomyFormat::Json => serde_json::from_str(content).map_err(|e| ConfigError::Parse {
            file: file.to_string(),
            message: e.to_string(),
        })?,
    };

    let mut layers = BTreeMap::new();
    for (name, categories) in raw {
        let layer: Layer = name.parse()?;
        if layers.insert(layer, categories).is_some() {
            return Err(ConfigError::Parse {
                file: file.to_string(),
                message: format!("Layer {} is defined twice", layer),
            });
        }
    }

    Ok(Taxonomy::new(layers))
}
