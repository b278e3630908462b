//! Configuration loading and management

use anyhow::{Context, Result};
use post_classifier_domain::CoveragePolicy;
use post_classifier_domain::usecases::{ClassifyConfig, EmbeddingConfig, MergePolicy, RunConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub classifier: ClassifierConfig,

    #[serde(default)]
    pub embedding: EmbeddingSection,

    #[serde(default)]
    pub coverage: CoverageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_taxonomy_path")]
    pub taxonomy_path: PathBuf,

    #[serde(default = "default_posts_path")]
    pub posts_path: PathBuf,

    #[serde(default = "default_output_path")]
    pub output_path: PathBuf,

    #[serde(default)]
    pub assignments_path: Option<PathBuf>,

    #[serde(default)]
    pub store_db_path: Option<PathBuf>,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    #[serde(default = "default_threshold")]
    pub threshold: f64,

    #[serde(default)]
    pub merge_policy: MergePolicy,

    /// 0 accepts every category at or above the threshold
    #[serde(default)]
    pub embedding_top_k: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingSection {
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Overrides the selected provider's model
    #[serde(default)]
    pub model: Option<String>,

    /// 0 leaves the dimension to the provider
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,

    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_embedding_retries")]
    pub retries: u32,

    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    #[serde(default)]
    pub ollama: OllamaConfig,

    #[serde(default)]
    pub openai: OpenAiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    #[serde(default = "default_ollama_base_url")]
    pub base_url: String,

    #[serde(default = "default_ollama_model")]
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    #[serde(default = "default_openai_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_openai_base_url")]
    pub base_url: String,

    #[serde(default = "default_openai_model")]
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverageConfig {
    #[serde(default = "default_min_total_posts")]
    pub min_total_posts: usize,

    #[serde(default = "default_min_category_posts")]
    pub min_category_posts: usize,
}

// Default value functions
fn default_taxonomy_path() -> PathBuf {
    PathBuf::from("./taxonomy.toml")
}

fn default_posts_path() -> PathBuf {
    PathBuf::from("./posts.json")
}

fn default_output_path() -> PathBuf {
    PathBuf::from("./report.json")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_concurrent() -> usize {
    4
}

fn default_batch_size() -> usize {
    64
}

fn default_threshold() -> f64 {
    0.55
}

fn default_provider() -> String {
    "hashing".to_string()
}

fn default_ollama_model() -> String {
    "nomic-embed-text".to_string()
}

fn default_openai_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_dimensions() -> usize {
    256
}

fn default_timeout() -> u64 {
    30
}

fn default_embedding_retries() -> u32 {
    1
}

fn default_max_in_flight() -> usize {
    4
}

fn default_ollama_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_openai_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_min_total_posts() -> usize {
    100
}

fn default_min_category_posts() -> usize {
    10
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            taxonomy_path: default_taxonomy_path(),
            posts_path: default_posts_path(),
            output_path: default_output_path(),
            assignments_path: None,
            store_db_path: None,
            log_level: default_log_level(),
            max_concurrent: default_max_concurrent(),
            batch_size: default_batch_size(),
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            merge_policy: MergePolicy::default(),
            embedding_top_k: 0,
        }
    }
}

impl Default for EmbeddingSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dimensions: default_dimensions(),
            timeout_secs: default_timeout(),
            retries: default_embedding_retries(),
            max_in_flight: default_max_in_flight(),
            ollama: OllamaConfig::default(),
            openai: OpenAiConfig::default(),
        }
    }
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: default_ollama_base_url(),
            model: default_ollama_model(),
        }
    }
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_openai_api_key_env(),
            base_url: default_openai_base_url(),
            model: default_openai_model(),
        }
    }
}

impl Default for CoverageConfig {
    fn default() -> Self {
        Self {
            min_total_posts: default_min_total_posts(),
            min_category_posts: default_min_category_posts(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file and environment
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        // Try default config path if none specified
        let default_path = PathBuf::from("./config.toml");
        let path = config_path.unwrap_or(&default_path);

        if path.exists() {
            builder = builder.add_source(config::File::from(path));
        } else if config_path.is_some() {
            // User specified a path that doesn't exist
            anyhow::bail!("Config file not found: {}", path.display());
        }

        // Add environment variable overrides
        builder = builder.add_source(
            config::Environment::with_prefix("POST_CLASSIFIER")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    pub fn classify_config(&self) -> ClassifyConfig {
        ClassifyConfig {
            threshold: self.classifier.threshold,
            merge_policy: self.classifier.merge_policy,
            embedding_top_k: match self.classifier.embedding_top_k {
                0 => None,
                k => Some(k),
            },
            ..ClassifyConfig::default()
        }
    }

    pub fn embedding_config(&self) -> EmbeddingConfig {
        EmbeddingConfig {
            timeout: Duration::from_secs(self.embedding.timeout_secs),
            retries: self.embedding.retries,
            max_in_flight: self.embedding.max_in_flight,
        }
    }

    /// Model for the selected provider: the explicit override, else the
    /// provider section's own model
    pub fn embedding_model(&self) -> &str {
        if let Some(model) = &self.embedding.model {
            return model;
        }
        match self.embedding.provider.as_str() {
            "openai" => &self.embedding.openai.model,
            _ => &self.embedding.ollama.model,
        }
    }

    pub fn run_config(&self) -> RunConfig {
        RunConfig {
            max_concurrent: self.general.max_concurrent,
            batch_size: self.general.batch_size,
        }
    }

    pub fn coverage_policy(&self) -> CoveragePolicy {
        CoveragePolicy {
            min_total_posts: self.coverage.min_total_posts,
            min_category_posts: self.coverage.min_category_posts,
        }
    }

    /// Generate example configuration as TOML string
    pub fn example_toml() -> String {
        r#"# post-classifier configuration

[general]
taxonomy_path = "./taxonomy.toml"
posts_path = "./posts.json"
output_path = "./report.json"
# assignments_path = "./assignments.jsonl"
# store_db_path = "./assignments.sqlite"
log_level = "info"
max_concurrent = 4
batch_size = 64

[classifier]
threshold = 0.55
merge_policy = "fallback"  # fallback, corroborate
# 0 accepts every category at or above the threshold
embedding_top_k = 0

[embedding]
provider = "hashing"  # hashing, ollama, openai, none
# Overrides the provider's model below
# model = "nomic-embed-text"
# 0 leaves the dimension to the provider
dimensions = 256
timeout_secs = 30
retries = 1
max_in_flight = 4

[embedding.ollama]
base_url = "http://localhost:11434"
model = "nomic-embed-text"

[embedding.openai]
api_key_env = "OPENAI_API_KEY"
base_url = "https://api.openai.com/v1"
model = "text-embedding-3-small"

[coverage]
min_total_posts = 100
min_category_posts = 10
"#
        .to_string()
    }
}
