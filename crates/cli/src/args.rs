//! CLI argument definitions

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// post-classifier: classify forum posts into a three-layer taxonomy using
/// keyword/regex rules with embedding-similarity fallback
#[derive(Parser, Debug)]
#[command(name = "post-classifier")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Classify a post corpus and write the coverage report
    Classify(ClassifyArgs),

    /// Inspect and validate the taxonomy
    Taxonomy(TaxonomyArgs),

    /// Configuration management
    Config(ConfigArgs),
}

#[derive(Args, Debug)]
pub struct ClassifyArgs {
    /// Taxonomy document (TOML, or JSON with a .json extension)
    #[arg(long)]
    pub taxonomy: Option<PathBuf>,

    /// Posts file (JSON array, or JSON Lines with a .jsonl extension)
    #[arg(long)]
    pub posts: Option<PathBuf>,

    /// Where to write the JSON report
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Minimum embedding similarity for an assignment, in [0, 1]
    #[arg(long)]
    pub threshold: Option<f64>,

    /// Also write every assignment as JSON Lines
    #[arg(long)]
    pub assignments: Option<PathBuf>,

    /// Persist assignments in this SQLite database instead of memory
    #[arg(long)]
    pub store_db: Option<PathBuf>,

    /// Embedding provider override (hashing, ollama, openai, none)
    #[arg(long)]
    pub provider: Option<String>,
}

#[derive(Args, Debug)]
pub struct TaxonomyArgs {
    #[command(subcommand)]
    pub command: TaxonomyCommands,
}

#[derive(Subcommand, Debug)]
pub enum TaxonomyCommands {
    /// Validate the taxonomy document
    Validate {
        /// Override taxonomy path
        #[arg(long)]
        taxonomy: Option<PathBuf>,
    },

    /// List layers and categories
    List {
        /// Override taxonomy path
        #[arg(long)]
        taxonomy: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Generate example configuration file
    Init {
        /// Path to write config file
        #[arg(long, default_value = "./config.toml")]
        path: PathBuf,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },
}
