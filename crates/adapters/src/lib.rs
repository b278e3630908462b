//! post-classifier adapters crate
//!
//! This crate contains infrastructure adapters implementing the domain ports:
//! - `taxonomy`: Filesystem taxonomy loader (TOML / JSON)
//! - `posts`: Filesystem post loader (JSON array / JSON Lines)
//! - `embedding`: Embedding providers (Ollama, OpenAI, offline hashing, stub)
//! - `store`: In-memory and SQLite classification stores
//! - `report`: Report and assignment writers

mod posts_fs;
mod report_fs;
mod store_memory;
mod store_sqlite;
mod taxonomy_fs;

pub mod embedding;

/// Re-exports for taxonomy adapters
pub mod taxonomy {
    pub use crate::taxonomy_fs::{FsTaxonomySource, TaxonomyFormat, parse_taxonomy};
}

/// Re-exports for post adapters
pub mod posts {
    pub use crate::posts_fs::{FsPostSource, validate_posts};
}

/// Re-exports for store adapters
pub mod store {
    pub use crate::store_memory::InMemoryClassificationStore;
    pub use crate::store_sqlite::SqliteClassificationStore;
}

/// Re-exports for output writers
pub mod report {
    pub use crate::report_fs::{ReportWriteError, write_assignments, write_report};
}
