//! SQLite classification store

use async_trait::async_trait;
use post_classifier_domain::{Assignment, ClassificationStore, Layer, Method, StoreError};
use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
use std::path::Path;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// SQLite-backed store, persistent across runs
pub struct SqliteClassificationStore {
    pool: SqlitePool,
}

type AssignmentRow = (String, String, String, String, f64, String);

impl SqliteClassificationStore {
    /// Open (or create) the database at `db_path`
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db_path = db_path.as_ref();

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::Database(format!("Failed to create directory: {}", e))
                })?;
            }
        }

        let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&db_url)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations().await?;

        Ok(store)
    }

    /// Create an in-memory SQLite store (for testing)
    pub async fn in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations().await?;

        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS assignments (
                post_id TEXT NOT NULL,
                layer TEXT NOT NULL,
                category TEXT NOT NULL,
                method TEXT NOT NULL,
                confidence REAL NOT NULL,
                assigned_at TEXT NOT NULL,
                PRIMARY KEY (post_id, layer, category)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(())
    }
}

fn format_timestamp(timestamp: OffsetDateTime) -> Result<String, StoreError> {
    timestamp
        .format(&Rfc3339)
        .map_err(|e| StoreError::Serialization(e.to_string()))
}

fn from_row(row: AssignmentRow) -> Result<Assignment, StoreError> {
    let (post_id, layer, category, method, confidence, assigned_at) = row;
    Ok(Assignment {
        post_id,
        layer: layer
            .parse::<Layer>()
            .map_err(|e| StoreError::Serialization(e.to_string()))?,
        category,
        method: method.parse::<Method>().map_err(StoreError::Serialization)?,
        confidence,
        assigned_at: OffsetDateTime::parse(&assigned_at, &Rfc3339)
            .map_err(|e| StoreError::Serialization(e.to_string()))?,
    })
}

const UPSERT: &str = r#"
    INSERT INTO assignments (post_id, layer, category, method, confidence, assigned_at)
    VALUES (?, ?, ?, ?, ?, ?)
    ON CONFLICT(post_id, layer, category) DO UPDATE SET
        method = excluded.method,
        confidence = excluded.confidence,
        assigned_at = excluded.assigned_at
"#;

#[async_trait]
impl ClassificationStore for SqliteClassificationStore {
    async fn record(&self, assignment: &Assignment) -> Result<(), StoreError> {
        sqlx::query(UPSERT)
            .bind(&assignment.post_id)
            .bind(assignment.layer.as_str())
            .bind(&assignment.category)
            .bind(assignment.method.as_str())
            .bind(assignment.confidence)
            .bind(format_timestamp(assignment.assigned_at)?)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(())
    }

    async fn replace_post(
        &self,
        post_id: &str,
        assignments: &[Assignment],
    ) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        sqlx::query("DELETE FROM assignments WHERE post_id = ?")
            .bind(post_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        for assignment in assignments {
            sqlx::query(UPSERT)
                .bind(&assignment.post_id)
                .bind(assignment.layer.as_str())
                .bind(&assignment.category)
                .bind(assignment.method.as_str())
                .bind(assignment.confidence)
                .bind(format_timestamp(assignment.assigned_at)?)
                .execute(&mut *tx)
                .await
                .map_err(|e| StoreError::Database(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(())
    }

    async fn assignments(&self) -> Result<Vec<Assignment>, StoreError> {
        let rows: Vec<AssignmentRow> = sqlx::query_as(
            "SELECT post_id, layer, category, method, confidence, assigned_at FROM assignments",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        let mut assignments = rows
            .into_iter()
            .map(from_row)
            .collect::<Result<Vec<_>, _>>()?;
        assignments.sort_by_key(Assignment::key);
        Ok(assignments)
    }
}
