//! In-memory classification store (default for single runs)

use async_trait::async_trait;
use post_classifier_domain::{Assignment, AssignmentKey, ClassificationStore, StoreError};
use std::collections::BTreeMap;
use std::sync::RwLock;

/// In-memory store keyed by (post id, layer, category)
pub struct InMemoryClassificationStore {
    assignments: RwLock<BTreeMap<AssignmentKey, Assignment>>,
}

impl InMemoryClassificationStore {
    pub fn new() -> Self {
        Self {
            assignments: RwLock::new(BTreeMap::new()),
        }
    }
}

impl Default for InMemoryClassificationStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClassificationStore for InMemoryClassificationStore {
    async fn record(&self, assignment: &Assignment) -> Result<(), StoreError> {
        let mut assignments = self
            .assignments
            .write()
            .map_err(|e| StoreError::Database(e.to_string()))?;
        assignments.insert(assignment.key(), assignment.clone());
        Ok(())
    }

    async fn replace_post(
        &self,
        post_id: &str,
        replacement: &[Assignment],
    ) -> Result<(), StoreError> {
        let mut assignments = self
            .assignments
            .write()
            .map_err(|e| StoreError::Database(e.to_string()))?;
        assignments.retain(|key, _| key.post_id != post_id);
        for assignment in replacement {
            assignments.insert(assignment.key(), assignment.clone());
        }
        Ok(())
    }

    async fn assignments(&self) -> Result<Vec<Assignment>, StoreError> {
        let assignments = self
            .assignments
            .read()
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(assignments.values().cloned().collect())
    }
}
