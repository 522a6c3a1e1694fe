use std::collections::HashMap;

use crate::kv::{IndexObserver, Value};
use crate::util::errors::{Result, StoreError};

use super::{EmbeddingIndex, InvertedIndex, ValueIndex};

/// Owns every index and keeps them current from the apply path.
///
/// Indexes are node-local materialized views: they are not replicated
/// through the log, and each node rebuilds them as entries are applied
/// after a restart.
#[derive(Debug, Default)]
pub struct IndexManager {
    value_indexes: HashMap<String, ValueIndex>,
    inverted: InvertedIndex,
    embedding: EmbeddingIndex,
    /// Last indexed value per key, needed to unindex on overwrite/delete.
    docs: HashMap<String, Value>,
}

impl IndexManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a secondary index on `field`. Only values set after creation
    /// are indexed; existing keys are not backfilled.
    pub fn create_value_index(&mut self, field: &str) {
        self.value_indexes
            .entry(field.to_string())
            .or_insert_with(|| ValueIndex::new(field));
    }

    pub fn query_value_index(&self, field: &str, value: &Value) -> Result<Vec<String>> {
        self.value_indexes
            .get(field)
            .map(|idx| idx.query(value))
            .ok_or_else(|| StoreError::ProtocolError(format!("no index on field '{}'", field)))
    }

    pub fn search(&self, query: &str, top_k: usize) -> Vec<(String, f64)> {
        self.inverted.search(query, top_k)
    }

    pub fn semantic_search(&self, query: &str, top_k: usize) -> Vec<(String, f64)> {
        self.embedding.semantic_search(query, top_k)
    }

    fn index_set(&mut self, key: &str, value: &Value) {
        if let Some(old) = self.docs.get(key).cloned() {
            for idx in self.value_indexes.values_mut() {
                idx.remove(key, &old);
            }
            self.inverted.remove(key);
            self.embedding.remove(key);
        }

        for idx in self.value_indexes.values_mut() {
            idx.add(key, value);
        }
        let text = value.index_text();
        self.inverted.add(key, &text);
        self.embedding.add(key, &text);
        self.docs.insert(key.to_string(), value.clone());
    }

    fn index_delete(&mut self, key: &str) {
        if let Some(old) = self.docs.remove(key) {
            for idx in self.value_indexes.values_mut() {
                idx.remove(key, &old);
            }
            self.inverted.remove(key);
            self.embedding.remove(key);
        }
    }
}

impl IndexObserver for IndexManager {
    fn on_apply(&mut self, key: &str, value: Option<&Value>, _index: u64) {
        match value {
            Some(v) => self.index_set(key, v),
            None => self.index_delete(key),
        }
    }
}
