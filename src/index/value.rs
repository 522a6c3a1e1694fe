use std::collections::{BTreeSet, HashMap};

use crate::kv::Value;

/// Secondary index over one field of map-shaped values.
///
/// The special field name `_value` indexes the entire value instead of a
/// field. Indexed values are keyed by their canonical JSON rendering so any
/// value shape can serve as a lookup key.
#[derive(Debug)]
pub struct ValueIndex {
    field: String,
    index: HashMap<String, BTreeSet<String>>,
}

impl ValueIndex {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            index: HashMap::new(),
        }
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    fn indexed_repr(&self, value: &Value) -> Option<String> {
        let target = if self.field == "_value" {
            Some(value)
        } else {
            match value {
                Value::Map(fields) => fields.get(&self.field),
                _ => None,
            }
        };
        target.and_then(|v| serde_json::to_string(v).ok())
    }

    pub fn add(&mut self, key: &str, value: &Value) {
        if let Some(repr) = self.indexed_repr(value) {
            self.index.entry(repr).or_default().insert(key.to_string());
        }
    }

    pub fn remove(&mut self, key: &str, value: &Value) {
        if let Some(repr) = self.indexed_repr(value) {
            if let Some(keys) = self.index.get_mut(&repr) {
                keys.remove(key);
                if keys.is_empty() {
                    self.index.remove(&repr);
                }
            }
        }
    }

    /// All keys whose indexed field equals `value`, in key order.
    pub fn query(&self, value: &Value) -> Vec<String> {
        serde_json::to_string(value)
            .ok()
            .and_then(|repr| self.index.get(&repr))
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn user(city: &str) -> Value {
        let mut fields = BTreeMap::new();
        fields.insert("city".to_string(), Value::from(city));
        Value::Map(fields)
    }

    #[test]
    fn test_query_by_field_value() {
        let mut index = ValueIndex::new("city");
        index.add("u1", &user("oslo"));
        index.add("u2", &user("oslo"));
        index.add("u3", &user("bergen"));

        assert_eq!(index.query(&Value::from("oslo")), vec!["u1", "u2"]);
        assert_eq!(index.query(&Value::from("bergen")), vec!["u3"]);
        assert!(index.query(&Value::from("tromso")).is_empty());
    }

    #[test]
    fn test_remove_clears_entry() {
        let mut index = ValueIndex::new("city");
        index.add("u1", &user("oslo"));
        index.remove("u1", &user("oslo"));
        assert!(index.query(&Value::from("oslo")).is_empty());
    }

    #[test]
    fn test_whole_value_index() {
        let mut index = ValueIndex::new("_value");
        index.add("k1", &Value::Int(7));
        index.add("k2", &Value::Int(7));
        assert_eq!(index.query(&Value::Int(7)), vec!["k1", "k2"]);
    }

    #[test]
    fn test_non_map_values_skip_field_indexes() {
        let mut index = ValueIndex::new("city");
        index.add("plain", &Value::from("oslo"));
        assert!(index.query(&Value::from("oslo")).is_empty());
    }
}
