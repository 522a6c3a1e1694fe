use std::collections::{BTreeMap, HashMap};

use super::{Command, IndexObserver, Value};

/// Result of applying a single command to the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    /// SET / DELETE / BULK_SET / NOOP acknowledge with a plain OK.
    Ok,
    /// INCR reports the new integer value.
    Int(i64),
}

/// Command-level apply failure. The entry still counts as applied; this is
/// the caller's error, not a consensus error.
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyError {
    TypeMismatch { key: String },
}

impl std::fmt::Display for ApplyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApplyError::TypeMismatch { .. } => write!(f, "type mismatch"),
        }
    }
}

/// The in-memory state machine: a map of key to value, fed exclusively by
/// committed log entries in strictly increasing index order.
#[derive(Debug, Default)]
pub struct KvStore {
    map: HashMap<String, Value>,
}

impl KvStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.map.get(key)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Consistent copy of the whole store, ordered by key.
    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        self.map
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Apply one committed command. Deterministic; must be called exactly
    /// once per entry, in index order. The observer is notified after each
    /// key mutation with the new value (`None` for a deletion).
    pub fn apply(
        &mut self,
        index: u64,
        command: &Command,
        observer: &mut dyn IndexObserver,
    ) -> Result<ApplyOutcome, ApplyError> {
        match command {
            Command::Noop => Ok(ApplyOutcome::Ok),
            Command::Set { key, value } => {
                self.map.insert(key.clone(), value.clone());
                observer.on_apply(key, Some(value), index);
                Ok(ApplyOutcome::Ok)
            }
            Command::Delete { key } => {
                // Deleting an absent key is a no-op, not an error.
                if self.map.remove(key).is_some() {
                    observer.on_apply(key, None, index);
                }
                Ok(ApplyOutcome::Ok)
            }
            Command::Incr { key, amount } => {
                let current = match self.map.get(key) {
                    None => 0,
                    Some(Value::Int(n)) => *n,
                    Some(_) => {
                        return Err(ApplyError::TypeMismatch { key: key.clone() });
                    }
                };
                let next = current.wrapping_add(*amount);
                let value = Value::Int(next);
                self.map.insert(key.clone(), value.clone());
                observer.on_apply(key, Some(&value), index);
                Ok(ApplyOutcome::Int(next))
            }
            Command::BulkSet { items } => {
                // A BULK_SET travels as a single log entry, so the WAL already
                // makes it all-or-nothing across crashes; individual sets
                // cannot fail, which keeps the in-memory update atomic too.
                for (key, value) in items {
                    self.map.insert(key.clone(), value.clone());
                    observer.on_apply(key, Some(value), index);
                }
                Ok(ApplyOutcome::Ok)
            }
        }
    }
}
