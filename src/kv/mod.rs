pub mod store;

pub use store::{ApplyError, ApplyOutcome, KvStore};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A stored value. JSON is the canonical encoding, so the wire and disk
/// representation of each variant is the natural JSON string, integer or
/// object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Str(String),
    Int(i64),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Searchable text for the full-text and embedding indexes: strings as
    /// themselves, maps as the concatenation of their string fields, integers
    /// as their decimal rendering.
    pub fn index_text(&self) -> String {
        match self {
            Value::Str(s) => s.clone(),
            Value::Int(n) => n.to_string(),
            Value::Map(fields) => {
                let parts: Vec<&str> = fields
                    .values()
                    .filter_map(|v| match v {
                        Value::Str(s) => Some(s.as_str()),
                        _ => None,
                    })
                    .collect();
                parts.join(" ")
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

/// A state machine mutation carried by a log entry.
///
/// NOOP entries are appended by a newly elected leader as the first entry of
/// its term to establish commit ordering; they never touch the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    Noop,
    Set { key: String, value: Value },
    Delete { key: String },
    Incr { key: String, amount: i64 },
    BulkSet { items: Vec<(String, Value)> },
}

impl Command {
    /// On-disk record tag. Part of the WAL record format, do not renumber.
    pub fn tag(&self) -> u8 {
        match self {
            Command::Noop => 0,
            Command::Set { .. } => 1,
            Command::Delete { .. } => 2,
            Command::Incr { .. } => 3,
            Command::BulkSet { .. } => 4,
        }
    }
}

/// Callback invoked after every applied mutation, in commit order.
///
/// `value` is the new value, or `None` for a deletion tombstone. Observers
/// run synchronously inside the apply loop and must not suspend.
pub trait IndexObserver {
    fn on_apply(&mut self, key: &str, value: Option<&Value>, index: u64);
}

/// Observer that ignores everything; used by tests that only exercise the
/// store itself.
pub struct NullObserver;

impl IndexObserver for NullObserver {
    fn on_apply(&mut self, _key: &str, _value: Option<&Value>, _index: u64) {}
}
