use serde::{Deserialize, Serialize};

use crate::kv::Command;

/// Type alias for term numbers
pub type Term = u64;

/// Type alias for log indices (1-based, dense)
pub type LogIndex = u64;

/// Node identifier. Nodes are identified by their advertised `host:port`
/// address so that leader hints in redirects are directly dialable.
pub type NodeId = String;

/// A single entry in the replicated log
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogEntry {
    /// The term when this entry was created
    pub term: Term,
    /// The index of this entry in the log
    pub index: LogIndex,
    /// The state machine mutation
    pub command: Command,
    /// Originating client, when the client supplied one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Client sequence number, when supplied
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
}

impl LogEntry {
    pub fn new(term: Term, index: LogIndex, command: Command) -> Self {
        Self {
            term,
            index,
            command,
            client_id: None,
            seq: None,
        }
    }
}
