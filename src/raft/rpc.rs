use serde::{Deserialize, Serialize};

use super::types::{LogEntry, NodeId, Term};

/// RequestVote RPC - Invoked by candidates to gather votes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestVoteRequest {
    /// Candidate's term
    pub term: Term,
    /// Candidate requesting vote
    pub candidate_id: NodeId,
    /// Index of candidate's last log entry
    pub last_log_index: u64,
    /// Term of candidate's last log entry
    pub last_log_term: Term,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestVoteResponse {
    /// Current term, for candidate to update itself
    pub term: Term,
    /// True means candidate received vote
    pub vote_granted: bool,
}

/// AppendEntries RPC - Invoked by leader to replicate log entries and as heartbeat
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesRequest {
    /// Leader's term
    pub term: Term,
    /// Leader address, so followers can redirect clients
    pub leader_id: NodeId,
    /// Index of log entry immediately preceding new ones
    pub prev_log_index: u64,
    /// Term of prev_log_index entry
    pub prev_log_term: Term,
    /// Log entries to store (empty for heartbeat)
    pub entries: Vec<LogEntry>,
    /// Leader's commit index
    pub leader_commit: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesResponse {
    /// Current term, for leader to update itself
    pub term: Term,
    /// True if follower contained entry matching prev_log_index and prev_log_term
    pub success: bool,
    /// First index of the conflicting term, for faster backtracking
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict_index: Option<u64>,
    /// Term of the conflicting entry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict_term: Option<Term>,
}

/// Wrapper for all peer RPC messages. On the wire this is one JSON object
/// per line, discriminated by the `type` field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RaftMessage {
    #[serde(rename = "request_vote")]
    RequestVote(RequestVoteRequest),
    #[serde(rename = "request_vote_reply")]
    RequestVoteResponse(RequestVoteResponse),
    #[serde(rename = "append_entries")]
    AppendEntries(AppendEntriesRequest),
    #[serde(rename = "append_entries_reply")]
    AppendEntriesResponse(AppendEntriesResponse),
}
