use std::collections::{HashMap, HashSet};
use std::time::Instant;

use super::types::{LogIndex, NodeId, Term};

/// The three states a Raft node can be in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Follower state - receives updates from leader
    Follower,
    /// Candidate state - requesting votes for leadership
    Candidate,
    /// Leader state - manages log replication
    Leader,
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeState::Follower => write!(f, "Follower"),
            NodeState::Candidate => write!(f, "Candidate"),
            NodeState::Leader => write!(f, "Leader"),
        }
    }
}

/// Complete volatile state of a Raft node plus the cached persistent fields.
#[derive(Debug, Clone)]
pub struct RaftState {
    // Persistent state on all servers (mirrored to disk by the actor)
    /// Latest term server has seen (initialized to 0)
    pub current_term: Term,
    /// Candidate that received vote in current term (or None)
    pub voted_for: Option<NodeId>,

    // Volatile state on all servers
    /// Index of highest log entry known to be committed
    pub commit_index: LogIndex,
    /// Index of highest log entry applied to state machine
    pub last_applied: LogIndex,
    /// Current role of this node
    pub state: NodeState,
    /// Address of the current leader (if known)
    pub current_leader: Option<NodeId>,
    /// This node's address
    pub node_id: NodeId,

    // Volatile state on leaders (reinitialized after election)
    /// For each server, index of the next log entry to send to that server
    pub next_index: HashMap<NodeId, LogIndex>,
    /// For each server, index of highest log entry known to be replicated on server
    pub match_index: HashMap<NodeId, LogIndex>,
    /// First index of the leader's own term (its NOOP). Linearizable reads
    /// are gated on this index being committed; 0 while unknown.
    pub term_start_index: LogIndex,
    /// Last time each peer acknowledged an RPC, for the step-down check
    pub peer_acks: HashMap<NodeId, Instant>,

    // Election state for candidates
    /// Set of nodes that voted for this candidate in current election
    pub votes_received: HashSet<NodeId>,
}

impl RaftState {
    pub fn new(node_id: NodeId) -> Self {
        Self {
            current_term: 0,
            voted_for: None,
            commit_index: 0,
            last_applied: 0,
            state: NodeState::Follower,
            current_leader: None,
            node_id,
            next_index: HashMap::new(),
            match_index: HashMap::new(),
            term_start_index: 0,
            peer_acks: HashMap::new(),
            votes_received: HashSet::new(),
        }
    }

    pub fn is_leader(&self) -> bool {
        self.state == NodeState::Leader
    }

    pub fn is_candidate(&self) -> bool {
        self.state == NodeState::Candidate
    }

    /// Adopt a newer term: become follower, forget our vote.
    pub fn update_term(&mut self, term: Term) {
        self.current_term = term;
        self.state = NodeState::Follower;
        self.voted_for = None;
        self.current_leader = None;
        self.term_start_index = 0;
        self.votes_received.clear();
    }

    /// Transition to follower state
    pub fn become_follower(&mut self, term: Term, leader: Option<NodeId>) {
        tracing::info!(
            "Node {} transitioning to Follower (term: {})",
            self.node_id,
            term
        );
        self.state = NodeState::Follower;
        self.current_term = term;
        self.current_leader = leader;
        self.term_start_index = 0;
        self.votes_received.clear();
    }

    /// Transition to candidate state for a fresh election
    pub fn become_candidate(&mut self) {
        self.current_term += 1;
        self.state = NodeState::Candidate;
        self.voted_for = Some(self.node_id.clone());
        self.current_leader = None;
        self.term_start_index = 0;
        self.votes_received.clear();
        self.votes_received.insert(self.node_id.clone());

        tracing::info!(
            "Node {} transitioning to Candidate (term: {})",
            self.node_id,
            self.current_term
        );
    }

    /// Transition to leader state
    pub fn become_leader(&mut self, last_log_index: LogIndex, peer_ids: &[NodeId]) {
        tracing::info!(
            "Node {} transitioning to Leader (term: {})",
            self.node_id,
            self.current_term
        );

        self.state = NodeState::Leader;
        self.current_leader = Some(self.node_id.clone());
        self.term_start_index = 0;

        self.next_index.clear();
        self.match_index.clear();
        self.peer_acks.clear();
        let now = Instant::now();
        for peer_id in peer_ids {
            if *peer_id != self.node_id {
                self.next_index.insert(peer_id.clone(), last_log_index + 1);
                self.match_index.insert(peer_id.clone(), 0);
                self.peer_acks.insert(peer_id.clone(), now);
            }
        }
    }

    pub fn add_vote(&mut self, from: NodeId) {
        self.votes_received.insert(from);
    }

    /// Strict majority of the cluster (peers + self).
    pub fn has_majority(&self, total_nodes: usize) -> bool {
        self.votes_received.len() > total_nodes / 2
    }

    /// True while a majority of the cluster (counting ourselves) has
    /// acknowledged an RPC within `window`. Used by leaders to step down
    /// when partitioned away from the quorum.
    pub fn quorum_alive(&self, total_nodes: usize, window: std::time::Duration) -> bool {
        let now = Instant::now();
        let mut alive = 1; // ourselves
        for acked_at in self.peer_acks.values() {
            if now.duration_since(*acked_at) <= window {
                alive += 1;
            }
        }
        alive > total_nodes / 2
    }
}
