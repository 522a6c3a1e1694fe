use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use actix::prelude::*;
use rand::Rng;
use tokio::sync::oneshot;

use super::election::{create_request_vote, handle_request_vote, handle_request_vote_response};
use super::log::{advance_commit_index, create_append_entries, handle_append_entries,
    handle_append_entries_response};
use super::rpc::RaftMessage;
use super::state::{NodeState, RaftState};
use super::types::{LogEntry, LogIndex, NodeId};
use crate::config::RaftConfig;
use crate::index::IndexManager;
use crate::kv::store::ApplyError;
use crate::kv::{ApplyOutcome, Command, KvStore, Value};
use crate::storage::{LogStorage, StateStorage};
use crate::util::errors::{Result, StoreError};

/// Messages that the Raft actor can handle

/// Outgoing RPC for the network layer to deliver
#[derive(Message)]
#[rtype(result = "()")]
pub struct SendRaftMessage {
    pub to: NodeId,
    pub message: RaftMessage,
}

/// Set network address for sending messages
#[derive(Message)]
#[rtype(result = "()")]
pub struct SetNetworkAddress {
    pub addr: Recipient<SendRaftMessage>,
}

/// Handle incoming Raft RPC message. For requests the reply is returned to
/// the caller so it can be written back on the same connection; responses
/// produce no reply.
#[derive(Message)]
#[rtype(result = "Result<Option<RaftMessage>>")]
pub struct HandleRaftMessage {
    pub from: NodeId,
    pub message: RaftMessage,
}

/// The connection to a peer dropped; in-flight RPCs to it will never be
/// answered.
#[derive(Message)]
#[rtype(result = "()")]
pub struct PeerDisconnected {
    pub peer: NodeId,
}

/// Submit a write. Resolves once the entry is committed and applied, with
/// the apply outcome for the client.
#[derive(Message)]
#[rtype(result = "Result<ApplyOutcome>")]
pub struct Propose {
    pub command: Command,
}

/// Linearizable read of one key (leader only, after the term barrier).
#[derive(Message)]
#[rtype(result = "Result<Option<Value>>")]
pub struct ReadKey {
    pub key: String,
}

/// Full-text search against the local indexes.
#[derive(Message)]
#[rtype(result = "Result<Vec<(String, f64)>>")]
pub struct Search {
    pub query: String,
    pub top_k: usize,
}

/// Semantic (TF-IDF cosine) search against the local indexes.
#[derive(Message)]
#[rtype(result = "Result<Vec<(String, f64)>>")]
pub struct SemanticSearch {
    pub query: String,
    pub top_k: usize,
}

/// Create a secondary index on a field of map-shaped values.
#[derive(Message)]
#[rtype(result = "()")]
pub struct CreateIndex {
    pub field: String,
}

/// Query a secondary index for keys whose field equals the value.
#[derive(Message)]
#[rtype(result = "Result<Vec<String>>")]
pub struct QueryIndex {
    pub field: String,
    pub value: Value,
}

/// Get current Raft state (for debugging/monitoring)
#[derive(Message)]
#[rtype(result = "RaftStateInfo")]
pub struct GetState;

#[derive(Debug, Clone)]
pub struct RaftStateInfo {
    pub node_id: NodeId,
    pub state: NodeState,
    pub current_term: u64,
    pub current_leader: Option<NodeId>,
    pub commit_index: u64,
    pub last_applied: u64,
    pub last_log_index: u64,
}

impl<A, M> actix::dev::MessageResponse<A, M> for RaftStateInfo
where
    A: Actor,
    M: Message<Result = RaftStateInfo>,
{
    fn handle(self, _ctx: &mut A::Context, tx: Option<actix::dev::OneshotSender<M::Result>>) {
        if let Some(tx) = tx {
            let _ = tx.send(self);
        }
    }
}

/// Trigger election timeout
struct ElectionTimeout;

impl Message for ElectionTimeout {
    type Result = ();
}

/// Trigger heartbeat (for leaders)
struct HeartbeatTimeout;

impl Message for HeartbeatTimeout {
    type Result = ();
}

type Waiter = oneshot::Sender<Result<ApplyOutcome>>;

/// The Raft node actor.
///
/// Owns the whole consensus aggregate: role state, the durable log, the
/// term/vote file, the applied key-value map and its indexes. Every handler
/// runs as one atomic critical section on the single-threaded runtime, so
/// no other synchronization is needed.
pub struct RaftActor {
    state: RaftState,
    log: Box<dyn LogStorage>,
    state_storage: Box<dyn StateStorage>,
    store: KvStore,
    indexes: IndexManager,
    config: RaftConfig,
    peers: Vec<NodeId>,
    network_addr: Option<Recipient<SendRaftMessage>>,
    election_timeout_handle: Option<SpawnHandle>,
    heartbeat_timeout_handle: Option<SpawnHandle>,
    /// Per-peer FIFO of (prev_log_index, entry count) for RPCs awaiting a
    /// reply; replies arrive in send order on the per-peer stream.
    inflight: HashMap<NodeId, VecDeque<(u64, usize)>>,
    /// Completion slots: client writes waiting for their entry to apply.
    waiters: HashMap<LogIndex, Waiter>,
    heartbeat_count: u64,
}

impl RaftActor {
    pub fn new(
        config: RaftConfig,
        peers: Vec<NodeId>,
        log: Box<dyn LogStorage>,
        state_storage: Box<dyn StateStorage>,
    ) -> Result<Self> {
        let mut state = RaftState::new(config.node_id.clone());
        let persisted = state_storage.load_state()?;
        state.current_term = persisted.current_term;
        state.voted_for = persisted.voted_for;

        Ok(Self {
            state,
            log,
            state_storage,
            store: KvStore::new(),
            indexes: IndexManager::new(),
            config,
            peers,
            network_addr: None,
            election_timeout_handle: None,
            heartbeat_timeout_handle: None,
            inflight: HashMap::new(),
            waiters: HashMap::new(),
            heartbeat_count: 0,
        })
    }

    fn total_nodes(&self) -> usize {
        self.peers.len() + 1
    }

    /// Durability failures are fatal: exit so a restart replays the WAL back
    /// to the last fsynced prefix.
    fn storage_or_exit<T>(&self, result: Result<T>, context: &str) -> T {
        match result {
            Ok(value) => value,
            Err(err) => {
                tracing::error!("Fatal storage failure ({}): {}", context, err);
                std::process::exit(1);
            }
        }
    }

    fn reset_election_timeout(&mut self, ctx: &mut Context<Self>) {
        if let Some(handle) = self.election_timeout_handle.take() {
            ctx.cancel_future(handle);
        }

        let min_ms = self.config.election_timeout_min_ms;
        let max_ms = self.config.election_timeout_max_ms;
        let timeout_ms = rand::thread_rng().gen_range(min_ms..=max_ms);

        tracing::debug!(
            "Node {} reset election timeout to {}ms",
            self.state.node_id,
            timeout_ms
        );

        let handle = ctx.run_later(Duration::from_millis(timeout_ms), |_act, ctx| {
            ctx.notify(ElectionTimeout);
        });
        self.election_timeout_handle = Some(handle);
    }

    fn start_heartbeat_timer(&mut self, ctx: &mut Context<Self>) {
        if let Some(handle) = self.heartbeat_timeout_handle.take() {
            ctx.cancel_future(handle);
        }

        let interval = self.config.heartbeat_interval();
        let handle = ctx.run_interval(interval, |_act, ctx| {
            ctx.notify(HeartbeatTimeout);
        });
        self.heartbeat_timeout_handle = Some(handle);
    }

    fn stop_heartbeat_timer(&mut self, ctx: &mut Context<Self>) {
        if let Some(handle) = self.heartbeat_timeout_handle.take() {
            ctx.cancel_future(handle);
        }
    }

    fn start_election(&mut self, ctx: &mut Context<Self>) {
        self.state.become_candidate();

        let term = self.state.current_term;
        let vote = self.state.voted_for.clone();
        let save = self
            .state_storage
            .save_term(term)
            .and_then(|_| self.state_storage.save_voted_for(vote));
        self.storage_or_exit(save, "persisting election state");

        // A cluster of one wins instantly.
        if self.state.has_majority(self.total_nodes()) {
            self.become_leader_now(ctx);
            return;
        }

        let request = create_request_vote(&self.state, self.log.as_ref());

        tracing::info!(
            "Node {} starting election for term {}",
            self.state.node_id,
            self.state.current_term
        );

        if let Some(network_addr) = &self.network_addr {
            for peer in &self.peers {
                network_addr.do_send(SendRaftMessage {
                    to: peer.clone(),
                    message: RaftMessage::RequestVote(request.clone()),
                });
            }
        } else {
            tracing::warn!("Network address not set, cannot send RequestVote");
        }

        self.reset_election_timeout(ctx);
    }

    fn become_leader_now(&mut self, ctx: &mut Context<Self>) {
        let last_log_index = self.log.last_index();
        let peers = self.peers.clone();
        self.state.become_leader(last_log_index, &peers);
        self.inflight.clear();

        if let Some(handle) = self.election_timeout_handle.take() {
            ctx.cancel_future(handle);
        }

        // First entry of the new term: a NOOP that establishes commit
        // ordering and unlocks the read barrier once it commits.
        let noop_index = last_log_index + 1;
        let entry = LogEntry::new(self.state.current_term, noop_index, Command::Noop);
        let appended = self.log.append(vec![entry]).and_then(|_| self.log.sync());
        self.storage_or_exit(appended, "appending term noop");
        self.state.term_start_index = noop_index;

        advance_commit_index(&mut self.state, self.log.as_ref());
        self.apply_committed_entries();

        self.start_heartbeat_timer(ctx);
        self.replicate_to_peers();
    }

    fn step_down(&mut self, ctx: &mut Context<Self>) {
        tracing::warn!(
            "Leader {} lost contact with a majority, stepping down",
            self.state.node_id
        );
        let term = self.state.current_term;
        self.state.become_follower(term, None);
        self.on_lost_leadership(ctx);
    }

    /// Cleanup shared by every leader-to-follower transition: waiters for
    /// indexes this node can no longer commit resolve as NotLeader.
    fn on_lost_leadership(&mut self, ctx: &mut Context<Self>) {
        self.stop_heartbeat_timer(ctx);
        self.inflight.clear();
        self.fail_waiters();
        self.reset_election_timeout(ctx);
    }

    fn fail_waiters(&mut self) {
        let leader = self.state.current_leader.clone();
        for (_, waiter) in self.waiters.drain() {
            let _ = waiter.send(Err(StoreError::NotLeader {
                leader: leader.clone(),
            }));
        }
    }

    /// Send AppendEntries to every peer, recording the in-flight metadata
    /// needed to interpret the (FIFO) replies.
    fn replicate_to_peers(&mut self) {
        if !self.state.is_leader() {
            return;
        }

        let Some(network_addr) = self.network_addr.clone() else {
            return;
        };

        self.heartbeat_count += 1;
        if self.heartbeat_count % 200 == 0 {
            tracing::info!(
                "Leader {} healthy - term {}, commit_index {}, {} peers",
                self.state.node_id,
                self.state.current_term,
                self.state.commit_index,
                self.peers.len()
            );
        }

        for peer in &self.peers {
            match create_append_entries(&self.state, self.log.as_ref(), peer) {
                Ok(request) => {
                    if !request.entries.is_empty() {
                        tracing::debug!(
                            "Sending {} log entries to {}",
                            request.entries.len(),
                            peer
                        );
                    }
                    self.inflight
                        .entry(peer.clone())
                        .or_default()
                        .push_back((request.prev_log_index, request.entries.len()));
                    network_addr.do_send(SendRaftMessage {
                        to: peer.clone(),
                        message: RaftMessage::AppendEntries(request),
                    });
                }
                Err(e) => {
                    tracing::error!("Failed to create AppendEntries for {}: {}", peer, e);
                }
            }
        }
    }

    /// Apply everything committed but not yet applied, resolving completion
    /// slots along the way. The WAL is fsynced first so nothing reaches the
    /// state machine before it is durable locally.
    fn apply_committed_entries(&mut self) {
        if self.state.commit_index <= self.state.last_applied {
            return;
        }
        let synced = self.log.sync();
        self.storage_or_exit(synced, "syncing before apply");

        while self.state.last_applied < self.state.commit_index {
            let next = self.state.last_applied + 1;
            let entry = match self.log.get(next) {
                Ok(Some(entry)) => entry,
                Ok(None) => {
                    tracing::error!(
                        "Entry {} not found in log but should be applied",
                        next
                    );
                    break;
                }
                Err(e) => {
                    tracing::error!("Failed to read entry {}: {}", next, e);
                    break;
                }
            };

            self.state.last_applied = next;
            tracing::debug!(
                "Node {} applying entry {} (term {})",
                self.state.node_id,
                entry.index,
                entry.term
            );

            let result = self
                .store
                .apply(entry.index, &entry.command, &mut self.indexes)
                .map_err(|ApplyError::TypeMismatch { key }| StoreError::TypeMismatch { key });

            if let Some(waiter) = self.waiters.remove(&entry.index) {
                let _ = waiter.send(result);
            }
        }
    }
}

impl Actor for RaftActor {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::info!(
            "Node {} started (term {}, {} log entries, {} peers)",
            self.state.node_id,
            self.state.current_term,
            self.log.last_index(),
            self.peers.len()
        );

        if self.peers.is_empty() {
            // Standalone node: no one to wait for.
            self.start_election(ctx);
        } else {
            self.reset_election_timeout(ctx);
        }
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        tracing::info!("Node {} stopped", self.state.node_id);
    }
}

impl Handler<SetNetworkAddress> for RaftActor {
    type Result = ();

    fn handle(&mut self, msg: SetNetworkAddress, _ctx: &mut Context<Self>) -> Self::Result {
        self.network_addr = Some(msg.addr);
    }
}

impl Handler<HandleRaftMessage> for RaftActor {
    type Result = Result<Option<RaftMessage>>;

    fn handle(&mut self, msg: HandleRaftMessage, ctx: &mut Context<Self>) -> Self::Result {
        let was_leader = self.state.is_leader();

        let reply = match msg.message {
            RaftMessage::RequestVote(request) => {
                let response = handle_request_vote(
                    &mut self.state,
                    self.state_storage.as_mut(),
                    self.log.as_ref(),
                    request,
                );
                let response = self.storage_or_exit(response, "handling RequestVote");

                if response.vote_granted {
                    self.reset_election_timeout(ctx);
                }
                Some(RaftMessage::RequestVoteResponse(response))
            }

            RaftMessage::RequestVoteResponse(response) => {
                let total_nodes = self.total_nodes();
                let won = handle_request_vote_response(
                    &mut self.state,
                    self.state_storage.as_mut(),
                    msg.from,
                    response,
                    total_nodes,
                );
                let won = self.storage_or_exit(won, "handling vote reply");

                if won {
                    self.become_leader_now(ctx);
                }
                None
            }

            RaftMessage::AppendEntries(request) => {
                let request_term = request.term;
                let response = handle_append_entries(
                    &mut self.state,
                    self.state_storage.as_mut(),
                    self.log.as_mut(),
                    request,
                );
                let response = self.storage_or_exit(response, "handling AppendEntries");

                // Anything from the legitimate leader of our term defers the
                // next election, including consistency-check rejections.
                if request_term == self.state.current_term {
                    self.reset_election_timeout(ctx);
                }

                // Group commit: one fsync covers every entry this RPC
                // appended, and it completes before the reply goes out.
                let synced = self.log.sync();
                self.storage_or_exit(synced, "syncing appended entries");

                self.apply_committed_entries();
                Some(RaftMessage::AppendEntriesResponse(response))
            }

            RaftMessage::AppendEntriesResponse(response) => {
                let (prev_log_index, sent_count) = self
                    .inflight
                    .get_mut(&msg.from)
                    .and_then(|queue| queue.pop_front())
                    .unwrap_or((0, 0));

                self.state
                    .peer_acks
                    .insert(msg.from.clone(), Instant::now());

                let old_commit = self.state.commit_index;
                let handled = handle_append_entries_response(
                    &mut self.state,
                    self.state_storage.as_mut(),
                    self.log.as_ref(),
                    msg.from,
                    response,
                    sent_count,
                    prev_log_index,
                );
                self.storage_or_exit(handled, "handling AppendEntries reply");

                if self.state.commit_index > old_commit {
                    self.apply_committed_entries();
                    // Propagate the new commit index without waiting for the
                    // next heartbeat tick.
                    self.replicate_to_peers();
                }
                None
            }
        };

        if was_leader && !self.state.is_leader() {
            self.on_lost_leadership(ctx);
        }

        Ok(reply)
    }
}

impl Handler<PeerDisconnected> for RaftActor {
    type Result = ();

    fn handle(&mut self, msg: PeerDisconnected, _ctx: &mut Context<Self>) -> Self::Result {
        // Replies for these RPCs will never arrive; drop the FIFO so later
        // replies on a fresh connection line up again.
        self.inflight.remove(&msg.peer);
    }
}

impl Handler<ElectionTimeout> for RaftActor {
    type Result = ();

    fn handle(&mut self, _msg: ElectionTimeout, ctx: &mut Context<Self>) -> Self::Result {
        if self.state.is_leader() {
            return;
        }

        tracing::info!(
            "Node {} election timeout, starting election",
            self.state.node_id
        );
        self.start_election(ctx);
    }
}

impl Handler<HeartbeatTimeout> for RaftActor {
    type Result = ();

    fn handle(&mut self, _msg: HeartbeatTimeout, ctx: &mut Context<Self>) -> Self::Result {
        if !self.state.is_leader() {
            return;
        }

        // A leader cut off from every majority must not keep serving reads.
        if !self.peers.is_empty()
            && !self
                .state
                .quorum_alive(self.total_nodes(), self.config.election_timeout_max())
        {
            self.step_down(ctx);
            return;
        }

        self.replicate_to_peers();
    }
}

impl Handler<Propose> for RaftActor {
    type Result = ResponseFuture<Result<ApplyOutcome>>;

    fn handle(&mut self, msg: Propose, _ctx: &mut Context<Self>) -> Self::Result {
        if !self.state.is_leader() {
            let leader = self.state.current_leader.clone();
            return Box::pin(async move { Err(StoreError::NotLeader { leader }) });
        }

        let index = self.log.last_index() + 1;
        let entry = LogEntry::new(self.state.current_term, index, msg.command);

        if let Err(e) = self.log.append(vec![entry]) {
            return Box::pin(async move { Err(e) });
        }
        let synced = self.log.sync();
        self.storage_or_exit(synced, "syncing proposal");

        tracing::debug!(
            "Leader {} appended entry at index {}",
            self.state.node_id,
            index
        );

        let (tx, rx) = oneshot::channel();
        self.waiters.insert(index, tx);

        if self.peers.is_empty() {
            // Single-node cluster: the local fsync is the quorum.
            advance_commit_index(&mut self.state, self.log.as_ref());
            self.apply_committed_entries();
        } else {
            self.replicate_to_peers();
        }

        Box::pin(async move {
            match rx.await {
                Ok(result) => result,
                Err(_) => Err(StoreError::NotLeader { leader: None }),
            }
        })
    }
}

impl Handler<ReadKey> for RaftActor {
    type Result = Result<Option<Value>>;

    fn handle(&mut self, msg: ReadKey, _ctx: &mut Context<Self>) -> Self::Result {
        if !self.state.is_leader() {
            return Err(StoreError::NotLeader {
                leader: self.state.current_leader.clone(),
            });
        }

        // Leader-lease read barrier: no linearizable reads until an entry of
        // this term has committed and applied.
        if self.state.term_start_index == 0
            || self.state.last_applied < self.state.term_start_index
        {
            return Err(StoreError::NotReady);
        }

        Ok(self.store.get(&msg.key).cloned())
    }
}

impl Handler<Search> for RaftActor {
    type Result = Result<Vec<(String, f64)>>;

    fn handle(&mut self, msg: Search, _ctx: &mut Context<Self>) -> Self::Result {
        Ok(self.indexes.search(&msg.query, msg.top_k))
    }
}

impl Handler<SemanticSearch> for RaftActor {
    type Result = Result<Vec<(String, f64)>>;

    fn handle(&mut self, msg: SemanticSearch, _ctx: &mut Context<Self>) -> Self::Result {
        Ok(self.indexes.semantic_search(&msg.query, msg.top_k))
    }
}

impl Handler<CreateIndex> for RaftActor {
    type Result = ();

    fn handle(&mut self, msg: CreateIndex, _ctx: &mut Context<Self>) -> Self::Result {
        self.indexes.create_value_index(&msg.field);
    }
}

impl Handler<QueryIndex> for RaftActor {
    type Result = Result<Vec<String>>;

    fn handle(&mut self, msg: QueryIndex, _ctx: &mut Context<Self>) -> Self::Result {
        self.indexes.query_value_index(&msg.field, &msg.value)
    }
}

impl Handler<GetState> for RaftActor {
    type Result = RaftStateInfo;

    fn handle(&mut self, _msg: GetState, _ctx: &mut Context<Self>) -> Self::Result {
        RaftStateInfo {
            node_id: self.state.node_id.clone(),
            state: self.state.state,
            current_term: self.state.current_term,
            current_leader: self.state.current_leader.clone(),
            commit_index: self.state.commit_index,
            last_applied: self.state.last_applied,
            last_log_index: self.log.last_index(),
        }
    }
}
