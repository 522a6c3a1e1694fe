use super::rpc::{RequestVoteRequest, RequestVoteResponse};
use super::state::RaftState;
use super::types::NodeId;
use crate::storage::{LogStorage, StateStorage};
use crate::util::errors::Result;

/// Handle incoming RequestVote RPC. The vote decision is persisted before
/// the response is returned, so a reply never outruns the durable vote.
pub fn handle_request_vote(
    raft_state: &mut RaftState,
    state_storage: &mut dyn StateStorage,
    log_storage: &dyn LogStorage,
    request: RequestVoteRequest,
) -> Result<RequestVoteResponse> {
    tracing::debug!(
        "Node {} received RequestVote from {} (term: {})",
        raft_state.node_id,
        request.candidate_id,
        request.term
    );

    // If request term is greater, adopt it and become follower
    if request.term > raft_state.current_term {
        raft_state.update_term(request.term);
        state_storage.save_term(raft_state.current_term)?;
        state_storage.save_voted_for(None)?;
    }

    let mut vote_granted = false;

    if request.term >= raft_state.current_term {
        let can_vote = raft_state.voted_for.is_none()
            || raft_state.voted_for.as_ref() == Some(&request.candidate_id);

        if can_vote {
            // Candidate's log must be at least as up-to-date as ours
            let last_log_term = log_storage.last_term();
            let last_log_index = log_storage.last_index();

            let log_is_up_to_date = request.last_log_term > last_log_term
                || (request.last_log_term == last_log_term
                    && request.last_log_index >= last_log_index);

            if log_is_up_to_date {
                vote_granted = true;
                raft_state.voted_for = Some(request.candidate_id.clone());
                state_storage.save_voted_for(raft_state.voted_for.clone())?;

                tracing::info!(
                    "Node {} granted vote to {} in term {}",
                    raft_state.node_id,
                    request.candidate_id,
                    request.term
                );
            } else {
                tracing::debug!(
                    "Node {} denied vote to {} - log not up-to-date",
                    raft_state.node_id,
                    request.candidate_id
                );
            }
        } else {
            tracing::debug!(
                "Node {} denied vote to {} - already voted for {:?}",
                raft_state.node_id,
                request.candidate_id,
                raft_state.voted_for
            );
        }
    } else {
        tracing::debug!(
            "Node {} denied vote to {} - request term {} < current term {}",
            raft_state.node_id,
            request.candidate_id,
            request.term,
            raft_state.current_term
        );
    }

    Ok(RequestVoteResponse {
        term: raft_state.current_term,
        vote_granted,
    })
}

/// Handle incoming RequestVote response. Returns true when this vote wins
/// the election.
pub fn handle_request_vote_response(
    raft_state: &mut RaftState,
    state_storage: &mut dyn StateStorage,
    from: NodeId,
    response: RequestVoteResponse,
    total_nodes: usize,
) -> Result<bool> {
    // If response term is greater, step down
    if response.term > raft_state.current_term {
        raft_state.update_term(response.term);
        state_storage.save_term(raft_state.current_term)?;
        state_storage.save_voted_for(None)?;
        return Ok(false);
    }

    // Ignore if we're not a candidate anymore
    if !raft_state.is_candidate() {
        return Ok(false);
    }

    // Ignore stale responses
    if response.term < raft_state.current_term {
        return Ok(false);
    }

    if response.vote_granted {
        raft_state.add_vote(from.clone());

        tracing::debug!(
            "Node {} received vote from {} ({}/{} votes)",
            raft_state.node_id,
            from,
            raft_state.votes_received.len(),
            total_nodes
        );

        if raft_state.has_majority(total_nodes) {
            tracing::info!(
                "Node {} won election in term {} with {} votes",
                raft_state.node_id,
                raft_state.current_term,
                raft_state.votes_received.len()
            );
            return Ok(true);
        }
    }

    Ok(false)
}

/// Create a RequestVote request for this node
pub fn create_request_vote(
    raft_state: &RaftState,
    log_storage: &dyn LogStorage,
) -> RequestVoteRequest {
    RequestVoteRequest {
        term: raft_state.current_term,
        candidate_id: raft_state.node_id.clone(),
        last_log_index: log_storage.last_index(),
        last_log_term: log_storage.last_term(),
    }
}
