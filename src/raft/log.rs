use super::rpc::{AppendEntriesRequest, AppendEntriesResponse};
use super::state::RaftState;
use super::types::NodeId;
use crate::storage::{LogStorage, StateStorage};
use crate::util::errors::Result;

/// Handle incoming AppendEntries RPC
pub fn handle_append_entries(
    raft_state: &mut RaftState,
    state_storage: &mut dyn StateStorage,
    log_storage: &mut dyn LogStorage,
    request: AppendEntriesRequest,
) -> Result<AppendEntriesResponse> {
    // If request term is greater, adopt it and become follower
    if request.term > raft_state.current_term {
        raft_state.update_term(request.term);
        state_storage.save_term(raft_state.current_term)?;
        state_storage.save_voted_for(None)?;
    }

    // Reply false if term < currentTerm
    if request.term < raft_state.current_term {
        tracing::debug!(
            "Node {} rejected AppendEntries from {} - stale term ({} < {})",
            raft_state.node_id,
            request.leader_id,
            request.term,
            raft_state.current_term
        );

        return Ok(AppendEntriesResponse {
            term: raft_state.current_term,
            success: false,
            conflict_index: None,
            conflict_term: None,
        });
    }

    // Valid leader for this term
    raft_state.current_leader = Some(request.leader_id.clone());

    // A candidate seeing a legitimate leader of its term steps down
    if raft_state.is_candidate() {
        raft_state.become_follower(request.term, Some(request.leader_id.clone()));
    }

    // Check log consistency at prev_log_index
    if request.prev_log_index > 0 {
        match log_storage.get(request.prev_log_index)? {
            None => {
                // Our log is too short
                tracing::debug!(
                    "Node {} rejected AppendEntries - missing entry at index {}",
                    raft_state.node_id,
                    request.prev_log_index
                );

                return Ok(AppendEntriesResponse {
                    term: raft_state.current_term,
                    success: false,
                    conflict_index: Some(log_storage.last_index() + 1),
                    conflict_term: None,
                });
            }
            Some(entry) => {
                if entry.term != request.prev_log_term {
                    tracing::debug!(
                        "Node {} rejected AppendEntries - term mismatch at index {} ({} != {})",
                        raft_state.node_id,
                        request.prev_log_index,
                        entry.term,
                        request.prev_log_term
                    );

                    // Report the first index of the conflicting term so the
                    // leader can back off a whole term at a time.
                    let mut conflict_index = request.prev_log_index;
                    while conflict_index > 1
                        && log_storage.term_at(conflict_index - 1) == entry.term
                    {
                        conflict_index -= 1;
                    }

                    return Ok(AppendEntriesResponse {
                        term: raft_state.current_term,
                        success: false,
                        conflict_index: Some(conflict_index),
                        conflict_term: Some(entry.term),
                    });
                }
            }
        }
    }

    // Append new entries, skipping any identical prefix we already hold
    if !request.entries.is_empty() {
        for (i, new_entry) in request.entries.iter().enumerate() {
            match log_storage.get(new_entry.index)? {
                Some(existing) if existing.term == new_entry.term => {
                    // Already have it; keep scanning.
                }
                Some(_) => {
                    // Conflict: drop this entry and everything after it,
                    // then take the leader's suffix.
                    tracing::info!(
                        "Node {} found log conflict at index {}, truncating",
                        raft_state.node_id,
                        new_entry.index
                    );
                    log_storage.truncate(new_entry.index)?;
                    log_storage.append(request.entries[i..].to_vec())?;
                    break;
                }
                None => {
                    log_storage.append(request.entries[i..].to_vec())?;
                    break;
                }
            }
        }

        tracing::debug!(
            "Node {} holds {} entries after append from leader {}",
            raft_state.node_id,
            log_storage.last_index(),
            request.leader_id
        );
    }

    // Advance our commit index up to what the leader has committed
    if request.leader_commit > raft_state.commit_index {
        let last_new_entry = log_storage.last_index();
        raft_state.commit_index = std::cmp::min(request.leader_commit, last_new_entry);

        tracing::debug!(
            "Node {} updated commit_index to {}",
            raft_state.node_id,
            raft_state.commit_index
        );
    }

    Ok(AppendEntriesResponse {
        term: raft_state.current_term,
        success: true,
        conflict_index: None,
        conflict_term: None,
    })
}

/// Handle AppendEntries response (for leaders)
pub fn handle_append_entries_response(
    raft_state: &mut RaftState,
    state_storage: &mut dyn StateStorage,
    log_storage: &dyn LogStorage,
    from: NodeId,
    response: AppendEntriesResponse,
    sent_entries_count: usize,
    prev_log_index: u64,
) -> Result<()> {
    // If response term is greater, step down
    if response.term > raft_state.current_term {
        raft_state.update_term(response.term);
        state_storage.save_term(raft_state.current_term)?;
        state_storage.save_voted_for(None)?;
        return Ok(());
    }

    // Ignore if we're not leader anymore
    if !raft_state.is_leader() {
        return Ok(());
    }

    // Ignore stale responses
    if response.term < raft_state.current_term {
        return Ok(());
    }

    if response.success {
        let new_match_index = prev_log_index + sent_entries_count as u64;

        if let Some(match_idx) = raft_state.match_index.get_mut(&from) {
            *match_idx = std::cmp::max(*match_idx, new_match_index);
        }
        if let Some(next_idx) = raft_state.next_index.get_mut(&from) {
            *next_idx = std::cmp::max(*next_idx, new_match_index + 1);
        }

        tracing::debug!(
            "Node {} updated match_index for {} to {}",
            raft_state.node_id,
            from,
            new_match_index
        );

        advance_commit_index(raft_state, log_storage);
    } else if let Some(conflict_index) = response.conflict_index {
        // Follower told us where its conflicting term starts
        if let Some(next_idx) = raft_state.next_index.get_mut(&from) {
            *next_idx = conflict_index.max(1);
            tracing::debug!(
                "Node {} moved next_index for {} back to {} (conflict)",
                raft_state.node_id,
                from,
                conflict_index
            );
        }
    } else if let Some(next_idx) = raft_state.next_index.get_mut(&from) {
        // No hint, back off one entry
        if *next_idx > 1 {
            *next_idx -= 1;
        }
        tracing::debug!(
            "Node {} decremented next_index for {} to {}",
            raft_state.node_id,
            from,
            *next_idx
        );
    }

    Ok(())
}

/// Try to advance commit index based on match_index of followers.
///
/// A leader only ever commits entries of its own term by counting replicas;
/// earlier-term entries commit implicitly once such an entry commits.
pub fn advance_commit_index(raft_state: &mut RaftState, log_storage: &dyn LogStorage) {
    if !raft_state.is_leader() {
        return;
    }

    let last_log_index = log_storage.last_index();
    let total_nodes = raft_state.match_index.len() + 1;
    let majority = total_nodes / 2 + 1;

    for n in (raft_state.commit_index + 1)..=last_log_index {
        if log_storage.term_at(n) != raft_state.current_term {
            continue;
        }

        let mut count = 1; // ourselves
        for match_idx in raft_state.match_index.values() {
            if *match_idx >= n {
                count += 1;
            }
        }

        if count >= majority {
            raft_state.commit_index = n;
            tracing::info!(
                "Leader {} advanced commit_index to {}",
                raft_state.node_id,
                n
            );
        }
    }
}

/// Create AppendEntries request for a specific follower
pub fn create_append_entries(
    raft_state: &RaftState,
    log_storage: &dyn LogStorage,
    follower_id: &NodeId,
) -> Result<AppendEntriesRequest> {
    let next_index = raft_state.next_index.get(follower_id).copied().unwrap_or(1);
    let prev_log_index = next_index.saturating_sub(1);
    let prev_log_term = log_storage.term_at(prev_log_index);

    let last_log_index = log_storage.last_index();
    let entries = if next_index <= last_log_index {
        log_storage.get_range(next_index, last_log_index)?
    } else {
        Vec::new()
    };

    Ok(AppendEntriesRequest {
        term: raft_state.current_term,
        leader_id: raft_state.node_id.clone(),
        prev_log_index,
        prev_log_term,
        entries,
        leader_commit: raft_state.commit_index,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::{Command, Value};
    use crate::raft::types::LogEntry;
    use crate::storage::{FileStateStorage, WalLog};
    use tempfile::TempDir;

    fn setup(dir: &TempDir) -> (RaftState, FileStateStorage, WalLog) {
        let state = RaftState::new("127.0.0.1:7001".to_string());
        let state_storage = FileStateStorage::new(dir.path().join("term.state")).unwrap();
        let log = WalLog::open(dir.path().join("wal.log")).unwrap();
        (state, state_storage, log)
    }

    fn entry(term: u64, index: u64, key: &str) -> LogEntry {
        LogEntry::new(
            term,
            index,
            Command::Set {
                key: key.to_string(),
                value: Value::from("v"),
            },
        )
    }

    #[test]
    fn test_append_entries_success() {
        let dir = TempDir::new().unwrap();
        let (mut state, mut state_storage, mut log) = setup(&dir);
        state.current_term = 1;

        let request = AppendEntriesRequest {
            term: 1,
            leader_id: "127.0.0.1:7002".to_string(),
            prev_log_index: 0,
            prev_log_term: 0,
            entries: vec![entry(1, 1, "a")],
            leader_commit: 0,
        };

        let response =
            handle_append_entries(&mut state, &mut state_storage, &mut log, request).unwrap();

        assert!(response.success);
        assert_eq!(log.last_index(), 1);
        assert_eq!(state.current_leader, Some("127.0.0.1:7002".to_string()));
    }

    #[test]
    fn test_append_entries_reject_stale_term() {
        let dir = TempDir::new().unwrap();
        let (mut state, mut state_storage, mut log) = setup(&dir);
        state.current_term = 2;

        let request = AppendEntriesRequest {
            term: 1,
            leader_id: "127.0.0.1:7002".to_string(),
            prev_log_index: 0,
            prev_log_term: 0,
            entries: vec![],
            leader_commit: 0,
        };

        let response =
            handle_append_entries(&mut state, &mut state_storage, &mut log, request).unwrap();

        assert!(!response.success);
        assert_eq!(response.term, 2);
    }

    #[test]
    fn test_append_entries_conflict_hint_points_at_term_start() {
        let dir = TempDir::new().unwrap();
        let (mut state, mut state_storage, mut log) = setup(&dir);
        state.current_term = 3;
        // Local log: term 1 at index 1, then term 2 at indexes 2-3.
        log.append(vec![entry(1, 1, "a"), entry(2, 2, "b"), entry(2, 3, "c")])
            .unwrap();

        let request = AppendEntriesRequest {
            term: 3,
            leader_id: "127.0.0.1:7002".to_string(),
            prev_log_index: 3,
            prev_log_term: 3, // leader expects term 3 here, we have term 2
            entries: vec![entry(3, 4, "d")],
            leader_commit: 0,
        };

        let response =
            handle_append_entries(&mut state, &mut state_storage, &mut log, request).unwrap();

        assert!(!response.success);
        assert_eq!(response.conflict_term, Some(2));
        assert_eq!(response.conflict_index, Some(2));
    }

    #[test]
    fn test_append_entries_missing_prefix_hints_log_end() {
        let dir = TempDir::new().unwrap();
        let (mut state, mut state_storage, mut log) = setup(&dir);
        state.current_term = 1;

        let request = AppendEntriesRequest {
            term: 1,
            leader_id: "127.0.0.1:7002".to_string(),
            prev_log_index: 5,
            prev_log_term: 1,
            entries: vec![],
            leader_commit: 0,
        };

        let response =
            handle_append_entries(&mut state, &mut state_storage, &mut log, request).unwrap();

        assert!(!response.success);
        assert_eq!(response.conflict_index, Some(1));
        assert_eq!(response.conflict_term, None);
    }

    #[test]
    fn test_append_is_idempotent_for_identical_prefix() {
        let dir = TempDir::new().unwrap();
        let (mut state, mut state_storage, mut log) = setup(&dir);
        state.current_term = 1;
        log.append(vec![entry(1, 1, "a"), entry(1, 2, "b")]).unwrap();

        let request = AppendEntriesRequest {
            term: 1,
            leader_id: "127.0.0.1:7002".to_string(),
            prev_log_index: 0,
            prev_log_term: 0,
            entries: vec![entry(1, 1, "a"), entry(1, 2, "b"), entry(1, 3, "c")],
            leader_commit: 0,
        };

        let response =
            handle_append_entries(&mut state, &mut state_storage, &mut log, request).unwrap();

        assert!(response.success);
        assert_eq!(log.last_index(), 3);
        assert_eq!(log.term_at(1), 1);
    }

    #[test]
    fn test_conflicting_suffix_is_replaced() {
        let dir = TempDir::new().unwrap();
        let (mut state, mut state_storage, mut log) = setup(&dir);
        state.current_term = 2;
        log.append(vec![entry(1, 1, "a"), entry(1, 2, "stale"), entry(1, 3, "stale")])
            .unwrap();

        let request = AppendEntriesRequest {
            term: 2,
            leader_id: "127.0.0.1:7002".to_string(),
            prev_log_index: 1,
            prev_log_term: 1,
            entries: vec![entry(2, 2, "fresh")],
            leader_commit: 0,
        };

        let response =
            handle_append_entries(&mut state, &mut state_storage, &mut log, request).unwrap();

        assert!(response.success);
        assert_eq!(log.last_index(), 2);
        assert_eq!(log.term_at(2), 2);
    }

    #[test]
    fn test_follower_commit_bounded_by_local_log() {
        let dir = TempDir::new().unwrap();
        let (mut state, mut state_storage, mut log) = setup(&dir);
        state.current_term = 1;

        let request = AppendEntriesRequest {
            term: 1,
            leader_id: "127.0.0.1:7002".to_string(),
            prev_log_index: 0,
            prev_log_term: 0,
            entries: vec![entry(1, 1, "a")],
            leader_commit: 10,
        };

        handle_append_entries(&mut state, &mut state_storage, &mut log, request).unwrap();
        assert_eq!(state.commit_index, 1);
    }

    #[test]
    fn test_commit_advances_only_with_majority() {
        let dir = TempDir::new().unwrap();
        let (mut state, mut state_storage, mut log) = setup(&dir);
        state.become_candidate(); // term 1
        log.append(vec![entry(1, 1, "a")]).unwrap();
        state.become_leader(
            1,
            &[
                "127.0.0.1:7001".to_string(),
                "127.0.0.1:7002".to_string(),
                "127.0.0.1:7003".to_string(),
            ],
        );

        handle_append_entries_response(
            &mut state,
            &mut state_storage,
            &log,
            "127.0.0.1:7002".to_string(),
            AppendEntriesResponse {
                term: 1,
                success: true,
                conflict_index: None,
                conflict_term: None,
            },
            1,
            0,
        )
        .unwrap();

        // Self + one follower = 2 of 3.
        assert_eq!(state.commit_index, 1);
    }

    #[test]
    fn test_leader_never_commits_prior_term_by_counting() {
        let dir = TempDir::new().unwrap();
        let (mut state, mut state_storage, mut log) = setup(&dir);
        // Entry from term 1 exists, we are now leader of term 2.
        log.append(vec![entry(1, 1, "old")]).unwrap();
        state.current_term = 2;
        state.become_leader(
            1,
            &[
                "127.0.0.1:7001".to_string(),
                "127.0.0.1:7002".to_string(),
                "127.0.0.1:7003".to_string(),
            ],
        );

        handle_append_entries_response(
            &mut state,
            &mut state_storage,
            &log,
            "127.0.0.1:7002".to_string(),
            AppendEntriesResponse {
                term: 2,
                success: true,
                conflict_index: None,
                conflict_term: None,
            },
            1,
            0,
        )
        .unwrap();

        // Replicated on a majority, but its term is stale: must not commit.
        assert_eq!(state.commit_index, 0);

        // Once a current-term entry replicates, both commit together.
        log.append(vec![entry(2, 2, "new")]).unwrap();
        handle_append_entries_response(
            &mut state,
            &mut state_storage,
            &log,
            "127.0.0.1:7002".to_string(),
            AppendEntriesResponse {
                term: 2,
                success: true,
                conflict_index: None,
                conflict_term: None,
            },
            1,
            1,
        )
        .unwrap();
        assert_eq!(state.commit_index, 2);
    }

    #[test]
    fn test_conflict_hint_rewinds_next_index() {
        let dir = TempDir::new().unwrap();
        let (mut state, mut state_storage, log) = setup(&dir);
        state.become_candidate();
        state.become_leader(
            10,
            &["127.0.0.1:7001".to_string(), "127.0.0.1:7002".to_string()],
        );

        handle_append_entries_response(
            &mut state,
            &mut state_storage,
            &log,
            "127.0.0.1:7002".to_string(),
            AppendEntriesResponse {
                term: 1,
                success: false,
                conflict_index: Some(4),
                conflict_term: Some(1),
            },
            0,
            10,
        )
        .unwrap();

        assert_eq!(state.next_index["127.0.0.1:7002"], 4);
    }

    #[test]
    fn test_create_append_entries_carries_pending_suffix() {
        let dir = TempDir::new().unwrap();
        let (mut state, _state_storage, mut log) = setup(&dir);
        log.append(vec![entry(1, 1, "a"), entry(1, 2, "b"), entry(1, 3, "c")])
            .unwrap();
        state.become_candidate();
        state.become_leader(
            3,
            &["127.0.0.1:7001".to_string(), "127.0.0.1:7002".to_string()],
        );
        state
            .next_index
            .insert("127.0.0.1:7002".to_string(), 2);

        let request =
            create_append_entries(&state, &log, &"127.0.0.1:7002".to_string()).unwrap();

        assert_eq!(request.prev_log_index, 1);
        assert_eq!(request.prev_log_term, 1);
        assert_eq!(request.entries.len(), 2);
        assert_eq!(request.entries[0].index, 2);
    }
}
