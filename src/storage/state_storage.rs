use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;

use crate::raft::types::{NodeId, Term};
use crate::util::errors::{Result, StoreError};

/// Persistent state that must survive crashes
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PersistentState {
    /// Latest term server has seen (initialized to 0)
    pub current_term: Term,
    /// Candidate that received vote in current term (or None)
    pub voted_for: Option<NodeId>,
}

/// Trait for persistent term/vote storage
pub trait StateStorage: Send {
    fn save_term(&mut self, term: Term) -> Result<()>;
    fn save_voted_for(&mut self, peer_id: Option<NodeId>) -> Result<()>;
    fn load_state(&self) -> Result<PersistentState>;
}

/// File-backed term/vote storage.
///
/// The state lives in a single small `term.state` file with a fixed layout:
///
/// ```text
/// u64 current_term | u16 voted_for_len | voted_for bytes
/// ```
///
/// Every save rewrites the whole file with write-then-rename atomicity, so a
/// crash mid-save leaves the previous state intact.
pub struct FileStateStorage {
    path: PathBuf,
    state: PersistentState,
}

impl FileStateStorage {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let state = Self::load_from_disk(&path)?;
        if state.current_term > 0 || state.voted_for.is_some() {
            tracing::info!(
                "Loaded persistent state: term={}, voted_for={:?}",
                state.current_term,
                state.voted_for
            );
        }
        Ok(Self { path, state })
    }

    fn load_from_disk(path: &PathBuf) -> Result<PersistentState> {
        if !path.exists() {
            return Ok(PersistentState::default());
        }

        let data = fs::read(path)?;
        if data.is_empty() {
            return Ok(PersistentState::default());
        }
        if data.len() < 10 {
            return Err(StoreError::Corruption(format!(
                "term state file truncated ({} bytes)",
                data.len()
            )));
        }

        let current_term = u64::from_le_bytes(data[..8].try_into().unwrap());
        let len = u16::from_le_bytes(data[8..10].try_into().unwrap()) as usize;
        if data.len() != 10 + len {
            return Err(StoreError::Corruption(
                "term state file has inconsistent length".to_string(),
            ));
        }
        let voted_for = if len == 0 {
            None
        } else {
            let raw = String::from_utf8(data[10..].to_vec()).map_err(|_| {
                StoreError::Corruption("term state voted_for is not utf-8".to_string())
            })?;
            Some(raw)
        };

        Ok(PersistentState {
            current_term,
            voted_for,
        })
    }

    fn save_to_disk(&self) -> Result<()> {
        let voted = self.state.voted_for.as_deref().unwrap_or("");
        let mut buf = Vec::with_capacity(10 + voted.len());
        buf.extend_from_slice(&self.state.current_term.to_le_bytes());
        buf.extend_from_slice(&(voted.len() as u16).to_le_bytes());
        buf.extend_from_slice(voted.as_bytes());

        // Write-then-rename keeps the previous state intact on a crash.
        let temp_path = self.path.with_extension("state.tmp");
        let mut file = File::create(&temp_path)?;
        file.write_all(&buf)?;
        file.sync_all()?;
        fs::rename(&temp_path, &self.path)?;
        Ok(())
    }
}

impl StateStorage for FileStateStorage {
    fn save_term(&mut self, term: Term) -> Result<()> {
        self.state.current_term = term;
        self.save_to_disk()
    }

    fn save_voted_for(&mut self, peer_id: Option<NodeId>) -> Result<()> {
        self.state.voted_for = peer_id;
        self.save_to_disk()
    }

    fn load_state(&self) -> Result<PersistentState> {
        Ok(self.state.clone())
    }
}
