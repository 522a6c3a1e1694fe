pub mod actor;
pub mod election;
pub mod log;
pub mod rpc;
pub mod state;
pub mod types;

pub use rpc::RaftMessage;
pub use state::{NodeState, RaftState};
pub use types::{LogEntry, LogIndex, NodeId, Term};
