pub mod state_storage;
pub mod wal;

pub use state_storage::{FileStateStorage, PersistentState, StateStorage};
pub use wal::{LogStorage, WalLog};
