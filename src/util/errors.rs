use std::io;

#[derive(Debug)]
pub enum StoreError {
    StorageError(String),
    /// Mid-log checksum failure that is not a trailing torn write. Fatal.
    Corruption(String),
    LogInconsistency,
    InvalidState(String),
    NetworkError(String),
    /// The request landed on a non-leader. Carries the leader address when known.
    NotLeader { leader: Option<String> },
    /// The leader has not yet committed an entry of its own term.
    NotReady,
    /// Command-level failure at apply time (e.g. INCR on a non-integer).
    TypeMismatch { key: String },
    KeyNotFound,
    ProtocolError(String),
    IoError(io::Error),
    SerializationError(String),
    InvalidConfig(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::StorageError(msg) => write!(f, "Storage error: {}", msg),
            StoreError::Corruption(msg) => write!(f, "Log corruption: {}", msg),
            StoreError::LogInconsistency => write!(f, "Log inconsistency detected"),
            StoreError::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            StoreError::NetworkError(msg) => write!(f, "Network error: {}", msg),
            StoreError::NotLeader { leader: Some(addr) } => write!(f, "not leader, try {}", addr),
            StoreError::NotLeader { leader: None } => write!(f, "not leader"),
            StoreError::NotReady => write!(f, "not ready"),
            StoreError::TypeMismatch { .. } => write!(f, "type mismatch"),
            StoreError::KeyNotFound => write!(f, "not found"),
            StoreError::ProtocolError(msg) => write!(f, "Protocol error: {}", msg),
            StoreError::IoError(err) => write!(f, "IO error: {}", err),
            StoreError::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            StoreError::InvalidConfig(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<io::Error> for StoreError {
    fn from(err: io::Error) -> Self {
        StoreError::IoError(err)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::SerializationError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
