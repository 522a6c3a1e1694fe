pub mod config;

pub use config::{Config, NetworkConfig, RaftConfig};
