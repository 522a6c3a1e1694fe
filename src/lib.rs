//! A distributed, persistent key-value store.
//!
//! Writes are replicated through a Raft log and acknowledged only once they
//! are durable on a majority and applied locally; reads are linearizable
//! through the leader's read barrier. Each node persists its log in an
//! append-only WAL with group commit and recovers by replaying it. Secondary
//! access paths (value indexes, BM25 full-text search, TF-IDF semantic
//! search) are node-local materialized views fed from the apply path.
//!
//! Clients and peers share one TCP listener and speak line-delimited JSON.

pub mod client;
pub mod config;
pub mod dispatcher;
pub mod index;
pub mod kv;
pub mod network;
pub mod node;
pub mod raft;
pub mod storage;
pub mod util;

pub use client::KvClient;
pub use config::Config;
pub use kv::{Command, KvStore, Value};
pub use util::errors::{Result, StoreError};
