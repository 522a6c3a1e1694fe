use std::net::SocketAddr;
use std::thread;

use actix::prelude::*;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use crate::config::Config;
use crate::network::{listener, Network};
use crate::raft::actor::{RaftActor, SetNetworkAddress};
use crate::storage::{FileStateStorage, WalLog};
use crate::util::errors::{Result, StoreError};

/// A running node inside the current actix system.
pub struct NodeHandle {
    pub raft: Addr<RaftActor>,
    pub addr: SocketAddr,
}

/// Bind the listener, open the persistent files, wire the actors, and start
/// serving. Binding happens first so a port of 0 (tests) can be resolved
/// into the advertised address before the Raft identity is fixed.
pub async fn start_node(mut config: Config) -> Result<NodeHandle> {
    let tcp_listener = TcpListener::bind(&config.network.listen_addr).await?;
    let local_addr = tcp_listener.local_addr()?;

    if config.network.advertise_addr.ends_with(":0") {
        let host = config
            .network
            .advertise_addr
            .rsplit_once(':')
            .map(|(host, _)| host)
            .unwrap_or("127.0.0.1");
        config.network.advertise_addr = format!("{}:{}", host, local_addr.port());
        config.raft.node_id = config.network.advertise_addr.clone();
    }
    config.validate()?;

    let data_dir = config.raft.data_dir.clone();
    let wal = WalLog::open(data_dir.join("wal.log"))?;
    let state_storage = FileStateStorage::new(data_dir.join("term.state"))?;

    let peers = config.peers.clone();
    let raft = RaftActor::new(
        config.raft.clone(),
        peers.clone(),
        Box::new(wal),
        Box::new(state_storage),
    )?
    .start();

    let network = Network::new(peers, raft.clone()).start();
    raft.do_send(SetNetworkAddress {
        addr: network.recipient(),
    });

    actix_rt::spawn(listener::serve(tcp_listener, raft.clone()));

    tracing::info!(
        "Node {} ({}) listening on {}",
        config.name,
        config.network.advertise_addr,
        local_addr
    );

    Ok(NodeHandle {
        raft,
        addr: local_addr,
    })
}

/// A node running on its own actix system thread. Used by integration tests
/// to boot a cluster inside one process; dropping the handle shuts the node
/// down.
pub struct SpawnedNode {
    pub addr: SocketAddr,
    pub raft: Addr<RaftActor>,
    stop: Option<oneshot::Sender<()>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl SpawnedNode {
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for SpawnedNode {
    fn drop(&mut self) {
        self.shutdown();
    }
}

pub fn spawn_node(config: Config) -> Result<SpawnedNode> {
    let (ready_tx, ready_rx) = std::sync::mpsc::channel();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();

    let thread = thread::Builder::new()
        .name(format!("node-{}", config.name))
        .spawn(move || {
            let system = actix_rt::System::new();
            system.block_on(async move {
                match start_node(config).await {
                    Ok(handle) => {
                        let _ = ready_tx.send(Ok((handle.addr, handle.raft)));
                        // Runs until the owner drops or stops the handle.
                        let _ = stop_rx.await;
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                    }
                }
            });
        })
        .map_err(|e| StoreError::InvalidState(format!("failed to spawn node thread: {}", e)))?;

    let (addr, raft) = ready_rx
        .recv()
        .map_err(|_| StoreError::InvalidState("node thread died during startup".to_string()))??;

    Ok(SpawnedNode {
        addr,
        raft,
        stop: Some(stop_tx),
        thread: Some(thread),
    })
}
