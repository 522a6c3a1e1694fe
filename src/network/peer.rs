use std::time::{Duration, Instant};

use actix::prelude::*;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::raft::actor::{HandleRaftMessage, PeerDisconnected, RaftActor};
use crate::raft::rpc::RaftMessage;
use crate::raft::types::NodeId;

const CONNECT_TIMEOUT: Duration = Duration::from_millis(250);
const BACKOFF_BASE: Duration = Duration::from_millis(50);
const BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Handle to one peer's outbound connection task.
///
/// All RPCs to a peer travel over a single ordered TCP stream, so replies
/// come back in send order and the node can correlate them FIFO. The task
/// reconnects with capped exponential backoff; messages queued while the
/// peer is unreachable are dropped, since the heartbeat timer resends
/// everything that matters.
pub struct PeerHandle {
    peer: NodeId,
    tx: mpsc::UnboundedSender<RaftMessage>,
}

impl PeerHandle {
    pub fn spawn(peer: NodeId, raft: Addr<RaftActor>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        actix_rt::spawn(run_peer(peer.clone(), raft, rx));
        Self { peer, tx }
    }

    pub fn peer(&self) -> &NodeId {
        &self.peer
    }

    pub fn send(&self, message: RaftMessage) {
        let _ = self.tx.send(message);
    }
}

async fn run_peer(
    peer: NodeId,
    raft: Addr<RaftActor>,
    mut rx: mpsc::UnboundedReceiver<RaftMessage>,
) {
    let mut writer: Option<OwnedWriteHalf> = None;
    let mut backoff = BACKOFF_BASE;
    let mut next_attempt = Instant::now();

    while let Some(message) = rx.recv().await {
        if writer.is_none() {
            if Instant::now() < next_attempt {
                continue;
            }
            match tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(peer.as_str())).await
            {
                Ok(Ok(stream)) => {
                    let _ = stream.set_nodelay(true);
                    let (read_half, write_half) = stream.into_split();
                    writer = Some(write_half);
                    backoff = BACKOFF_BASE;
                    spawn_reply_reader(peer.clone(), raft.clone(), read_half);
                    tracing::debug!("Connected to peer {}", peer);
                }
                _ => {
                    next_attempt = Instant::now() + backoff;
                    backoff = (backoff * 2).min(BACKOFF_MAX);
                    continue;
                }
            }
        }

        let mut line = match serde_json::to_string(&message) {
            Ok(line) => line,
            Err(e) => {
                tracing::error!("Failed to encode RPC for {}: {}", peer, e);
                continue;
            }
        };
        line.push('\n');

        if let Some(w) = writer.as_mut() {
            if let Err(e) = w.write_all(line.as_bytes()).await {
                tracing::debug!("Lost connection to peer {}: {}", peer, e);
                writer = None;
                next_attempt = Instant::now() + backoff;
                backoff = (backoff * 2).min(BACKOFF_MAX);
                raft.do_send(PeerDisconnected { peer: peer.clone() });
            }
        }
    }
}

/// Forward every reply line from the peer back into the Raft actor. The
/// task ends when the connection does, at which point in-flight RPCs on
/// this stream are unanswerable.
fn spawn_reply_reader(
    peer: NodeId,
    raft: Addr<RaftActor>,
    read_half: tokio::net::tcp::OwnedReadHalf,
) {
    actix_rt::spawn(async move {
        let mut lines = BufReader::new(read_half).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<RaftMessage>(&line) {
                        Ok(message) => {
                            raft.do_send(HandleRaftMessage {
                                from: peer.clone(),
                                message,
                            });
                        }
                        Err(e) => {
                            tracing::warn!("Undecodable reply from {}: {}", peer, e);
                        }
                    }
                }
                Ok(None) | Err(_) => break,
            }
        }
        raft.do_send(PeerDisconnected { peer: peer.clone() });
    });
}
