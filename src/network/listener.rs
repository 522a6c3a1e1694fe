use actix::prelude::*;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use crate::dispatcher::{self, Dispatcher};
use crate::raft::actor::{HandleRaftMessage, RaftActor};
use crate::raft::rpc::RaftMessage;

/// Accept loop for the node's single listening socket. Both clients and
/// peers connect here; the two are told apart per line by their JSON shape.
pub async fn serve(listener: TcpListener, raft: Addr<RaftActor>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                tracing::debug!("Accepted connection from {}", addr);
                let raft = raft.clone();
                actix_rt::spawn(async move {
                    handle_connection(stream, addr.to_string(), raft).await;
                });
            }
            Err(e) => {
                tracing::error!("Accept error: {}", e);
            }
        }
    }
}

/// One task per connection. Lines are processed strictly in order, so each
/// connection's responses come back in request order.
async fn handle_connection(stream: TcpStream, remote: String, raft: Addr<RaftActor>) {
    let _ = stream.set_nodelay(true);
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();
    let dispatcher = Dispatcher::new(raft.clone());

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::debug!("Connection {} read error: {}", remote, e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let Some(mut reply) = route_line(&line, &remote, &raft, &dispatcher).await else {
            continue;
        };
        reply.push('\n');
        if write_half.write_all(reply.as_bytes()).await.is_err() {
            break;
        }
    }
}

/// A line with a `type` field is a peer RPC; a line with a `command` field
/// is a client request. Anything else is a protocol error, which is
/// reported without closing the connection.
async fn route_line(
    line: &str,
    remote: &str,
    raft: &Addr<RaftActor>,
    dispatcher: &Dispatcher,
) -> Option<String> {
    let parsed: serde_json::Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(_) => return Some(dispatcher::error_line("invalid JSON")),
    };

    if parsed.get("type").is_some() {
        let message: RaftMessage = match serde_json::from_value(parsed) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("Bad RPC from {}: {}", remote, e);
                return Some(dispatcher::error_line("malformed RPC"));
            }
        };

        return match raft
            .send(HandleRaftMessage {
                from: remote.to_string(),
                message,
            })
            .await
        {
            Ok(Ok(Some(reply))) => serde_json::to_string(&reply).ok(),
            Ok(Ok(None)) => None,
            Ok(Err(e)) => {
                tracing::error!("RPC handling failed: {}", e);
                None
            }
            Err(e) => {
                tracing::error!("Raft actor unavailable: {}", e);
                None
            }
        };
    }

    if parsed.get("command").is_some() {
        return Some(dispatcher.dispatch(parsed).await);
    }

    Some(dispatcher::error_line("missing 'command' field"))
}
