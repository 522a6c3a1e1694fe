use std::collections::HashMap;

use actix::prelude::*;

use crate::raft::actor::{RaftActor, SendRaftMessage};
use crate::raft::types::NodeId;

use super::peer::PeerHandle;

/// Network actor: owns one outbound connection task per peer and routes
/// outgoing RPCs to them. Incoming traffic is handled by the listener, not
/// here.
pub struct Network {
    peers: HashMap<NodeId, PeerHandle>,
}

impl Network {
    pub fn new(peer_ids: Vec<NodeId>, raft: Addr<RaftActor>) -> Self {
        let peers = peer_ids
            .into_iter()
            .map(|peer| (peer.clone(), PeerHandle::spawn(peer, raft.clone())))
            .collect();
        Self { peers }
    }
}

impl Actor for Network {
    type Context = Context<Self>;

    fn started(&mut self, _ctx: &mut Self::Context) {
        tracing::info!("Network layer started with {} peers", self.peers.len());
    }
}

impl Handler<SendRaftMessage> for Network {
    type Result = ();

    fn handle(&mut self, msg: SendRaftMessage, _ctx: &mut Self::Context) -> Self::Result {
        match self.peers.get(&msg.to) {
            Some(handle) => handle.send(msg.message),
            None => tracing::warn!("No connection handle for peer {}", msg.to),
        }
    }
}
