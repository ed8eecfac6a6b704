//! Shared fixtures: an in-process Ricart-Agrawala network and a session store
//! wired to an in-memory ledger.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;

use proctor::admission::AdmissionController;
use proctor::clock::{LogicalClock, LogicalTimestamp, NodeId, WallClock};
use proctor::error::Result;
use proctor::exclusion::{PeerTransport, RicartAgrawala};
use proctor::ledger::MemoryLedger;
use proctor::session::questions::default_question_bank;
use proctor::session::{RaceResolver, SessionStore};

/// Delivers messages by calling the target node directly.
///
/// Messages to ids that never joined are dropped, which makes them silent
/// peers.
#[derive(Default)]
pub struct LocalNetwork {
    nodes: RwLock<HashMap<NodeId, Weak<RicartAgrawala>>>,
}

impl LocalNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn join(
        self: &Arc<Self>,
        id: &str,
        peers: &[&str],
        reply_timeout: Option<Duration>,
    ) -> Arc<RicartAgrawala> {
        let node = Arc::new(RicartAgrawala::new(
            NodeId::from(id),
            peers.iter().map(|p| NodeId::from(*p)).collect(),
            Arc::new(LogicalClock::new()),
            Arc::clone(self) as Arc<dyn PeerTransport>,
            reply_timeout,
        ));
        self.nodes
            .write()
            .unwrap()
            .insert(NodeId::from(id), Arc::downgrade(&node));
        node
    }

    fn node(&self, id: &NodeId) -> Option<Arc<RicartAgrawala>> {
        self.nodes.read().unwrap().get(id).and_then(Weak::upgrade)
    }
}

#[async_trait]
impl PeerTransport for LocalNetwork {
    async fn send_request(
        &self,
        to: &NodeId,
        from: &NodeId,
        timestamp: LogicalTimestamp,
    ) -> Result<()> {
        if let Some(node) = self.node(to) {
            node.on_request(from, timestamp).await;
        }
        Ok(())
    }

    async fn send_reply(
        &self,
        to: &NodeId,
        from: &NodeId,
        timestamp: LogicalTimestamp,
    ) -> Result<()> {
        if let Some(node) = self.node(to) {
            node.on_reply(from, timestamp).await;
        }
        Ok(())
    }
}

/// Three fully connected nodes
pub fn three_nodes(
    reply_timeout: Option<Duration>,
) -> (Arc<LocalNetwork>, Vec<Arc<RicartAgrawala>>) {
    let net = LocalNetwork::new();
    let ids = ["agent", "authority", "coordinator"];
    let nodes = ids
        .iter()
        .map(|id| net.join(id, &ids, reply_timeout))
        .collect();
    (net, nodes)
}

pub fn session_store(
    duration: Duration,
    race_window: Duration,
) -> (Arc<SessionStore>, Arc<MemoryLedger>) {
    let ledger = Arc::new(MemoryLedger::new());
    let store = Arc::new(SessionStore::new(
        Arc::new(AdmissionController::new(5, 8, 3, true)),
        RaceResolver::new(race_window),
        ledger.clone(),
        Arc::new(WallClock::new()),
        default_question_bank(),
        Vec::<String>::new(),
        duration,
    ));
    (store, ledger)
}
