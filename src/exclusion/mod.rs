//! Ricart-Agrawala distributed mutual exclusion
//!
//! Every node runs one [`RicartAgrawala`] instance guarding a single shared
//! resource. A node enters the critical section once every peer has replied to
//! its timestamped request. Peers defer their reply while they hold, or have an
//! older claim on, the resource; deferred replies go out on release.
//!
//! # Liveness override
//!
//! When a reply timeout is configured, a requester that has not heard from all
//! peers by the deadline enters the critical section anyway. This keeps the
//! system moving when a peer is down, at the cost of mutual exclusion if the
//! silent peer is in fact alive and inside the section. Entries made this way
//! are reported as [`EntryMode::TimedOut`] and logged at `warn`. Set the timeout
//! to `None` for strict exclusion.

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use crate::clock::{LogicalClock, LogicalTimestamp, NodeId};
use crate::error::Result;

// ============================================================================
// Transport
// ============================================================================

/// Delivers protocol messages to peers
#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn send_request(&self, to: &NodeId, from: &NodeId, timestamp: LogicalTimestamp)
        -> Result<()>;

    async fn send_reply(&self, to: &NodeId, from: &NodeId, timestamp: LogicalTimestamp)
        -> Result<()>;
}

// ============================================================================
// State
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CsState {
    Idle,
    Requesting,
    InCs,
}

/// How a node got into the critical section
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryMode {
    /// Every peer replied
    AllReplies,
    /// Reply timeout elapsed first
    TimedOut,
}

impl EntryMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AllReplies => "all_replies",
            Self::TimedOut => "timed_out",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CsEntry {
    pub timestamp: LogicalTimestamp,
    pub mode: EntryMode,
    pub replies_received: usize,
}

/// What `on_request` did with an inbound request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestDecision {
    Replied,
    Deferred,
}

/// Point-in-time view for diagnostics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExclusionSnapshot {
    pub node_id: NodeId,
    pub state: CsState,
    pub clock: LogicalTimestamp,
    pub request_timestamp: Option<LogicalTimestamp>,
    pub replies_received: usize,
    pub deferred: Vec<NodeId>,
}

#[derive(Debug)]
struct Inner {
    state: CsState,
    request_ts: Option<LogicalTimestamp>,
    replies: usize,
    deferred: BTreeSet<NodeId>,
}

// ============================================================================
// Ricart-Agrawala
// ============================================================================

pub struct RicartAgrawala {
    id: NodeId,
    peers: Vec<NodeId>,
    clock: Arc<LogicalClock>,
    transport: Arc<dyn PeerTransport>,
    reply_timeout: Option<Duration>,
    inner: Mutex<Inner>,
    replies_changed: Notify,
}

impl RicartAgrawala {
    pub fn new(
        id: NodeId,
        peers: Vec<NodeId>,
        clock: Arc<LogicalClock>,
        transport: Arc<dyn PeerTransport>,
        reply_timeout: Option<Duration>,
    ) -> Self {
        let peers = peers.into_iter().filter(|p| *p != id).collect();
        Self {
            id,
            peers,
            clock,
            transport,
            reply_timeout,
            inner: Mutex::new(Inner {
                state: CsState::Idle,
                request_ts: None,
                replies: 0,
                deferred: BTreeSet::new(),
            }),
            replies_changed: Notify::new(),
        }
    }

    pub fn node_id(&self) -> &NodeId {
        &self.id
    }

    pub fn clock(&self) -> &Arc<LogicalClock> {
        &self.clock
    }

    /// Request the critical section and wait until it is granted.
    pub async fn acquire(&self) -> Result<CsEntry> {
        let _wait = crate::metrics::start_cs_wait_timer();
        let ts = self.begin_request().await?;
        let deadline = self.reply_timeout.map(|t| Instant::now() + t);

        tracing::info!(node = %self.id, timestamp = ts, peers = self.peers.len(), "Requesting critical section");
        self.broadcast_request(ts).await;

        Ok(self.await_replies(ts, deadline).await)
    }

    /// Idle -> Requesting: stamp a new request and reset the reply count.
    ///
    /// Does not contact peers; [`acquire`](Self::acquire) does that.
    pub async fn begin_request(&self) -> Result<LogicalTimestamp> {
        let mut inner = self.inner.lock().await;
        if inner.state != CsState::Idle {
            return Err(ExclusionError::AlreadyActive.into());
        }

        let ts = self.clock.tick();
        inner.state = CsState::Requesting;
        inner.request_ts = Some(ts);
        inner.replies = 0;
        Ok(ts)
    }

    async fn broadcast_request(&self, ts: LogicalTimestamp) {
        let sends = self.peers.iter().map(|peer| async move {
            if let Err(e) = self.transport.send_request(peer, &self.id, ts).await {
                tracing::warn!(node = %self.id, peer = %peer, error = %e, "Request not delivered");
            }
        });
        join_all(sends).await;
    }

    async fn await_replies(&self, ts: LogicalTimestamp, deadline: Option<Instant>) -> CsEntry {
        let needed = self.peers.len();

        let mode = loop {
            let notified = self.replies_changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.inner.lock().await.replies >= needed {
                break EntryMode::AllReplies;
            }

            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        break EntryMode::TimedOut;
                    }
                }
                None => notified.await,
            }
        };

        let replies_received = {
            let mut inner = self.inner.lock().await;
            inner.state = CsState::InCs;
            inner.replies
        };

        match mode {
            EntryMode::AllReplies => {
                tracing::info!(node = %self.id, timestamp = ts, "Entered critical section");
            }
            EntryMode::TimedOut => {
                tracing::warn!(
                    node = %self.id,
                    timestamp = ts,
                    replies_received,
                    needed,
                    "Reply timeout elapsed, entering critical section without all replies"
                );
            }
        }
        crate::metrics::record_cs_entry(mode.as_str());

        CsEntry {
            timestamp: ts,
            mode,
            replies_received,
        }
    }

    /// InCs -> Idle: answer every deferred request. Returns how many replies
    /// were sent.
    pub async fn release(&self) -> Result<usize> {
        let deferred = {
            let mut inner = self.inner.lock().await;
            if inner.state != CsState::InCs {
                return Err(ExclusionError::NotHeld.into());
            }
            inner.state = CsState::Idle;
            inner.request_ts = None;
            inner.replies = 0;
            std::mem::take(&mut inner.deferred)
        };

        tracing::info!(node = %self.id, deferred = deferred.len(), "Released critical section");

        let sends = deferred.iter().map(|peer| self.reply_to(peer));
        join_all(sends).await;

        Ok(deferred.len())
    }

    /// Run `f` inside the critical section.
    pub async fn with_critical_section<F, Fut, T>(&self, f: F) -> Result<(CsEntry, T)>
    where
        F: FnOnce(CsEntry) -> Fut,
        Fut: Future<Output = T>,
    {
        let entry = self.acquire().await?;
        let output = f(entry.clone()).await;
        self.release().await?;
        Ok((entry, output))
    }

    /// Handle a peer's request.
    pub async fn on_request(&self, sender: &NodeId, ts: LogicalTimestamp) -> RequestDecision {
        self.clock.observe(ts);

        let decision = {
            let mut inner = self.inner.lock().await;
            let defer = match (inner.state, inner.request_ts) {
                (CsState::Requesting | CsState::InCs, Some(own_ts)) => {
                    (ts, sender) > (own_ts, &self.id)
                }
                _ => false,
            };

            if defer {
                inner.deferred.insert(sender.clone());
                RequestDecision::Deferred
            } else {
                RequestDecision::Replied
            }
        };

        tracing::debug!(node = %self.id, sender = %sender, timestamp = ts, ?decision, "Request received");

        if decision == RequestDecision::Replied {
            self.reply_to(sender).await;
        }
        decision
    }

    /// Handle a peer's reply. Only counts while requesting.
    pub async fn on_reply(&self, sender: &NodeId, ts: LogicalTimestamp) {
        self.clock.observe(ts);

        let mut inner = self.inner.lock().await;
        if inner.state == CsState::Requesting {
            inner.replies += 1;
            tracing::debug!(
                node = %self.id,
                sender = %sender,
                replies = inner.replies,
                needed = self.peers.len(),
                "Reply received"
            );
            drop(inner);
            self.replies_changed.notify_one();
        }
    }

    async fn reply_to(&self, peer: &NodeId) {
        let ts = self.clock.tick();
        if let Err(e) = self.transport.send_reply(peer, &self.id, ts).await {
            tracing::warn!(node = %self.id, peer = %peer, error = %e, "Reply not delivered");
        }
    }

    pub async fn snapshot(&self) -> ExclusionSnapshot {
        let inner = self.inner.lock().await;
        ExclusionSnapshot {
            node_id: self.id.clone(),
            state: inner.state,
            clock: self.clock.current(),
            request_timestamp: inner.request_ts,
            replies_received: inner.replies,
            deferred: inner.deferred.iter().cloned().collect(),
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExclusionError {
    /// A request is already pending or the section is held
    AlreadyActive,
    /// Release without holding the section
    NotHeld,
}

impl std::fmt::Display for ExclusionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyActive => write!(f, "Critical section already requested or held"),
            Self::NotHeld => write!(f, "Critical section not held"),
        }
    }
}

impl std::error::Error for ExclusionError {}
