//! Append-only result ledger
//!
//! Finalized sessions are handed to a [`ResultSink`] exactly once. Sinks:
//!
//! - [`MemoryLedger`] - in-process, for tests and ephemeral runs
//! - [`SqliteLedger`] - durable, one row per result
//! - [`ForwardingSink`] - records locally, then copies to a remote sink
//!   (the authority) on a best-effort basis

mod sqlite;

pub use sqlite::SqliteLedger;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::admission::Lane;
use crate::error::Result;
use crate::session::{CompletionSource, ResolutionStrategy};

// ============================================================================
// Result Event
// ============================================================================

/// One finalized session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEvent {
    pub id: Uuid,
    pub session_key: String,
    pub score: u32,
    pub total: u32,
    pub source: CompletionSource,
    pub lane: Lane,
    pub race_resolved: bool,
    pub strategy: Option<ResolutionStrategy>,
    pub recorded_at: DateTime<Utc>,
}

impl ResultEvent {
    pub fn new(
        session_key: impl Into<String>,
        score: u32,
        total: u32,
        source: CompletionSource,
        lane: Lane,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_key: session_key.into(),
            score,
            total,
            source,
            lane,
            race_resolved: false,
            strategy: None,
            recorded_at: Utc::now(),
        }
    }

    pub fn with_resolution(
        mut self,
        race_resolved: bool,
        strategy: Option<ResolutionStrategy>,
    ) -> Self {
        self.race_resolved = race_resolved;
        self.strategy = strategy;
        self
    }
}

// ============================================================================
// Sink Trait
// ============================================================================

#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn record(&self, event: &ResultEvent) -> Result<()>;
}

// ============================================================================
// Memory Ledger
// ============================================================================

#[derive(Default)]
pub struct MemoryLedger {
    events: RwLock<Vec<ResultEvent>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<ResultEvent> {
        self.events.read().await.clone()
    }

    pub async fn events_for(&self, session_key: &str) -> Vec<ResultEvent> {
        self.events
            .read()
            .await
            .iter()
            .filter(|e| e.session_key == session_key)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.events.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.events.read().await.is_empty()
    }
}

#[async_trait]
impl ResultSink for MemoryLedger {
    async fn record(&self, event: &ResultEvent) -> Result<()> {
        self.events.write().await.push(event.clone());
        Ok(())
    }
}

// ============================================================================
// Forwarding Sink
// ============================================================================

/// Local record is authoritative; the remote copy may be lost.
pub struct ForwardingSink {
    local: Arc<dyn ResultSink>,
    remote: Arc<dyn ResultSink>,
}

impl ForwardingSink {
    pub fn new(local: Arc<dyn ResultSink>, remote: Arc<dyn ResultSink>) -> Self {
        Self { local, remote }
    }
}

#[async_trait]
impl ResultSink for ForwardingSink {
    async fn record(&self, event: &ResultEvent) -> Result<()> {
        self.local.record(event).await?;

        if let Err(e) = self.remote.record(event).await {
            tracing::warn!(
                session = %event.session_key,
                error = %e,
                "Result recorded locally but not forwarded"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    struct BrokenSink;

    #[async_trait]
    impl ResultSink for BrokenSink {
        async fn record(&self, _event: &ResultEvent) -> Result<()> {
            Err(Error::other("authority unreachable"))
        }
    }

    fn event(key: &str) -> ResultEvent {
        ResultEvent::new(key, 7, 10, CompletionSource::Manual, Lane::Primary)
    }

    #[tokio::test]
    async fn test_memory_ledger_appends() {
        let ledger = MemoryLedger::new();
        assert!(ledger.is_empty().await);

        ledger.record(&event("29")).await.unwrap();
        ledger.record(&event("40")).await.unwrap();

        assert_eq!(ledger.len().await, 2);
        assert_eq!(ledger.events_for("40").await.len(), 1);
    }

    #[tokio::test]
    async fn test_forwarding_tolerates_remote_failure() {
        let local = Arc::new(MemoryLedger::new());
        let sink = ForwardingSink::new(local.clone(), Arc::new(BrokenSink));

        sink.record(&event("29")).await.unwrap();
        assert_eq!(local.len().await, 1);
    }

    #[tokio::test]
    async fn test_forwarding_fails_on_local_failure() {
        let remote = Arc::new(MemoryLedger::new());
        let sink = ForwardingSink::new(Arc::new(BrokenSink), remote.clone());

        assert!(sink.record(&event("29")).await.is_err());
        assert!(remote.is_empty().await);
    }

    #[test]
    fn test_event_resolution() {
        let e = event("50").with_resolution(true, Some(ResolutionStrategy::ManualPriority));
        assert!(e.race_resolved);
        assert_eq!(e.strategy, Some(ResolutionStrategy::ManualPriority));
    }
}
