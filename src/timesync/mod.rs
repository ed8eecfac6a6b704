//! Berkeley clock synchronization
//!
//! The coordinator polls every participant's wall clock, averages the
//! readings of those that answered, and pushes an additive correction to
//! everyone. Replies are compensated by half the measured round trip.
//!
//! A participant that fails or times out is left out of the average but is
//! still sent the coordinator's own correction, on the assumption that its
//! clock tracks the coordinator's. One bad peer never aborts the round.

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

use crate::clock::{NodeId, WallClock};
use crate::error::Result;
use crate::utils::format_offset;

// ============================================================================
// Time Source
// ============================================================================

/// A clock that can be read and corrected, local or remote
#[async_trait]
pub trait TimeSource: Send + Sync {
    fn node_id(&self) -> &NodeId;

    /// Reported time in epoch microseconds
    async fn query_time(&self) -> Result<i64>;

    /// Add `delta_micros` to the clock offset
    async fn adjust_time(&self, delta_micros: i64) -> Result<()>;
}

/// The wall clock of this process
pub struct LocalTime {
    id: NodeId,
    clock: Arc<WallClock>,
}

impl LocalTime {
    pub fn new(id: NodeId, clock: Arc<WallClock>) -> Self {
        Self { id, clock }
    }
}

#[async_trait]
impl TimeSource for LocalTime {
    fn node_id(&self) -> &NodeId {
        &self.id
    }

    async fn query_time(&self) -> Result<i64> {
        Ok(self.clock.now_micros())
    }

    async fn adjust_time(&self, delta_micros: i64) -> Result<()> {
        let offset = self.clock.adjust(delta_micros);
        crate::metrics::set_clock_offset(offset);
        tracing::debug!(node = %self.id, delta_micros, offset_micros = offset, "Clock adjusted");
        Ok(())
    }
}

// ============================================================================
// Sync Report
// ============================================================================

/// Outcome for a single participant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncEntry {
    pub node_id: NodeId,

    /// Answered the time query in time
    pub reachable: bool,

    /// Estimated offset from the coordinator before correction
    pub delta_micros: Option<i64>,

    /// Correction sent
    pub correction_micros: i64,

    /// The adjust call succeeded
    pub adjusted: bool,
}

/// Result of one Berkeley round
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncReport {
    /// Mean offset of all reachable clocks relative to the coordinator
    pub mean_delta_micros: i64,

    /// Coordinator first, then participants in configuration order
    pub entries: Vec<SyncEntry>,
}

impl SyncReport {
    pub fn reachable_count(&self) -> usize {
        self.entries.iter().filter(|e| e.reachable).count()
    }

    pub fn unreachable(&self) -> Vec<&NodeId> {
        self.entries
            .iter()
            .filter(|e| !e.reachable)
            .map(|e| &e.node_id)
            .collect()
    }

    pub fn display(&self) -> String {
        let mut out = format!(
            "Berkeley sync: mean delta {}, {}/{} reachable\n",
            format_offset(self.mean_delta_micros),
            self.reachable_count(),
            self.entries.len()
        );
        for entry in &self.entries {
            let delta = entry
                .delta_micros
                .map(format_offset)
                .unwrap_or_else(|| "unreachable".to_string());
            out.push_str(&format!(
                "  {:<14} delta {:<12} correction {} {}\n",
                entry.node_id.as_str(),
                delta,
                format_offset(entry.correction_micros),
                if entry.adjusted { "" } else { "(adjust failed)" }
            ));
        }
        out
    }
}

// ============================================================================
// Berkeley Coordinator
// ============================================================================

pub struct BerkeleySync {
    local: Arc<dyn TimeSource>,
    participants: Vec<Arc<dyn TimeSource>>,
    query_timeout: Duration,
}

impl BerkeleySync {
    pub fn new(
        local: Arc<dyn TimeSource>,
        participants: Vec<Arc<dyn TimeSource>>,
        query_timeout: Duration,
    ) -> Self {
        Self {
            local,
            participants,
            query_timeout,
        }
    }

    /// Run one synchronization round
    pub async fn run_sync(&self) -> Result<SyncReport> {
        let t0 = self.local.query_time().await?;
        let base = Instant::now();

        let queries = self.participants.iter().map(|p| self.sample(p.as_ref(), t0, base));
        let deltas: Vec<Option<i64>> = join_all(queries).await;

        let reachable: Vec<i64> = deltas.iter().flatten().copied().collect();
        // The coordinator's own delta is zero
        let mean_delta = reachable.iter().sum::<i64>() / (reachable.len() as i64 + 1);

        let mut entries = Vec::with_capacity(self.participants.len() + 1);

        let own_adjusted = match self.local.adjust_time(mean_delta).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(error = %e, "Failed to adjust local clock");
                false
            }
        };
        entries.push(SyncEntry {
            node_id: self.local.node_id().clone(),
            reachable: true,
            delta_micros: Some(0),
            correction_micros: mean_delta,
            adjusted: own_adjusted,
        });

        let adjustments = self.participants.iter().zip(&deltas).map(|(p, delta)| {
            let correction = match delta {
                Some(d) => mean_delta - d,
                None => mean_delta,
            };
            self.push_correction(p.as_ref(), *delta, correction)
        });
        entries.extend(join_all(adjustments).await);

        let report = SyncReport {
            mean_delta_micros: mean_delta,
            entries,
        };

        crate::metrics::record_sync(report.reachable_count(), report.unreachable().len());
        tracing::info!(
            mean_delta_micros = mean_delta,
            reachable = report.reachable_count(),
            total = report.entries.len(),
            "Berkeley sync complete"
        );

        Ok(report)
    }

    /// Estimate a participant's offset from the coordinator at reply time
    async fn sample(&self, participant: &dyn TimeSource, t0: i64, base: Instant) -> Option<i64> {
        let sent = Instant::now();
        match tokio::time::timeout(self.query_timeout, participant.query_time()).await {
            Ok(Ok(reported)) => {
                let received = Instant::now();
                let half_rtt = (received - sent).as_micros() as i64 / 2;
                let local_at_reply = t0 + (received - base).as_micros() as i64;
                Some(reported + half_rtt - local_at_reply)
            }
            Ok(Err(e)) => {
                tracing::warn!(node = %participant.node_id(), error = %e, "Participant unreachable, excluded from mean");
                None
            }
            Err(_) => {
                tracing::warn!(
                    node = %participant.node_id(),
                    timeout_ms = self.query_timeout.as_millis() as u64,
                    "Participant timed out, excluded from mean"
                );
                None
            }
        }
    }

    async fn push_correction(
        &self,
        participant: &dyn TimeSource,
        delta: Option<i64>,
        correction: i64,
    ) -> SyncEntry {
        let adjusted = match tokio::time::timeout(
            self.query_timeout,
            participant.adjust_time(correction),
        )
        .await
        {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::warn!(node = %participant.node_id(), error = %e, "Adjust call failed");
                false
            }
            Err(_) => {
                tracing::warn!(node = %participant.node_id(), "Adjust call timed out");
                false
            }
        };

        SyncEntry {
            node_id: participant.node_id().clone(),
            reachable: delta.is_some(),
            delta_micros: delta,
            correction_micros: correction,
            adjusted,
        }
    }

    /// Re-run the sync on a fixed interval
    pub fn start_periodic(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick fires immediately; startup already synced
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = self.run_sync().await {
                    tracing::error!(error = %e, "Periodic sync failed");
                }
            }
        })
    }
}
