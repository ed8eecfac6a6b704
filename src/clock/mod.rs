//! Node identity and clocks
//!
//! Every node carries two clocks:
//!
//! - [`LogicalClock`] - a Lamport counter used to order critical-section requests
//! - [`WallClock`] - the system clock plus an adjustable offset, corrected by the
//!   Berkeley synchronization round
//!
//! Both clocks are lock-free and safe to share through `Arc`.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use tokio::sync::futures::Notified;
use tokio::sync::Notify;

// ============================================================================
// Node Identity
// ============================================================================

/// Stable, totally ordered node identifier.
///
/// The ordering is the tie-break for equal Lamport timestamps, so it must be
/// identical on every node: plain byte-wise string ordering.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for NodeId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Lamport timestamp
pub type LogicalTimestamp = u64;

// ============================================================================
// Logical Clock
// ============================================================================

/// Lamport logical clock
#[derive(Debug, Default)]
pub struct LogicalClock {
    value: AtomicU64,
}

impl LogicalClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance for a local event and return the new value.
    pub fn tick(&self) -> LogicalTimestamp {
        self.value.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Merge a received timestamp: `clock = max(clock, received) + 1`.
    pub fn observe(&self, received: LogicalTimestamp) -> LogicalTimestamp {
        let mut current = self.value.load(Ordering::SeqCst);
        loop {
            let next = current.max(received) + 1;
            match self.value.compare_exchange_weak(
                current,
                next,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return next,
                Err(actual) => current = actual,
            }
        }
    }

    pub fn current(&self) -> LogicalTimestamp {
        self.value.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Wall Clock
// ============================================================================

/// System clock with a signed, additive offset in microseconds.
///
/// The offset only changes through [`WallClock::adjust`], which adds to it.
/// Tasks waiting on a reported-time instant can watch [`WallClock::adjusted`]
/// to re-arm after a correction.
#[derive(Debug, Default)]
pub struct WallClock {
    offset_micros: AtomicI64,
    adjusted: Notify,
}

impl WallClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a clock that starts skewed from system time.
    pub fn with_offset_micros(offset_micros: i64) -> Self {
        Self {
            offset_micros: AtomicI64::new(offset_micros),
            adjusted: Notify::new(),
        }
    }

    /// Reported time as microseconds since the Unix epoch.
    pub fn now_micros(&self) -> i64 {
        Utc::now().timestamp_micros() + self.offset_micros.load(Ordering::SeqCst)
    }

    /// Reported time.
    pub fn now(&self) -> DateTime<Utc> {
        micros_to_datetime(self.now_micros())
    }

    /// Add `delta_micros` to the current offset; returns the new offset.
    pub fn adjust(&self, delta_micros: i64) -> i64 {
        let offset = self.offset_micros.fetch_add(delta_micros, Ordering::SeqCst) + delta_micros;
        self.adjusted.notify_waiters();
        offset
    }

    /// Resolves on the next [`WallClock::adjust`] after this call.
    pub fn adjusted(&self) -> Notified<'_> {
        self.adjusted.notified()
    }

    pub fn offset_micros(&self) -> i64 {
        self.offset_micros.load(Ordering::SeqCst)
    }
}

/// Convert epoch microseconds to a UTC timestamp, saturating at the epoch on
/// out-of-range input.
pub fn micros_to_datetime(micros: i64) -> DateTime<Utc> {
    Utc.timestamp_micros(micros).single().unwrap_or_default()
}
