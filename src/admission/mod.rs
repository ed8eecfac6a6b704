//! Primary/backup admission control
//!
//! Sessions are admitted onto the primary lane until it carries `threshold`
//! live sessions, then spill to the backup lane (if running) until it carries
//! `backup_capacity`. Everything past that is rejected as overloaded.
//!
//! Check-and-increment happens under one lock, and each admitted key is
//! remembered with its lane so its load is released exactly once.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::config::AdmissionConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lane {
    Primary,
    Backup,
}

impl Lane {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Backup => "backup",
        }
    }
}

impl std::fmt::Display for Lane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of an admission attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Admission {
    Admitted { lane: Lane },
    Duplicate,
    Overloaded,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionStats {
    pub total_requests: u64,
    pub primary_processed: u64,
    pub backup_processed: u64,
    pub rejected_requests: u64,
    pub current_primary_load: usize,
    pub current_backup_load: usize,
    pub threshold: usize,
    pub capacity: usize,
    pub backup_capacity: usize,
    pub backup_running: bool,
}

impl AdmissionStats {
    pub fn display(&self) -> String {
        format!(
            "Admission Statistics:\n\
             - Total requests: {}\n\
             - Primary processed: {}\n\
             - Backup processed: {}\n\
             - Rejected: {}\n\
             - Current load: primary {}/{}, backup {}/{} ({})\n\
             - Capacity: {}",
            self.total_requests,
            self.primary_processed,
            self.backup_processed,
            self.rejected_requests,
            self.current_primary_load,
            self.threshold,
            self.current_backup_load,
            self.backup_capacity,
            if self.backup_running { "running" } else { "stopped" },
            self.capacity,
        )
    }
}

#[derive(Debug)]
struct AdmissionState {
    live: HashMap<String, Lane>,
    stats: AdmissionStats,
}

pub struct AdmissionController {
    state: Mutex<AdmissionState>,
}

impl AdmissionController {
    pub fn new(threshold: usize, capacity: usize, backup_capacity: usize, backup_running: bool) -> Self {
        Self {
            state: Mutex::new(AdmissionState {
                live: HashMap::new(),
                stats: AdmissionStats {
                    threshold,
                    capacity,
                    backup_capacity,
                    backup_running,
                    ..Default::default()
                },
            }),
        }
    }

    pub fn from_config(config: &AdmissionConfig) -> Self {
        Self::new(
            config.threshold,
            config.capacity,
            config.effective_backup_capacity(),
            config.backup_enabled,
        )
    }

    pub async fn admit(&self, key: &str) -> Admission {
        let mut state = self.state.lock().await;
        state.stats.total_requests += 1;

        if state.live.contains_key(key) {
            return Admission::Duplicate;
        }

        let stats = &mut state.stats;
        let lane = if stats.current_primary_load < stats.threshold {
            stats.primary_processed += 1;
            stats.current_primary_load += 1;
            Lane::Primary
        } else if stats.backup_running && stats.current_backup_load < stats.backup_capacity {
            stats.backup_processed += 1;
            stats.current_backup_load += 1;
            Lane::Backup
        } else {
            stats.rejected_requests += 1;
            tracing::warn!(
                key,
                primary_load = stats.current_primary_load,
                backup_load = stats.current_backup_load,
                backup_running = stats.backup_running,
                "Admission rejected, all lanes full"
            );
            crate::metrics::record_admission("overloaded");
            return Admission::Overloaded;
        };

        state.live.insert(key.to_string(), lane);
        tracing::debug!(key, lane = %lane, "Admitted");
        crate::metrics::record_admission(lane.as_str());

        Admission::Admitted { lane }
    }

    /// Free the slot held by `key`. Returns the lane it occupied, or `None`
    /// if the key is not live (already released or never admitted).
    pub async fn release(&self, key: &str) -> Option<Lane> {
        let mut state = self.state.lock().await;
        let lane = state.live.remove(key)?;

        match lane {
            Lane::Primary => {
                state.stats.current_primary_load = state.stats.current_primary_load.saturating_sub(1)
            }
            Lane::Backup => {
                state.stats.current_backup_load = state.stats.current_backup_load.saturating_sub(1)
            }
        }

        Some(lane)
    }

    /// Start or stop the backup lane. Sessions already on it are unaffected.
    pub async fn set_backup_running(&self, running: bool) {
        let mut state = self.state.lock().await;
        if state.stats.backup_running != running {
            tracing::info!(running, "Backup lane state changed");
        }
        state.stats.backup_running = running;
    }

    pub async fn stats(&self) -> AdmissionStats {
        self.state.lock().await.stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_primary_then_backup_then_overloaded() {
        let controller = AdmissionController::new(2, 3, 1, true);

        assert_eq!(controller.admit("a").await, Admission::Admitted { lane: Lane::Primary });
        assert_eq!(controller.admit("b").await, Admission::Admitted { lane: Lane::Primary });
        assert_eq!(controller.admit("c").await, Admission::Admitted { lane: Lane::Backup });
        assert_eq!(controller.admit("d").await, Admission::Overloaded);

        let stats = controller.stats().await;
        assert_eq!(stats.total_requests, 4);
        assert_eq!(stats.rejected_requests, 1);
    }

    #[tokio::test]
    async fn test_duplicate_key() {
        let controller = AdmissionController::new(5, 8, 3, true);
        controller.admit("29").await;

        assert_eq!(controller.admit("29").await, Admission::Duplicate);
        assert_eq!(controller.stats().await.current_primary_load, 1);
    }

    #[tokio::test]
    async fn test_release_exactly_once() {
        let controller = AdmissionController::new(1, 2, 1, true);
        controller.admit("a").await;
        controller.admit("b").await;

        assert_eq!(controller.release("b").await, Some(Lane::Backup));
        assert_eq!(controller.release("b").await, None);

        let stats = controller.stats().await;
        assert_eq!(stats.current_primary_load, 1);
        assert_eq!(stats.current_backup_load, 0);
    }

    #[tokio::test]
    async fn test_backup_stopped() {
        let controller = AdmissionController::new(1, 3, 2, false);
        controller.admit("a").await;
        assert_eq!(controller.admit("b").await, Admission::Overloaded);

        controller.set_backup_running(true).await;
        assert_eq!(controller.admit("b").await, Admission::Admitted { lane: Lane::Backup });
    }

    #[tokio::test]
    async fn test_concurrent_admission_never_exceeds_capacity() {
        let controller = Arc::new(AdmissionController::new(5, 8, 3, true));

        let handles: Vec<_> = (0..40)
            .map(|i| {
                let controller = Arc::clone(&controller);
                tokio::spawn(async move { controller.admit(&format!("s{i}")).await })
            })
            .collect();

        let mut admitted = 0;
        for handle in handles {
            if matches!(handle.await.unwrap(), Admission::Admitted { .. }) {
                admitted += 1;
            }
        }

        let stats = controller.stats().await;
        assert_eq!(admitted, 8);
        assert_eq!(stats.current_primary_load, 5);
        assert_eq!(stats.current_backup_load, 3);
        assert_eq!(stats.rejected_requests, 32);
    }

    #[test]
    fn test_admission_serialization() {
        let json = serde_json::to_string(&Admission::Admitted { lane: Lane::Backup }).unwrap();
        assert_eq!(json, r#"{"outcome":"admitted","lane":"backup"}"#);
    }
}
