//! Misconduct strike counting (coordinator side)

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrikeOutcome {
    /// First offense
    Warned,
    /// Second offense
    Caught,
    /// Already caught, nothing further to do
    AlreadyCaught,
}

#[derive(Debug, Default)]
pub struct StrikeTracker {
    strikes: Mutex<HashMap<String, u32>>,
}

impl StrikeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn report(&self, key: &str) -> StrikeOutcome {
        let mut strikes = self.strikes.lock().await;
        let count = strikes.entry(key.to_string()).or_insert(0);
        *count += 1;

        match *count {
            1 => StrikeOutcome::Warned,
            2 => StrikeOutcome::Caught,
            _ => StrikeOutcome::AlreadyCaught,
        }
    }

    pub async fn count(&self, key: &str) -> u32 {
        self.strikes.lock().await.get(key).copied().unwrap_or(0)
    }
}
