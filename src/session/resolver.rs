//! Manual vs timer completion race resolution

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::CompletionSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    /// A manual submit near the deadline beats the timer
    ManualPriority,
}

impl ResolutionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ManualPriority => "manual_priority",
        }
    }
}

/// Verdict for one finalize attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Accept {
        resolved_race: bool,
        strategy: Option<ResolutionStrategy>,
    },
    /// The timer lost to a manual attempt
    Skip,
}

/// Decides which completion event is authoritative.
///
/// Pure: the caller holds the session lock and owns `manual_attempted`.
#[derive(Debug, Clone, Copy)]
pub struct RaceResolver {
    race_window: Duration,
}

impl RaceResolver {
    pub fn new(race_window: Duration) -> Self {
        Self { race_window }
    }

    pub fn race_window(&self) -> Duration {
        self.race_window
    }

    /// `remaining_micros` may be negative once the deadline has passed.
    pub fn resolve(
        &self,
        source: CompletionSource,
        remaining_micros: i64,
        manual_attempted: bool,
    ) -> Resolution {
        match source {
            CompletionSource::Manual => {
                let window = self.race_window.as_micros() as i64;
                if remaining_micros <= window {
                    Resolution::Accept {
                        resolved_race: true,
                        strategy: Some(ResolutionStrategy::ManualPriority),
                    }
                } else {
                    Resolution::Accept {
                        resolved_race: false,
                        strategy: None,
                    }
                }
            }
            CompletionSource::Auto if manual_attempted => Resolution::Skip,
            CompletionSource::Auto => Resolution::Accept {
                resolved_race: false,
                strategy: None,
            },
        }
    }
}

impl Default for RaceResolver {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}
