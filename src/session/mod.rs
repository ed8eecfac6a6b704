//! Exam sessions
//!
//! A session is created when the coordinator admits a student and destroyed
//! when it is finalized, either by the student's manual submit or by its
//! deadline timer. At most one of the two is ever recorded.
//!
//! - [`SessionStore`] - live sessions, deadline timers, finalization
//! - [`RaceResolver`] - which completion wins when both arrive
//! - [`questions`] - the question bank

pub mod questions;
pub mod resolver;
pub mod store;

pub use resolver::{RaceResolver, Resolution, ResolutionStrategy};
pub use store::{SessionStore, SessionSummary};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::admission::Lane;

/// What triggered a finalize
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionSource {
    /// The student submitted
    Manual,
    /// The deadline timer fired
    Auto,
}

impl CompletionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Auto => "auto",
        }
    }
}

impl std::fmt::Display for CompletionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Operation Outcomes
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SessionAdmission {
    Admitted {
        lane: Lane,
        deadline: DateTime<Utc>,
        duration_secs: u64,
        total_questions: usize,
    },
    Duplicate,
    Overloaded,
    /// Key not on the roster
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum QuestionView {
    Question {
        id: u32,
        number: usize,
        total: usize,
        prompt: String,
        options: Vec<String>,
        remaining_secs: u64,
    },
    Completed {
        score: u32,
        total: usize,
    },
    Expired,
    NoSession,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AnswerOutcome {
    Answered {
        question_id: u32,
        correct: bool,
        correct_answer: String,
        score: u32,
        remaining_secs: u64,
        all_completed: bool,
    },
    Completed,
    Expired,
    NoSession,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FinalizeOutcome {
    Finalized {
        score: u32,
        total: u32,
        source: CompletionSource,
        resolved_race: bool,
        strategy: Option<ResolutionStrategy>,
        lane: Lane,
    },
    /// Already finalized, never admitted, or the timer lost the race
    IdempotentNoop,
}

impl FinalizeOutcome {
    pub fn is_finalized(&self) -> bool {
        matches!(self, Self::Finalized { .. })
    }
}
