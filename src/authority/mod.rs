//! Authority marksheet
//!
//! The authority node keeps every student's standing: exam marks forwarded by
//! the coordinator and penalties for misconduct. A warning caps marks at 50,
//! a catch sets them to 0. A student passes at 50 or above.

mod strikes;

pub use strikes::{StrikeOutcome, StrikeTracker};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use crate::admission::Lane;
use crate::config::StudentEntry;
use crate::error::Result;
use crate::ledger::{ResultEvent, ResultSink};
use crate::session::CompletionSource;

pub const FULL_MARKS: u32 = 100;
pub const WARNED_MARKS: u32 = 50;
pub const PASS_MARK: u32 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StandingStatus {
    Active,
    Warned,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExamRecord {
    pub score: u32,
    pub total: u32,
    pub source: CompletionSource,
    pub lane: Lane,
    pub race_resolved: bool,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentStanding {
    pub key: String,
    pub name: String,
    pub marks: u32,
    pub status: StandingStatus,
    pub reason: String,
    pub exam: Option<ExamRecord>,
}

impl StudentStanding {
    fn new(key: &str, name: &str) -> Self {
        Self {
            key: key.to_string(),
            name: name.to_string(),
            marks: FULL_MARKS,
            status: StandingStatus::Active,
            reason: String::new(),
            exam: None,
        }
    }

    pub fn passed(&self) -> bool {
        self.marks >= PASS_MARK
    }

    /// Exam percentage, then misconduct caps
    fn recompute(&mut self) {
        let base = match &self.exam {
            Some(exam) if exam.total > 0 => exam.score * FULL_MARKS / exam.total,
            Some(_) => 0,
            None => FULL_MARKS,
        };
        self.marks = match self.status {
            StandingStatus::Active => base,
            StandingStatus::Warned => base.min(WARNED_MARKS),
            StandingStatus::Failed => 0,
        };
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarksheetReport {
    pub students: Vec<StudentStanding>,
    pub total: usize,
    pub passing: usize,
    pub generated_at: DateTime<Utc>,
}

impl MarksheetReport {
    pub fn display(&self) -> String {
        let mut out = String::from("FINAL MARKSHEET\n");
        out.push_str(&format!(
            "{:<8} | {:<12} | {:<5} | {:<6} | {:<8} | {}\n",
            "Roll", "Name", "Marks", "Result", "Status", "Reason"
        ));
        out.push_str(&"-".repeat(64));
        out.push('\n');
        for s in &self.students {
            out.push_str(&format!(
                "{:<8} | {:<12} | {:<5} | {:<6} | {:<8} | {}\n",
                s.key,
                s.name,
                s.marks,
                if s.passed() { "PASS" } else { "FAIL" },
                format!("{:?}", s.status).to_uppercase(),
                s.reason
            ));
        }
        out.push_str(&format!("Passing: {}/{}", self.passing, self.total));
        out
    }
}

pub struct Marksheet {
    students: RwLock<BTreeMap<String, StudentStanding>>,
}

impl Marksheet {
    pub fn new(roster: &[StudentEntry]) -> Self {
        let students = roster
            .iter()
            .map(|s| (s.key.clone(), StudentStanding::new(&s.key, &s.name)))
            .collect();
        Self {
            students: RwLock::new(students),
        }
    }

    /// Store an exam result. Students missing from the roster are added.
    pub async fn record_result(&self, event: &ResultEvent) -> StudentStanding {
        let mut students = self.students.write().await;
        let standing = students
            .entry(event.session_key.clone())
            .or_insert_with(|| StudentStanding::new(&event.session_key, &event.session_key));

        standing.exam = Some(ExamRecord {
            score: event.score,
            total: event.total,
            source: event.source,
            lane: event.lane,
            race_resolved: event.race_resolved,
            recorded_at: event.recorded_at,
        });
        standing.recompute();

        tracing::info!(
            student = %event.session_key,
            score = event.score,
            marks = standing.marks,
            source = %event.source,
            "Exam result recorded"
        );
        standing.clone()
    }

    /// First offense
    pub async fn warn(&self, key: &str) -> Option<StudentStanding> {
        self.penalize(key, StandingStatus::Warned, "Warned: copying").await
    }

    /// Second offense
    pub async fn catch(&self, key: &str) -> Option<StudentStanding> {
        self.penalize(key, StandingStatus::Failed, "Caught: copying").await
    }

    async fn penalize(
        &self,
        key: &str,
        status: StandingStatus,
        reason: &str,
    ) -> Option<StudentStanding> {
        let mut students = self.students.write().await;
        let Some(standing) = students.get_mut(key) else {
            tracing::warn!(student = key, "Penalty for unknown student ignored");
            return None;
        };

        standing.status = status;
        standing.reason = reason.to_string();
        standing.recompute();

        tracing::warn!(student = key, marks = standing.marks, ?status, "Misconduct penalty applied");
        Some(standing.clone())
    }

    pub async fn standing(&self, key: &str) -> Option<StudentStanding> {
        self.students.read().await.get(key).cloned()
    }

    pub async fn report(&self) -> MarksheetReport {
        let students: Vec<StudentStanding> = self.students.read().await.values().cloned().collect();
        let passing = students.iter().filter(|s| s.passed()).count();
        MarksheetReport {
            total: students.len(),
            passing,
            students,
            generated_at: Utc::now(),
        }
    }
}

#[async_trait]
impl ResultSink for Marksheet {
    async fn record(&self, event: &ResultEvent) -> Result<()> {
        self.record_result(event).await;
        Ok(())
    }
}
