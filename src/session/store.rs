//! Live session table and finalization
//!
//! Each session sits behind its own mutex, so a manual submit and the deadline
//! timer for the same student serialize on that lock while unrelated sessions
//! proceed in parallel. The table lock is only held long enough to look up or
//! remove a slot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch, Mutex, RwLock};

use super::questions::Question;
use super::{
    AnswerOutcome, CompletionSource, FinalizeOutcome, QuestionView, RaceResolver, Resolution,
    SessionAdmission,
};
use crate::admission::{Admission, AdmissionController, Lane};
use crate::clock::{micros_to_datetime, WallClock};
use crate::error::Result;
use crate::ledger::{ResultEvent, ResultSink};
use crate::utils::retry::RetryConfig;

// ============================================================================
// Session
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Active,
    Finalized,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerRecord {
    pub question_id: u32,
    pub answer: String,
    pub correct: bool,
}

#[derive(Debug)]
struct Session {
    key: String,
    lane: Lane,
    started_at: DateTime<Utc>,
    deadline_micros: i64,
    phase: SessionPhase,
    manual_attempted: bool,
    score: u32,
    current_question: usize,
    answers: Vec<AnswerRecord>,
    timer_cancel: Option<oneshot::Sender<()>>,
}

impl Session {
    fn remaining_micros(&self, clock: &WallClock) -> i64 {
        self.deadline_micros - clock.now_micros()
    }
}

/// Read-only view of a live session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub key: String,
    pub lane: Lane,
    pub started_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub score: u32,
    pub answered: usize,
    pub manual_attempted: bool,
    pub phase: SessionPhase,
}

fn remaining_secs(remaining_micros: i64) -> u64 {
    remaining_micros.max(0) as u64 / 1_000_000
}

// ============================================================================
// Session Store
// ============================================================================

pub struct SessionStore {
    sessions: RwLock<HashMap<String, Arc<Mutex<Session>>>>,
    admission: Arc<AdmissionController>,
    resolver: RaceResolver,
    sink: Arc<dyn ResultSink>,
    clock: Arc<WallClock>,
    questions: Arc<Vec<Question>>,
    roster: HashSet<String>,
    duration: Duration,
    submit_retry: RetryConfig,
    admissions_open: watch::Sender<bool>,
}

impl SessionStore {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        admission: Arc<AdmissionController>,
        resolver: RaceResolver,
        sink: Arc<dyn ResultSink>,
        clock: Arc<WallClock>,
        questions: Vec<Question>,
        roster: impl IntoIterator<Item = String>,
        duration: Duration,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            admission,
            resolver,
            sink,
            clock,
            questions: Arc::new(questions),
            roster: roster.into_iter().collect(),
            duration,
            submit_retry: RetryConfig::default(),
            admissions_open: watch::channel(true).0,
        }
    }

    /// Backoff between failed auto-submits. The timer retries until the
    /// result is recorded or the session goes away; `max_retries` is unused.
    pub fn with_submit_retry(mut self, retry: RetryConfig) -> Self {
        self.submit_retry = retry;
        self
    }

    /// Park new admissions until [`SessionStore::open_admissions`].
    pub fn hold_admissions(&self) {
        self.admissions_open.send_replace(false);
    }

    pub fn open_admissions(&self) {
        if !self.admissions_open.send_replace(true) {
            tracing::info!("Admissions open");
        }
    }

    pub fn admissions_open(&self) -> bool {
        *self.admissions_open.borrow()
    }

    pub fn admission(&self) -> &Arc<AdmissionController> {
        &self.admission
    }

    /// Admit `key` and start its deadline timer.
    ///
    /// Waits while admissions are held, so no deadline is stamped before the
    /// startup clock sync.
    pub async fn admit(self: &Arc<Self>, key: &str) -> SessionAdmission {
        let mut open = self.admissions_open.subscribe();
        if !*open.borrow_and_update() {
            tracing::debug!(session = key, "Admission waiting for clock sync");
        }
        // The sender lives in self, so this only returns once open
        let _ = open.wait_for(|open| *open).await;

        if !self.roster.is_empty() && !self.roster.contains(key) {
            tracing::warn!(session = key, "Admission refused, not on roster");
            return SessionAdmission::Unknown;
        }

        let lane = match self.admission.admit(key).await {
            Admission::Admitted { lane } => lane,
            Admission::Duplicate => return SessionAdmission::Duplicate,
            Admission::Overloaded => return SessionAdmission::Overloaded,
        };

        let now = self.clock.now_micros();
        let deadline_micros = now + self.duration.as_micros() as i64;
        let (cancel_tx, cancel_rx) = oneshot::channel();

        let session = Session {
            key: key.to_string(),
            lane,
            started_at: micros_to_datetime(now),
            deadline_micros,
            phase: SessionPhase::Active,
            manual_attempted: false,
            score: 0,
            current_question: 0,
            answers: Vec::new(),
            timer_cancel: Some(cancel_tx),
        };

        self.sessions
            .write()
            .await
            .insert(key.to_string(), Arc::new(Mutex::new(session)));
        self.spawn_deadline_timer(key.to_string(), cancel_rx);

        tracing::info!(session = key, lane = %lane, duration_secs = self.duration.as_secs(), "Session started");

        SessionAdmission::Admitted {
            lane,
            deadline: micros_to_datetime(deadline_micros),
            duration_secs: self.duration.as_secs(),
            total_questions: self.questions.len(),
        }
    }

    fn spawn_deadline_timer(self: &Arc<Self>, key: String, cancel: oneshot::Receiver<()>) {
        tokio::spawn(Arc::clone(self).run_deadline_timer(key, cancel));
    }

    /// Sleep until the deadline on the adjusted wall clock, re-arming after
    /// every clock correction, then auto-submit. A failed submit is retried
    /// with backoff so the admission slot is always released.
    async fn run_deadline_timer(self: Arc<Self>, key: String, mut cancel: oneshot::Receiver<()>) {
        loop {
            let adjusted = self.clock.adjusted();
            tokio::pin!(adjusted);
            adjusted.as_mut().enable();

            let Some(remaining) = self.remaining_for(&key).await else {
                return;
            };
            if remaining <= 0 {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(Duration::from_micros(remaining as u64)) => {}
                _ = &mut adjusted => {
                    tracing::debug!(session = %key, "Clock adjusted, re-arming deadline timer");
                }
                _ = &mut cancel => {
                    tracing::debug!(session = %key, "Deadline timer cancelled");
                    return;
                }
            }
        }

        let mut attempt = 0;
        loop {
            match self.finalize(&key, CompletionSource::Auto).await {
                Ok(FinalizeOutcome::Finalized { score, .. }) => {
                    tracing::info!(session = %key, score, "Time up, auto-submitted");
                    return;
                }
                Ok(FinalizeOutcome::IdempotentNoop) => {
                    tracing::debug!(session = %key, "Deadline reached, nothing to do");
                    return;
                }
                Err(e) => {
                    attempt += 1;
                    let delay = self.submit_retry.delay_for(attempt);
                    tracing::warn!(
                        session = %key,
                        attempt,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %e,
                        "Auto-submit failed, retrying"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = &mut cancel => return,
                    }
                }
            }
        }
    }

    /// Time left on a live session; `None` once it is gone or finalized.
    async fn remaining_for(&self, key: &str) -> Option<i64> {
        let slot = self.slot(key).await?;
        let session = slot.lock().await;
        (session.phase == SessionPhase::Active).then(|| session.remaining_micros(&self.clock))
    }

    async fn slot(&self, key: &str) -> Option<Arc<Mutex<Session>>> {
        self.sessions.read().await.get(key).cloned()
    }

    pub async fn get_question(&self, key: &str) -> QuestionView {
        let Some(slot) = self.slot(key).await else {
            return QuestionView::NoSession;
        };
        let session = slot.lock().await;

        if session.phase == SessionPhase::Finalized {
            return QuestionView::NoSession;
        }

        let remaining = session.remaining_micros(&self.clock);
        if remaining <= 0 {
            return QuestionView::Expired;
        }

        match self.questions.get(session.current_question) {
            Some(q) => QuestionView::Question {
                id: q.id,
                number: session.current_question + 1,
                total: self.questions.len(),
                prompt: q.prompt.clone(),
                options: q.options.clone(),
                remaining_secs: remaining_secs(remaining),
            },
            None => QuestionView::Completed {
                score: session.score,
                total: self.questions.len(),
            },
        }
    }

    pub async fn submit_answer(&self, key: &str, answer: &str) -> AnswerOutcome {
        let Some(slot) = self.slot(key).await else {
            return AnswerOutcome::NoSession;
        };
        let mut session = slot.lock().await;

        if session.phase == SessionPhase::Finalized {
            return AnswerOutcome::NoSession;
        }

        let remaining = session.remaining_micros(&self.clock);
        if remaining <= 0 {
            return AnswerOutcome::Expired;
        }

        let Some(question) = self.questions.get(session.current_question) else {
            return AnswerOutcome::Completed;
        };

        let correct = question.is_correct(answer);
        if correct {
            session.score += 1;
        }
        session.answers.push(AnswerRecord {
            question_id: question.id,
            answer: answer.trim().to_string(),
            correct,
        });
        session.current_question += 1;

        tracing::debug!(session = key, question = question.id, correct, score = session.score, "Answer recorded");

        AnswerOutcome::Answered {
            question_id: question.id,
            correct,
            correct_answer: question.correct.clone(),
            score: session.score,
            remaining_secs: remaining_secs(remaining),
            all_completed: session.current_question >= self.questions.len(),
        }
    }

    /// Finalize a session exactly once.
    ///
    /// If the sink fails the session stays live and the error is returned; a
    /// failed manual attempt still blocks the timer path.
    pub async fn finalize(&self, key: &str, source: CompletionSource) -> Result<FinalizeOutcome> {
        let Some(slot) = self.slot(key).await else {
            tracing::debug!(session = key, source = %source, "Finalize for unknown session ignored");
            return Ok(FinalizeOutcome::IdempotentNoop);
        };
        let mut session = slot.lock().await;

        if session.phase == SessionPhase::Finalized {
            return Ok(FinalizeOutcome::IdempotentNoop);
        }

        let remaining = session.remaining_micros(&self.clock);
        if source == CompletionSource::Manual {
            session.manual_attempted = true;
        }

        let (resolved_race, strategy) =
            match self.resolver.resolve(source, remaining, session.manual_attempted) {
                Resolution::Accept {
                    resolved_race,
                    strategy,
                } => (resolved_race, strategy),
                Resolution::Skip => {
                    tracing::info!(session = key, "Timer yielded to manual submission");
                    return Ok(FinalizeOutcome::IdempotentNoop);
                }
            };

        if resolved_race {
            tracing::warn!(
                session = key,
                remaining_ms = remaining / 1000,
                window_ms = self.resolver.race_window().as_millis() as u64,
                "Manual submit raced the deadline, manual takes priority"
            );
        }

        let total = self.questions.len() as u32;
        let event = ResultEvent::new(key, session.score, total, source, session.lane)
            .with_resolution(resolved_race, strategy);

        if let Err(e) = self.sink.record(&event).await {
            tracing::error!(session = key, source = %source, error = %e, "Failed to record result");
            return Err(e);
        }

        session.phase = SessionPhase::Finalized;
        if let Some(cancel) = session.timer_cancel.take() {
            // The receiver is gone when the timer itself is finalizing
            let _ = cancel.send(());
        }
        let (score, lane) = (session.score, session.lane);
        drop(session);

        self.sessions.write().await.remove(key);
        self.admission.release(key).await;

        crate::metrics::record_finalize(source.as_str(), resolved_race);
        tracing::info!(session = key, source = %source, score, total, lane = %lane, resolved_race, "Session finalized");

        Ok(FinalizeOutcome::Finalized {
            score,
            total,
            source,
            resolved_race,
            strategy,
            lane,
        })
    }

    pub async fn summary(&self, key: &str) -> Option<SessionSummary> {
        let slot = self.slot(key).await?;
        let session = slot.lock().await;
        Some(SessionSummary {
            key: session.key.clone(),
            lane: session.lane,
            started_at: session.started_at,
            deadline: micros_to_datetime(session.deadline_micros),
            score: session.score,
            answered: session.answers.len(),
            manual_attempted: session.manual_attempted,
            phase: session.phase,
        })
    }

    pub async fn active_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Cancel every deadline timer and drop all live sessions without
    /// recording them.
    pub async fn shutdown(&self) -> usize {
        let drained: Vec<_> = self.sessions.write().await.drain().collect();
        for (key, slot) in &drained {
            if let Some(cancel) = slot.lock().await.timer_cancel.take() {
                let _ = cancel.send(());
            }
            self.admission.release(key).await;
        }
        drained.len()
    }
}
