//! Agent drivers: an exam run, an admission load test and a misconduct
//! report under mutual exclusion.

use anyhow::{Context, Result};
use futures::future::join_all;
use rand::seq::SliceRandom;
use rand::Rng;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use super::client_for;
use proctor::admission::Lane;
use proctor::config::{Config, Role};
use proctor::rpc::NodeServer;
use proctor::session::{AnswerOutcome, CompletionSource, QuestionView, SessionAdmission};

/// Sit one exam: answer every question, then submit manually.
///
/// Answers come from `answers` in order; missing ones are picked at random.
pub async fn exam(config: &Config, student: &str, answers: Vec<String>) -> Result<()> {
    let coordinator = client_for(config, Role::Coordinator)?;

    match coordinator.admit(student).await? {
        SessionAdmission::Admitted {
            lane,
            deadline,
            total_questions,
            ..
        } => {
            println!("Admitted {student} on the {lane} lane");
            println!("  Questions: {total_questions}");
            println!("  Deadline:  {}", deadline.format("%H:%M:%S%.3f"));
        }
        other => {
            println!("Admission refused: {other:?}");
            return Ok(());
        }
    }

    let mut answers = answers.into_iter();
    loop {
        let (prompt, options) = match coordinator.question(student).await? {
            QuestionView::Question {
                number,
                total,
                prompt,
                options,
                remaining_secs,
                ..
            } => {
                println!();
                println!("Q{number}/{total} ({remaining_secs}s left)");
                (prompt, options)
            }
            QuestionView::Completed { .. } => break,
            QuestionView::Expired => {
                println!("Time is up, the session was auto-submitted");
                return Ok(());
            }
            QuestionView::NoSession => {
                println!("Session no longer active");
                return Ok(());
            }
        };

        println!("  {prompt}");
        for option in &options {
            println!("    {option}");
        }

        let answer = answers
            .next()
            .or_else(|| random_choice(&options))
            .unwrap_or_default();

        match coordinator.answer(student, &answer).await? {
            AnswerOutcome::Answered {
                correct,
                correct_answer,
                score,
                all_completed,
                ..
            } => {
                let verdict = if correct { "correct" } else { "wrong" };
                println!("  Answer {answer}: {verdict} (expected {correct_answer}), score {score}");
                if all_completed {
                    break;
                }
            }
            AnswerOutcome::Expired => {
                println!("Time is up, the session was auto-submitted");
                return Ok(());
            }
            AnswerOutcome::Completed | AnswerOutcome::NoSession => break,
        }
    }

    let outcome = coordinator.finalize(student, CompletionSource::Manual).await?;
    println!();
    println!("Submitted: {outcome:?}");
    Ok(())
}

/// Option letters look like `B) Distribute workload evenly`
fn random_choice(options: &[String]) -> Option<String> {
    options
        .choose(&mut rand::thread_rng())
        .and_then(|o| o.chars().next())
        .map(|c| c.to_string())
}

#[derive(Debug, Default)]
struct LoadTally {
    primary: usize,
    backup: usize,
    overloaded: usize,
    other: usize,
    failed: usize,
}

/// Fire `requests` concurrent admissions (15-25 when unset) with fresh keys.
pub async fn load_test(config: &Config, requests: Option<usize>) -> Result<()> {
    let coordinator = Arc::new(client_for(config, Role::Coordinator)?);

    let (count, base) = {
        let mut rng = rand::thread_rng();
        (
            requests.unwrap_or_else(|| rng.gen_range(15..=25)),
            rng.gen_range(10_000..100_000u32),
        )
    };
    println!("Launching {count} concurrent admissions");

    let calls = (0..count).map(|i| {
        let coordinator = Arc::clone(&coordinator);
        let key = format!("load-{}", base + i as u32);
        async move { (key.clone(), coordinator.admit(&key).await) }
    });

    let mut tally = LoadTally::default();
    for (key, result) in join_all(calls).await {
        match result {
            Ok(SessionAdmission::Admitted { lane, .. }) => {
                tracing::debug!(session = %key, %lane, "Admitted");
                match lane {
                    Lane::Primary => tally.primary += 1,
                    Lane::Backup => tally.backup += 1,
                }
            }
            Ok(SessionAdmission::Overloaded) => tally.overloaded += 1,
            Ok(other) => {
                tracing::debug!(session = %key, outcome = ?other, "Not admitted");
                tally.other += 1;
            }
            Err(e) => {
                tracing::warn!(session = %key, error = %e, "Admission call failed");
                tally.failed += 1;
            }
        }
    }

    println!();
    println!("Load test results");
    println!("=================");
    println!("  Primary:    {}", tally.primary);
    println!("  Backup:     {}", tally.backup);
    println!("  Overloaded: {}", tally.overloaded);
    if tally.other > 0 {
        println!("  Refused:    {}", tally.other);
    }
    if tally.failed > 0 {
        println!("  Failed:     {}", tally.failed);
    }
    println!();
    println!("{}", coordinator.admission_stats().await?.display());
    Ok(())
}

/// Report a student for copying from inside the critical section.
///
/// The agent's own node server runs for the duration so the other nodes can
/// deliver requests and replies to it.
pub async fn misconduct(config: &Config, student: Option<String>) -> Result<()> {
    let student = match student {
        Some(s) => s,
        None => config
            .exam
            .roster
            .choose(&mut rand::thread_rng())
            .map(|s| s.key.clone())
            .context("No student given and the roster is empty")?,
    };

    let server = Arc::new(NodeServer::new(config.clone(), Role::Agent)?);
    let bind = config.cluster.peer(Role::Agent).bind_address;
    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind agent node on {bind}"))?;

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let serving = {
        let server = Arc::clone(&server);
        tokio::spawn(async move {
            let signal = async move {
                let _ = stop_rx.await;
            };
            server.serve(listener, signal).await
        })
    };

    let coordinator = client_for(config, Role::Coordinator)?;
    let exclusion = Arc::clone(&server.context().exclusion);

    let outcome = exclusion
        .with_critical_section(|entry| {
            println!(
                "In critical section (timestamp {}, {}, {} replies)",
                entry.timestamp,
                entry.mode.as_str(),
                entry.replies_received
            );
            coordinator.report_misconduct(&student)
        })
        .await;

    let _ = stop_tx.send(());
    if let Err(e) = serving.await? {
        tracing::warn!(error = %e, "Agent node stopped with an error");
    }

    let (_, response) = outcome?;
    let response = response?;
    println!(
        "Student {}: {:?}{}",
        response.session_key,
        response.outcome,
        if response.forwarded {
            ", penalty applied by the authority"
        } else {
            ""
        }
    );
    Ok(())
}
