//! Manual submission racing the deadline timer

use std::time::Duration;

use proctor::session::{
    CompletionSource, FinalizeOutcome, ResolutionStrategy, SessionAdmission,
};

use super::fixtures::session_store;

#[tokio::test]
async fn test_manual_near_deadline_beats_timer() {
    let duration = Duration::from_millis(1500);
    let (store, ledger) = session_store(duration, Duration::from_secs(1));

    assert!(matches!(
        store.admit("42").await,
        SessionAdmission::Admitted { .. }
    ));

    // Manual at D - 0.5s while the timer fires at D
    tokio::time::sleep(Duration::from_millis(1000)).await;
    let (manual, auto) = tokio::join!(
        store.finalize("42", CompletionSource::Manual),
        async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            store.finalize("42", CompletionSource::Auto).await
        }
    );

    match manual.unwrap() {
        FinalizeOutcome::Finalized {
            source,
            resolved_race,
            strategy,
            ..
        } => {
            assert_eq!(source, CompletionSource::Manual);
            assert!(resolved_race);
            assert_eq!(strategy, Some(ResolutionStrategy::ManualPriority));
        }
        other => panic!("expected manual finalize, got {other:?}"),
    }
    assert_eq!(auto.unwrap(), FinalizeOutcome::IdempotentNoop);

    // Let the deadline timer run out as well
    tokio::time::sleep(Duration::from_millis(300)).await;

    let events = ledger.events_for("42").await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].source, CompletionSource::Manual);
    assert!(events[0].race_resolved);
}

#[tokio::test]
async fn test_simultaneous_finalize_records_once() {
    let (store, ledger) = session_store(Duration::from_secs(30), Duration::from_secs(1));
    store.admit("7").await;

    let (a, b) = tokio::join!(
        store.finalize("7", CompletionSource::Manual),
        store.finalize("7", CompletionSource::Manual)
    );

    let finalized = [a.unwrap(), b.unwrap()]
        .iter()
        .filter(|o| o.is_finalized())
        .count();
    assert_eq!(finalized, 1);
    assert_eq!(ledger.len().await, 1);
}

#[tokio::test]
async fn test_early_manual_is_not_a_race() {
    let (store, ledger) = session_store(Duration::from_secs(30), Duration::from_secs(1));
    store.admit("29").await;

    let outcome = store.finalize("29", CompletionSource::Manual).await.unwrap();
    assert!(matches!(
        outcome,
        FinalizeOutcome::Finalized {
            resolved_race: false,
            strategy: None,
            ..
        }
    ));
    assert_eq!(ledger.events().await[0].strategy, None);
}

#[tokio::test]
async fn test_timer_finalizes_untouched_session() {
    let (store, ledger) = session_store(Duration::from_millis(200), Duration::from_secs(1));
    store.admit("50").await;

    tokio::time::sleep(Duration::from_millis(500)).await;

    let events = ledger.events_for("50").await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].source, CompletionSource::Auto);
    assert!(!events[0].race_resolved);
    assert_eq!(store.active_count().await, 0);
    assert_eq!(store.admission().stats().await.current_primary_load, 0);
}

#[tokio::test]
async fn test_late_finalize_is_idempotent() {
    let (store, ledger) = session_store(Duration::from_secs(30), Duration::from_secs(1));
    store.admit("52").await;

    let first = store.finalize("52", CompletionSource::Manual).await.unwrap();
    let second = store.finalize("52", CompletionSource::Manual).await.unwrap();
    let timer = store.finalize("52", CompletionSource::Auto).await.unwrap();

    assert!(first.is_finalized());
    assert_eq!(second, FinalizeOutcome::IdempotentNoop);
    assert_eq!(timer, FinalizeOutcome::IdempotentNoop);
    assert_eq!(ledger.len().await, 1);
}
