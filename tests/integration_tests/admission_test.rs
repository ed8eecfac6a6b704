//! Primary/backup admission at the default capacity (8) and threshold (5)

use std::sync::Arc;

use proctor::admission::{Admission, AdmissionController, Lane};
use proctor::config::AdmissionConfig;

fn controller() -> AdmissionController {
    AdmissionController::from_config(&AdmissionConfig::default())
}

#[tokio::test]
async fn test_step_function() {
    let controller = controller();

    let mut outcomes = Vec::new();
    for i in 0..9 {
        outcomes.push(controller.admit(&format!("s{i}")).await);
    }

    let primary = Admission::Admitted { lane: Lane::Primary };
    let backup = Admission::Admitted { lane: Lane::Backup };
    assert!(outcomes[..5].iter().all(|o| *o == primary));
    assert!(outcomes[5..8].iter().all(|o| *o == backup));
    assert_eq!(outcomes[8], Admission::Overloaded);

    let stats = controller.stats().await;
    assert_eq!(stats.total_requests, 9);
    assert_eq!(stats.primary_processed, 5);
    assert_eq!(stats.backup_processed, 3);
    assert_eq!(stats.rejected_requests, 1);
    assert_eq!(stats.current_primary_load + stats.current_backup_load, 8);
}

#[tokio::test]
async fn test_released_slot_is_reused() {
    let controller = controller();
    for i in 0..8 {
        controller.admit(&format!("s{i}")).await;
    }

    assert_eq!(controller.release("s2").await, Some(Lane::Primary));
    assert_eq!(controller.release("s2").await, None);
    assert_eq!(
        controller.admit("late").await,
        Admission::Admitted { lane: Lane::Primary }
    );
}

#[tokio::test]
async fn test_backup_failure_caps_at_threshold() {
    let controller = controller();
    controller.set_backup_running(false).await;

    for i in 0..5 {
        controller.admit(&format!("s{i}")).await;
    }
    assert_eq!(controller.admit("s5").await, Admission::Overloaded);

    controller.set_backup_running(true).await;
    assert_eq!(
        controller.admit("s6").await,
        Admission::Admitted { lane: Lane::Backup }
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_burst_never_exceeds_capacity() {
    let controller = Arc::new(controller());

    let tasks: Vec<_> = (0..25)
        .map(|i| {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move { controller.admit(&format!("load-{i}")).await })
        })
        .collect();

    let mut admitted = 0;
    let mut overloaded = 0;
    for task in tasks {
        match task.await.unwrap() {
            Admission::Admitted { .. } => admitted += 1,
            Admission::Overloaded => overloaded += 1,
            Admission::Duplicate => panic!("keys are unique"),
        }
    }

    assert_eq!(admitted, 8);
    assert_eq!(overloaded, 17);
    let stats = controller.stats().await;
    assert_eq!(stats.current_primary_load, 5);
    assert_eq!(stats.current_backup_load, 3);
}
