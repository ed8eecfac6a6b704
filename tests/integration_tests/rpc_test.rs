//! Three real node servers on loopback, driven through `NodeClient`

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use proctor::authority::{StandingStatus, StrikeOutcome};
use proctor::config::{Config, PeerConfig, Role};
use proctor::exclusion::{CsState, EntryMode};
use proctor::rpc::{ClientConfig, ClientError, NodeClient, NodeServer};
use proctor::session::questions::default_question_bank;
use proctor::session::{
    AnswerOutcome, CompletionSource, FinalizeOutcome, QuestionView, SessionAdmission,
};

struct TestCluster {
    config: Config,
    servers: HashMap<Role, Arc<NodeServer>>,
    stops: Vec<oneshot::Sender<()>>,
}

impl TestCluster {
    /// Start every role except those in `down`, whose ports stay closed
    async fn start(down: &[Role]) -> Self {
        Self::start_with(down, false).await
    }

    async fn start_with(down: &[Role], startup_sync: bool) -> Self {
        let mut config = Config::default();
        config.timesync.startup_sync = startup_sync;
        config.timesync.query_timeout_ms = 1000;
        config.exclusion.reply_timeout_ms = Some(2000);
        config.rpc.timeout_ms = 2000;

        let mut listeners = HashMap::new();
        for role in Role::all() {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let peer = peer_mut(&mut config, role);
            peer.bind_address = addr;
            peer.url = format!("http://{addr}");
            if !down.contains(&role) {
                listeners.insert(role, listener);
            }
        }

        let mut servers = HashMap::new();
        let mut stops = Vec::new();
        for (role, listener) in listeners {
            let server = Arc::new(NodeServer::new(config.clone(), role).unwrap());
            let (tx, rx) = oneshot::channel::<()>();
            let serving = Arc::clone(&server);
            tokio::spawn(async move {
                let signal = async move {
                    let _ = rx.await;
                };
                serving.serve(listener, signal).await
            });
            servers.insert(role, server);
            stops.push(tx);
        }

        Self {
            config,
            servers,
            stops,
        }
    }

    fn client(&self, role: Role) -> NodeClient {
        let peer = self.config.cluster.peer(role);
        NodeClient::new(
            peer.node_id(),
            ClientConfig::new(&peer.url).with_timeout(Duration::from_secs(2)),
        )
        .unwrap()
    }
}

impl Drop for TestCluster {
    fn drop(&mut self) {
        for stop in self.stops.drain(..) {
            let _ = stop.send(());
        }
    }
}

fn peer_mut(config: &mut Config, role: Role) -> &mut PeerConfig {
    match role {
        Role::Coordinator => &mut config.cluster.coordinator,
        Role::Authority => &mut config.cluster.authority,
        Role::Agent => &mut config.cluster.agent,
    }
}

// ============================================================================
// Basics
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_health_reports_role() {
    let cluster = TestCluster::start(&[]).await;

    for role in Role::all() {
        let health = cluster.client(role).health().await.unwrap();
        assert_eq!(health.status, "healthy");
        assert_eq!(health.role, role);
        assert_eq!(health.node_id.as_str(), role.as_str());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_role_mismatch_is_not_found() {
    let cluster = TestCluster::start(&[]).await;

    let err = cluster.client(Role::Authority).admit("42").await.unwrap_err();
    assert!(matches!(err, ClientError::HttpError { status: 404, .. }));

    let err = cluster.client(Role::Agent).marksheet().await.unwrap_err();
    assert!(matches!(err, ClientError::HttpError { status: 404, .. }));
}

// ============================================================================
// Time Sync
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sync_over_http() {
    let cluster = TestCluster::start(&[]).await;
    let coordinator = cluster.client(Role::Coordinator);

    let report = coordinator.run_sync().await.unwrap();
    assert_eq!(report.reachable_count(), 3);
    // 0, +7 and -4 seconds average to +1
    assert!((report.mean_delta_micros - 1_000_000).abs() < 100_000);

    for role in Role::all() {
        let time = cluster.client(role).time().await.unwrap();
        assert!(
            (time.offset_micros - 1_000_000).abs() < 100_000,
            "{role} offset {}",
            time.offset_micros
        );
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sync_skips_dead_node() {
    let cluster = TestCluster::start(&[Role::Agent]).await;

    let report = cluster.client(Role::Coordinator).run_sync().await.unwrap();
    assert_eq!(report.reachable_count(), 2);
    assert_eq!(report.unreachable().len(), 1);
    assert_eq!(report.unreachable()[0].as_str(), "agent");
    // Mean of 0 and +7
    assert!((report.mean_delta_micros - 3_500_000).abs() < 100_000);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_admission_waits_for_startup_sync() {
    let cluster = TestCluster::start_with(&[], true).await;
    let coordinator = cluster.client(Role::Coordinator);

    let admitted = coordinator.admit("29").await.unwrap();
    assert!(matches!(admitted, SessionAdmission::Admitted { .. }));

    // The deadline above was stamped on the synchronized clock
    let time = coordinator.time().await.unwrap();
    assert!(
        (time.offset_micros - 1_000_000).abs() < 100_000,
        "coordinator offset {}",
        time.offset_micros
    );
}

// ============================================================================
// Exam Flow
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_exam_result_reaches_marksheet() {
    let cluster = TestCluster::start(&[]).await;
    let coordinator = cluster.client(Role::Coordinator);
    let bank = default_question_bank();

    let admitted = coordinator.admit("42").await.unwrap();
    assert!(matches!(admitted, SessionAdmission::Admitted { total_questions: 10, .. }));
    assert_eq!(
        coordinator.admit("42").await.unwrap(),
        SessionAdmission::Duplicate
    );

    match coordinator.question("42").await.unwrap() {
        QuestionView::Question { id, number, .. } => {
            assert_eq!(id, bank[0].id);
            assert_eq!(number, 1);
        }
        other => panic!("expected a question, got {other:?}"),
    }

    let answered = coordinator.answer("42", &bank[0].correct).await.unwrap();
    assert!(matches!(
        answered,
        AnswerOutcome::Answered {
            correct: true,
            score: 1,
            ..
        }
    ));

    let outcome = coordinator
        .finalize("42", CompletionSource::Manual)
        .await
        .unwrap();
    assert!(matches!(outcome, FinalizeOutcome::Finalized { score: 1, .. }));
    assert_eq!(
        coordinator
            .finalize("42", CompletionSource::Manual)
            .await
            .unwrap(),
        FinalizeOutcome::IdempotentNoop
    );

    let marksheet = cluster.client(Role::Authority).marksheet().await.unwrap();
    let aashna = marksheet.students.iter().find(|s| s.key == "42").unwrap();
    assert_eq!(aashna.marks, 10);
    assert!(!aashna.passed());
    assert_eq!(aashna.exam.as_ref().unwrap().source, CompletionSource::Manual);

    let stats = coordinator.admission_stats().await.unwrap();
    assert_eq!(stats.current_primary_load, 0);
    assert_eq!(stats.primary_processed, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_backup_toggle_over_http() {
    let cluster = TestCluster::start(&[]).await;
    let coordinator = cluster.client(Role::Coordinator);

    let stats = coordinator.set_backup_running(false).await.unwrap();
    assert!(!stats.backup_running);

    for i in 0..5 {
        coordinator.admit(&format!("load-{i}")).await.unwrap();
    }
    assert_eq!(
        coordinator.admit("load-5").await.unwrap(),
        SessionAdmission::Overloaded
    );
}

// ============================================================================
// Misconduct Under Mutual Exclusion
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_misconduct_inside_critical_section() {
    let cluster = TestCluster::start(&[]).await;
    let coordinator = cluster.client(Role::Coordinator);
    let agent = &cluster.servers[&Role::Agent];
    let exclusion = Arc::clone(&agent.context().exclusion);

    let (entry, first) = exclusion
        .with_critical_section(|_| coordinator.report_misconduct("50"))
        .await
        .unwrap();
    assert_eq!(entry.mode, EntryMode::AllReplies);
    assert_eq!(entry.replies_received, 2);

    let first = first.unwrap();
    assert_eq!(first.outcome, StrikeOutcome::Warned);
    assert!(first.forwarded);

    let (_, second) = exclusion
        .with_critical_section(|_| coordinator.report_misconduct("50"))
        .await
        .unwrap();
    assert_eq!(second.unwrap().outcome, StrikeOutcome::Caught);

    let (_, third) = exclusion
        .with_critical_section(|_| coordinator.report_misconduct("50"))
        .await
        .unwrap();
    let third = third.unwrap();
    assert_eq!(third.outcome, StrikeOutcome::AlreadyCaught);
    assert!(!third.forwarded);

    let marksheet = cluster.client(Role::Authority).marksheet().await.unwrap();
    let rohit = marksheet.students.iter().find(|s| s.key == "50").unwrap();
    assert_eq!(rohit.status, StandingStatus::Failed);
    assert_eq!(rohit.marks, 0);

    let state = cluster.client(Role::Agent).exclusion_state().await.unwrap();
    assert_eq!(state.state, CsState::Idle);
    assert!(state.clock > 0);
}
