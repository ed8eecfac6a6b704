//! Ricart-Agrawala across in-process nodes

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use proctor::clock::NodeId;
use proctor::exclusion::{CsState, EntryMode, RequestDecision};

use super::fixtures::{three_nodes, LocalNetwork};

// ============================================================================
// Safety
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_mutual_exclusion_three_nodes() {
    let (_net, nodes) = three_nodes(None);
    let inside = Arc::new(AtomicUsize::new(0));
    let violations = Arc::new(AtomicUsize::new(0));
    let entries = Arc::new(AtomicUsize::new(0));

    let tasks: Vec<_> = nodes
        .iter()
        .map(|node| {
            let node = Arc::clone(node);
            let inside = Arc::clone(&inside);
            let violations = Arc::clone(&violations);
            let entries = Arc::clone(&entries);
            tokio::spawn(async move {
                for _ in 0..5 {
                    node.with_critical_section(|entry| {
                        let inside = Arc::clone(&inside);
                        let violations = Arc::clone(&violations);
                        let entries = Arc::clone(&entries);
                        async move {
                            assert_eq!(entry.mode, EntryMode::AllReplies);
                            if inside.fetch_add(1, Ordering::SeqCst) != 0 {
                                violations.fetch_add(1, Ordering::SeqCst);
                            }
                            entries.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(5)).await;
                            inside.fetch_sub(1, Ordering::SeqCst);
                        }
                    })
                    .await
                    .unwrap();
                }
            })
        })
        .collect();

    let all = futures::future::join_all(tasks);
    tokio::time::timeout(Duration::from_secs(30), all)
        .await
        .expect("nodes deadlocked")
        .into_iter()
        .for_each(|r| r.unwrap());

    assert_eq!(violations.load(Ordering::SeqCst), 0);
    assert_eq!(entries.load(Ordering::SeqCst), 15);

    for node in &nodes {
        let snapshot = node.snapshot().await;
        assert_eq!(snapshot.state, CsState::Idle);
        assert!(snapshot.deferred.is_empty());
    }
}

// ============================================================================
// Liveness
// ============================================================================

#[tokio::test]
async fn test_silent_peer_times_out() {
    let net = LocalNetwork::new();
    let peers = ["alpha", "beta", "ghost"];
    let alpha = net.join("alpha", &peers, Some(Duration::from_millis(200)));
    let _beta = net.join("beta", &peers, Some(Duration::from_millis(200)));

    let entry = alpha.acquire().await.unwrap();
    assert_eq!(entry.mode, EntryMode::TimedOut);
    assert_eq!(entry.replies_received, 1);
    assert_eq!(alpha.snapshot().await.state, CsState::InCs);

    alpha.release().await.unwrap();
    assert_eq!(alpha.snapshot().await.state, CsState::Idle);
}

// ============================================================================
// Ordering
// ============================================================================

#[tokio::test]
async fn test_lower_timestamp_wins() {
    let net = LocalNetwork::new();
    let alpha = net.join("alpha", &["alpha", "ghost"], None);

    // Requesting at timestamp 5
    alpha.clock().observe(3);
    let own = alpha.begin_request().await.unwrap();
    assert_eq!(own, 5);

    let earlier = alpha.on_request(&NodeId::from("ghost"), 3).await;
    let later = alpha.on_request(&NodeId::from("ghost"), 9).await;

    assert_eq!(earlier, RequestDecision::Replied);
    assert_eq!(later, RequestDecision::Deferred);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_waiters_enter_in_timestamp_order() {
    let (_net, nodes) = three_nodes(None);
    let (agent, authority, coordinator) = (&nodes[0], &nodes[1], &nodes[2]);
    let order = Arc::new(tokio::sync::Mutex::new(Vec::new()));

    coordinator.acquire().await.unwrap();

    let spawn_waiter = |node: &Arc<proctor::exclusion::RicartAgrawala>| {
        let node = Arc::clone(node);
        let order = Arc::clone(&order);
        tokio::spawn(async move {
            let entry = node.acquire().await.unwrap();
            order.lock().await.push((node.node_id().clone(), entry.timestamp));
            tokio::time::sleep(Duration::from_millis(20)).await;
            node.release().await.unwrap();
        })
    };

    // authority stamps first; agent then stamps a later request even though
    // its id sorts lower
    let first = spawn_waiter(authority);
    tokio::time::sleep(Duration::from_millis(50)).await;
    let second = spawn_waiter(agent);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let held = coordinator.snapshot().await;
    assert_eq!(held.state, CsState::InCs);
    assert_eq!(held.deferred.len(), 2);
    assert_eq!(
        authority.snapshot().await.deferred,
        vec![NodeId::from("agent")]
    );

    coordinator.release().await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        first.await.unwrap();
        second.await.unwrap();
    })
    .await
    .unwrap();

    let order = order.lock().await;
    assert_eq!(order.len(), 2);
    assert_eq!(order[0].0, NodeId::from("authority"));
    assert_eq!(order[1].0, NodeId::from("agent"));
    assert!(order[0].1 < order[1].1);
}

#[tokio::test]
async fn test_equal_timestamps_break_ties_by_node_id() {
    let net = LocalNetwork::new();
    let peers = ["alpha", "beta"];
    let alpha = net.join("alpha", &peers, None);
    let beta = net.join("beta", &peers, None);

    let ts_a = alpha.begin_request().await.unwrap();
    let ts_b = beta.begin_request().await.unwrap();
    assert_eq!(ts_a, ts_b);

    // beta > alpha, so alpha holds beta's request and beta answers alpha
    assert_eq!(
        alpha.on_request(&NodeId::from("beta"), ts_b).await,
        RequestDecision::Deferred
    );
    assert_eq!(
        beta.on_request(&NodeId::from("alpha"), ts_a).await,
        RequestDecision::Replied
    );

    let a = alpha.snapshot().await;
    assert_eq!(a.replies_received, 1);
    assert_eq!(a.deferred, vec![NodeId::from("beta")]);
    assert_eq!(beta.snapshot().await.replies_received, 0);
}

#[tokio::test]
async fn test_release_answers_deferred_requests() {
    let net = LocalNetwork::new();
    let peers = ["alpha", "beta"];
    let alpha = net.join("alpha", &peers, None);
    let beta = net.join("beta", &peers, None);

    alpha.acquire().await.unwrap();

    let waiter = {
        let beta = Arc::clone(&beta);
        tokio::spawn(async move { beta.acquire().await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(beta.snapshot().await.state, CsState::Requesting);
    assert_eq!(alpha.snapshot().await.deferred, vec![NodeId::from("beta")]);

    assert_eq!(alpha.release().await.unwrap(), 1);

    let entry = tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(entry.mode, EntryMode::AllReplies);
    assert!(entry.timestamp > 1);
    beta.release().await.unwrap();
}

#[tokio::test]
async fn test_reply_outside_request_is_ignored() {
    let net = LocalNetwork::new();
    let alpha = net.join("alpha", &["alpha", "beta"], None);

    alpha.on_reply(&NodeId::from("beta"), 7).await;

    let snapshot = alpha.snapshot().await;
    assert_eq!(snapshot.replies_received, 0);
    // The clock still advances
    assert!(snapshot.clock >= 8);
}
