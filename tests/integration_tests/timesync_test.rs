//! Berkeley convergence over in-process clocks

use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;

use proctor::clock::{NodeId, WallClock};
use proctor::timesync::{BerkeleySync, LocalTime, TimeSource};

/// In-process sampling jitter is far below this
const TOLERANCE_MICROS: i64 = 50_000;

struct Cluster {
    clocks: Vec<Arc<WallClock>>,
    sync: BerkeleySync,
}

fn cluster(offsets_micros: &[i64]) -> Cluster {
    let clocks: Vec<Arc<WallClock>> = offsets_micros
        .iter()
        .map(|o| Arc::new(WallClock::with_offset_micros(*o)))
        .collect();
    let sources: Vec<Arc<dyn TimeSource>> = clocks
        .iter()
        .enumerate()
        .map(|(i, c)| {
            Arc::new(LocalTime::new(NodeId::new(format!("node-{i}")), Arc::clone(c)))
                as Arc<dyn TimeSource>
        })
        .collect();

    let mut sources = sources.into_iter();
    let local = sources.next().unwrap();
    let sync = BerkeleySync::new(local, sources.collect(), Duration::from_secs(1));
    Cluster { clocks, sync }
}

fn spread(clocks: &[Arc<WallClock>]) -> i64 {
    let offsets: Vec<i64> = clocks.iter().map(|c| c.offset_micros()).collect();
    offsets.iter().max().unwrap() - offsets.iter().min().unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_clocks_converge_to_mean(
        coordinator in -120_000_000i64..120_000_000,
        participants in prop::collection::vec(-120_000_000i64..120_000_000, 1..5),
    ) {
        let mut offsets = vec![coordinator];
        offsets.extend(participants);
        let expected = offsets.iter().sum::<i64>() / offsets.len() as i64;

        let cluster = cluster(&offsets);
        let report = tokio_test::block_on(cluster.sync.run_sync()).unwrap();

        prop_assert_eq!(report.reachable_count(), offsets.len());
        prop_assert!(spread(&cluster.clocks) < TOLERANCE_MICROS);
        for clock in &cluster.clocks {
            prop_assert!((clock.offset_micros() - expected).abs() < TOLERANCE_MICROS);
        }
    }
}

#[tokio::test]
async fn test_resync_is_near_noop() {
    let cluster = cluster(&[0, 7_000_000, -4_000_000]);

    cluster.sync.run_sync().await.unwrap();
    let after_first: Vec<i64> = cluster.clocks.iter().map(|c| c.offset_micros()).collect();

    let second = cluster.sync.run_sync().await.unwrap();
    for entry in &second.entries {
        assert!(entry.correction_micros.abs() < TOLERANCE_MICROS);
        assert!(entry.adjusted);
    }
    for (clock, before) in cluster.clocks.iter().zip(after_first) {
        assert!((clock.offset_micros() - before).abs() < TOLERANCE_MICROS);
    }
}

#[tokio::test]
async fn test_default_skews_land_on_one_second() {
    // 0, +7 and -4 seconds average to +1
    let cluster = cluster(&[0, 7_000_000, -4_000_000]);
    let report = cluster.sync.run_sync().await.unwrap();

    assert!((report.mean_delta_micros - 1_000_000).abs() < TOLERANCE_MICROS);
    assert_eq!(report.entries[0].delta_micros, Some(0));
    assert!(report.display().contains("3/3 reachable"));
}
