//! End-to-end consumer scenarios over the in-memory transport.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_test::assert_ok;

use kafka_conveyor::consumer::{Consumer, ConsumerConfiguration, ConsumerStatus};
use kafka_conveyor::test_utils::{CollectingHandler, InMemoryStream};
use kafka_conveyor::transport::{RebalanceEvent, TransportError};
use kafka_conveyor::types::Partition;

fn partition(n: i32) -> Partition {
    Partition::new("events".to_string(), n)
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_test_writer()
        .try_init()
        .ok();
}

fn consumer_config(
    handler: Arc<CollectingHandler>,
    workers: usize,
    capacity: usize,
) -> Arc<ConsumerConfiguration> {
    Arc::new(
        ConsumerConfiguration::builder()
            .name("it-consumer")
            .group_id("it-group")
            .topic("events")
            .worker_count(workers)
            .queue_capacity(capacity)
            .handler(handler)
            .fetch_timeout(Duration::from_millis(10))
            .telemetry_interval(Duration::from_millis(50))
            .build()
            .unwrap(),
    )
}

async fn wait_until<F: Fn() -> bool>(condition: F, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

#[tokio::test]
async fn test_per_partition_order_with_interleaved_arrivals() {
    let stream = InMemoryStream::new();
    stream.push_value("events", 0, 10, b"a");
    stream.push_value("events", 1, 5, b"b");
    stream.push_value("events", 0, 11, b"c");

    let handler = CollectingHandler::new();
    let (rebalance_tx, rebalance_rx) = mpsc::unbounded_channel();
    rebalance_tx
        .send(RebalanceEvent::Assigned(vec![partition(0), partition(1)]))
        .unwrap();

    let consumer = Consumer::new(
        consumer_config(handler.clone(), 2, 4),
        stream.clone(),
        rebalance_rx,
    );
    let mut handle = consumer.start();
    handle.wait_for(ConsumerStatus::Running).await.unwrap();

    assert!(handler.wait_for_count(3, Duration::from_secs(5)).await);
    assert_ok!(handle.stop().await);

    assert_eq!(handler.offsets_for(&partition(0)), vec![10, 11]);
    assert_eq!(handler.offsets_for(&partition(1)), vec![5]);

    // Offsets committed as next-offset-to-consume, after processing.
    assert_eq!(stream.committed_offset(&partition(0)), Some(12));
    assert_eq!(stream.committed_offset(&partition(1)), Some(6));
    assert_eq!(stream.subscriptions(), vec!["events".to_string()]);
}

#[tokio::test]
async fn test_many_partitions_keep_order_under_concurrency() {
    let stream = InMemoryStream::new();
    for offset in 0..20 {
        for p in 0..4 {
            stream.push_value("events", p, offset, format!("{p}:{offset}").as_bytes());
        }
    }

    let handler = CollectingHandler::new();
    let (rebalance_tx, rebalance_rx) = mpsc::unbounded_channel();
    rebalance_tx
        .send(RebalanceEvent::Assigned(
            (0..4).map(partition).collect(),
        ))
        .unwrap();

    let consumer = Consumer::new(
        consumer_config(handler.clone(), 3, 4),
        stream,
        rebalance_rx,
    );
    let mut handle = consumer.start();
    handle.wait_for(ConsumerStatus::Running).await.unwrap();

    assert!(handler.wait_for_count(80, Duration::from_secs(10)).await);
    handle.stop().await.unwrap();

    for p in 0..4 {
        let offsets = handler.offsets_for(&partition(p));
        assert_eq!(offsets, (0..20).collect::<Vec<i64>>(), "partition {p}");
    }
}

#[tokio::test]
async fn test_saturation_pauses_only_the_saturated_workers_partitions() {
    init_tracing();
    let stream = InMemoryStream::new();
    // Partition 0 floods its worker; partition 1 gets a single record so its
    // worker can never saturate.
    for offset in 0..8 {
        stream.push_value("events", 0, offset, b"flood");
    }
    stream.push_value("events", 1, 0, b"single");

    let handler = CollectingHandler::new().with_delay(Duration::from_millis(30));
    let (rebalance_tx, rebalance_rx) = mpsc::unbounded_channel();
    rebalance_tx
        .send(RebalanceEvent::Assigned(vec![partition(0), partition(1)]))
        .unwrap();

    let consumer = Consumer::new(
        consumer_config(handler.clone(), 2, 1),
        stream.clone(),
        rebalance_rx,
    );
    let mut handle = consumer.start();
    handle.wait_for(ConsumerStatus::Running).await.unwrap();

    let p0_paused = {
        let stream = stream.clone();
        wait_until(
            move || stream.paused_partitions().contains(&partition(0)),
            Duration::from_secs(5),
        )
        .await
    };
    assert!(p0_paused, "the flooded partition should be paused");
    assert!(
        !stream.paused_partitions().contains(&partition(1)),
        "an unrelated partition must not be paused"
    );

    assert!(handler.wait_for_count(9, Duration::from_secs(10)).await);

    // After draining, the feeder resumes the paused partition.
    let resumed = {
        let stream = stream.clone();
        wait_until(
            move || stream.paused_partitions().is_empty(),
            Duration::from_secs(5),
        )
        .await
    };
    assert!(resumed, "paused partitions should resume after drain");

    handle.stop().await.unwrap();
    assert_eq!(handler.offsets_for(&partition(0)), (0..8).collect::<Vec<i64>>());
}

#[tokio::test]
async fn test_control_loop_interruptions_never_lose_a_backpressured_record() {
    init_tracing();
    let stream = InMemoryStream::new();
    for offset in 0..6 {
        stream.push_value("events", 0, offset, b"slow");
    }

    let handler = CollectingHandler::new().with_delay(Duration::from_millis(80));
    let (rebalance_tx, rebalance_rx) = mpsc::unbounded_channel();
    rebalance_tx
        .send(RebalanceEvent::Assigned(vec![partition(0)]))
        .unwrap();

    // A telemetry interval far shorter than the processing delay keeps
    // interrupting the feed step while the single queue slot is full.
    let config = Arc::new(
        ConsumerConfiguration::builder()
            .name("it-consumer")
            .group_id("it-group")
            .topic("events")
            .worker_count(1)
            .queue_capacity(1)
            .handler(handler.clone())
            .fetch_timeout(Duration::from_millis(10))
            .telemetry_interval(Duration::from_millis(5))
            .build()
            .unwrap(),
    );
    let consumer = Consumer::new(config, stream.clone(), rebalance_rx);
    let mut handle = consumer.start();
    handle.wait_for(ConsumerStatus::Running).await.unwrap();

    assert!(handler.wait_for_count(6, Duration::from_secs(10)).await);
    handle.stop().await.unwrap();

    // Every offset arrived, in order, with nothing skipped over.
    assert_eq!(
        handler.offsets_for(&partition(0)),
        (0..6).collect::<Vec<i64>>()
    );
    assert_eq!(stream.committed_offset(&partition(0)), Some(6));
}

#[tokio::test]
async fn test_rebalance_drops_revoked_partition_and_keeps_running() {
    let stream = InMemoryStream::new();
    stream.push_value("events", 0, 0, b"before");
    stream.push_value("events", 1, 0, b"before");

    let handler = CollectingHandler::new();
    let (rebalance_tx, rebalance_rx) = mpsc::unbounded_channel();
    rebalance_tx
        .send(RebalanceEvent::Assigned(vec![partition(0), partition(1)]))
        .unwrap();

    let consumer = Consumer::new(
        consumer_config(handler.clone(), 2, 4),
        stream.clone(),
        rebalance_rx,
    );
    let mut handle = consumer.start();
    handle.wait_for(ConsumerStatus::Running).await.unwrap();
    assert!(handler.wait_for_count(2, Duration::from_secs(5)).await);

    // Shrink the assignment to partition 0 only.
    rebalance_tx
        .send(RebalanceEvent::Assigned(vec![partition(0)]))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    // A stale fetch for the revoked partition is dropped; the owned one flows.
    stream.push_value("events", 1, 1, b"stale");
    stream.push_value("events", 0, 1, b"owned");
    assert!(handler.wait_for_count(3, Duration::from_secs(5)).await);
    assert_eq!(handle.status(), ConsumerStatus::Running);

    handle.stop().await.unwrap();
    assert_eq!(handler.offsets_for(&partition(0)), vec![0, 1]);
    assert_eq!(handler.offsets_for(&partition(1)), vec![0]);
}

#[tokio::test]
async fn test_revoke_event_drains_in_flight_records_first() {
    init_tracing();
    let stream = InMemoryStream::new();
    for offset in 0..5 {
        stream.push_value("events", 0, offset, b"r");
    }

    let handler = CollectingHandler::new().with_delay(Duration::from_millis(10));
    let (rebalance_tx, rebalance_rx) = mpsc::unbounded_channel();
    rebalance_tx
        .send(RebalanceEvent::Assigned(vec![partition(0)]))
        .unwrap();

    let consumer = Consumer::new(
        consumer_config(handler.clone(), 1, 8),
        stream.clone(),
        rebalance_rx,
    );
    let mut handle = consumer.start();
    handle.wait_for(ConsumerStatus::Running).await.unwrap();

    // Let at least one record start processing, then revoke everything.
    assert!(handler.wait_for_count(1, Duration::from_secs(5)).await);
    rebalance_tx
        .send(RebalanceEvent::Revoked(vec![partition(0)]))
        .unwrap();

    let drained = wait_until(|| stream.queued_len() == 0, Duration::from_secs(5)).await;
    // Everything fetched before the revoke finishes processing in order.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let offsets = handler.offsets_for(&partition(0));
    assert_eq!(offsets, (0..offsets.len() as i64).collect::<Vec<i64>>());
    assert!(drained || !offsets.is_empty());

    handle.stop().await.unwrap();
}

#[tokio::test]
async fn test_transient_fetch_error_does_not_stop_the_consumer() {
    let stream = InMemoryStream::new();
    stream.fail_next_fetch(TransportError::Transient("broker hiccup".into()));
    stream.push_value("events", 0, 0, b"after-error");

    let handler = CollectingHandler::new();
    let (rebalance_tx, rebalance_rx) = mpsc::unbounded_channel();
    rebalance_tx
        .send(RebalanceEvent::Assigned(vec![partition(0)]))
        .unwrap();

    let consumer = Consumer::new(
        consumer_config(handler.clone(), 1, 4),
        stream,
        rebalance_rx,
    );
    let mut handle = consumer.start();
    handle.wait_for(ConsumerStatus::Running).await.unwrap();

    assert!(handler.wait_for_count(1, Duration::from_secs(5)).await);
    assert_eq!(handle.status(), ConsumerStatus::Running);
    handle.stop().await.unwrap();
}

#[tokio::test]
async fn test_failing_record_is_skipped_without_commit() {
    let stream = InMemoryStream::new();
    stream.push_value("events", 0, 0, b"poison");
    stream.push_value("events", 0, 1, b"good");

    let handler = CollectingHandler::new();
    handler.fail_on(b"poison");
    let (rebalance_tx, rebalance_rx) = mpsc::unbounded_channel();
    rebalance_tx
        .send(RebalanceEvent::Assigned(vec![partition(0)]))
        .unwrap();

    let consumer = Consumer::new(
        consumer_config(handler.clone(), 1, 4),
        stream.clone(),
        rebalance_rx,
    );
    let mut handle = consumer.start();
    handle.wait_for(ConsumerStatus::Running).await.unwrap();

    assert!(handler.wait_for_count(1, Duration::from_secs(5)).await);
    handle.stop().await.unwrap();

    assert_eq!(handler.offsets_for(&partition(0)), vec![1]);
    // Only the successful record's offset was committed.
    assert_eq!(stream.commits(), vec![(partition(0), 2)]);
}
