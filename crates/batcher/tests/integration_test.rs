//! Integration tests for the batcher crate
//!
//! These tests drive the public API end to end: producers submit through the
//! batcher, the uploader records what it receives, and report subscribers
//! observe the published batches.

use eventbatch_batcher::{
    AccumulatorState, Batch, BatcherConfig, Error, Event, EventBatcher, FlushTrigger, FnUploader,
};
use futures::{FutureExt, StreamExt};
use pretty_assertions::assert_eq;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{timeout, Instant};

type Uploads = Arc<Mutex<Vec<Vec<u64>>>>;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Uploader that records the ids of every batch it is handed
fn recording_uploader() -> (
    FnUploader<impl Fn(Batch) -> futures::future::Ready<eventbatch_batcher::Result<()>>>,
    Uploads,
) {
    let uploads: Uploads = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&uploads);
    let uploader = FnUploader::new(move |batch: Batch| {
        sink.lock().unwrap().push(batch.ids());
        futures::future::ready(Ok(()))
    });
    (uploader, uploads)
}

fn recorded(uploads: &Uploads) -> Vec<Vec<u64>> {
    uploads.lock().unwrap().clone()
}

fn event(id: u64) -> Event {
    Event::new(id, format!("payload-{id}"))
}

#[tokio::test(start_paused = true)]
async fn test_size_trigger_flushes_before_deadline() {
    init_tracing();
    let (uploader, uploads) = recording_uploader();
    let batcher = EventBatcher::with_limits(3, Duration::from_millis(10), uploader).unwrap();
    let mut reports = batcher.subscribe();

    let start = Instant::now();
    for id in 1..=3 {
        batcher.submit(event(id)).await.unwrap();
    }

    let batch = reports.recv().await.expect("size-triggered batch");
    assert_eq!(batch.ids(), vec![1, 2, 3]);
    assert_eq!(batch.sequence(), 1);
    assert!(start.elapsed() < Duration::from_millis(10));
    assert_eq!(recorded(&uploads), vec![vec![1, 2, 3]]);
    assert_eq!(batcher.stats().flushes_by(FlushTrigger::Size), 1);

    batcher.close().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_deadline_trigger_fires_at_max_delay() {
    let (uploader, uploads) = recording_uploader();
    let batcher = EventBatcher::with_limits(10, Duration::from_millis(500), uploader).unwrap();
    let mut reports = batcher.subscribe();

    let start = Instant::now();
    batcher.submit(event(1)).await.unwrap();

    // Nothing may be emitted before the deadline
    let early = timeout(Duration::from_millis(499), reports.recv()).await;
    assert!(early.is_err(), "batch emitted before max_delay elapsed");
    assert!(recorded(&uploads).is_empty());

    let batch = reports.recv().await.expect("deadline-triggered batch");
    let elapsed = start.elapsed();
    assert_eq!(batch.ids(), vec![1]);
    assert!(elapsed >= Duration::from_millis(500), "flushed after {elapsed:?}");
    assert!(elapsed < Duration::from_millis(501), "flushed after {elapsed:?}");
    assert_eq!(batcher.stats().flushes_by(FlushTrigger::Deadline), 1);

    batcher.close().await.unwrap();
}

#[tokio::test]
async fn test_close_flushes_partial_batch_before_returning() {
    let (uploader, uploads) = recording_uploader();
    let batcher = EventBatcher::with_limits(10, Duration::from_secs(60), uploader).unwrap();
    let mut reports = batcher.subscribe();

    batcher.submit(event(1)).await.unwrap();
    batcher.close().await.unwrap();

    // Already published when close() returned, so no waiting is needed
    let published = reports
        .recv()
        .now_or_never()
        .expect("report available without waiting")
        .expect("final batch");
    assert_eq!(published.ids(), vec![1]);
    assert!(reports.recv().await.is_none());

    assert_eq!(recorded(&uploads), vec![vec![1]]);
    assert_eq!(batcher.stats().flushes_by(FlushTrigger::Shutdown), 1);
    assert_eq!(batcher.state(), AccumulatorState::Closed);
}

#[tokio::test]
async fn test_close_with_nothing_buffered_uploads_nothing() {
    let (uploader, uploads) = recording_uploader();
    let batcher = EventBatcher::with_limits(10, Duration::from_millis(20), uploader).unwrap();

    batcher.close().await.unwrap();

    assert!(recorded(&uploads).is_empty());
    assert_eq!(batcher.stats().batches_flushed(), 0);
}

#[tokio::test]
async fn test_submit_after_close_is_rejected() {
    let (uploader, uploads) = recording_uploader();
    let batcher = EventBatcher::with_limits(10, Duration::from_millis(20), uploader).unwrap();
    let submitter = batcher.submitter();

    batcher.close().await.unwrap();

    assert!(matches!(batcher.submit(event(1)).await, Err(Error::Closed)));
    assert!(matches!(batcher.try_submit(event(2)), Err(Error::Closed)));
    assert!(matches!(submitter.submit(event(3)).await, Err(Error::Closed)));
    assert!(batcher.is_closed());
    assert!(submitter.is_closed());
    assert!(recorded(&uploads).is_empty());
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let (uploader, uploads) = recording_uploader();
    let batcher = EventBatcher::with_limits(10, Duration::from_secs(60), uploader).unwrap();

    batcher.submit(event(1)).await.unwrap();
    batcher.close().await.unwrap();
    batcher.close().await.unwrap();

    assert_eq!(recorded(&uploads), vec![vec![1]]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_close_calls_share_one_drain() {
    let (uploader, uploads) = recording_uploader();
    let batcher =
        Arc::new(EventBatcher::with_limits(10, Duration::from_secs(60), uploader).unwrap());
    for id in 1..=4 {
        batcher.submit(event(id)).await.unwrap();
    }

    let closers: Vec<_> = (0..3)
        .map(|_| {
            let batcher = Arc::clone(&batcher);
            tokio::spawn(async move { batcher.close().await })
        })
        .collect();
    for closer in closers {
        closer.await.unwrap().unwrap();
    }

    assert_eq!(recorded(&uploads), vec![vec![1, 2, 3, 4]]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_producers_keep_per_producer_order() {
    init_tracing();
    const PRODUCERS: u64 = 4;
    const PER_PRODUCER: u64 = 250;

    let (uploader, uploads) = recording_uploader();
    let batcher = EventBatcher::with_limits(16, Duration::from_millis(5), uploader).unwrap();

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|producer| {
            let queue = batcher.submitter();
            tokio::spawn(async move {
                for seq in 0..PER_PRODUCER {
                    queue.submit(event(producer * 1000 + seq)).await.unwrap();
                }
            })
        })
        .collect();
    for producer in producers {
        producer.await.unwrap();
    }
    batcher.close().await.unwrap();

    let batches = recorded(&uploads);
    assert!(batches.iter().all(|b| !b.is_empty() && b.len() <= 16));

    let flat: Vec<u64> = batches.into_iter().flatten().collect();
    assert_eq!(flat.len() as u64, PRODUCERS * PER_PRODUCER);
    for producer in 0..PRODUCERS {
        let own: Vec<u64> = flat
            .iter()
            .copied()
            .filter(|id| id / 1000 == producer)
            .collect();
        let expected: Vec<u64> = (0..PER_PRODUCER).map(|seq| producer * 1000 + seq).collect();
        assert_eq!(own, expected, "producer {producer} out of order");
    }

    let stats = batcher.stats();
    assert_eq!(stats.events_accepted(), PRODUCERS * PER_PRODUCER);
    assert_eq!(stats.events_flushed(), PRODUCERS * PER_PRODUCER);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_accepted_events_survive_racing_close() {
    let (uploader, uploads) = recording_uploader();
    let batcher =
        Arc::new(EventBatcher::with_limits(8, Duration::from_millis(2), uploader).unwrap());

    let producers: Vec<_> = (0..4u64)
        .map(|producer| {
            let queue = batcher.submitter();
            tokio::spawn(async move {
                let mut accepted = Vec::new();
                for seq in 0.. {
                    let id = producer * 1_000_000 + seq;
                    match queue.submit(event(id)).await {
                        Ok(()) => accepted.push(id),
                        Err(Error::Closed) => break,
                        Err(e) => panic!("unexpected submit error: {e}"),
                    }
                    if seq % 64 == 0 {
                        tokio::task::yield_now().await;
                    }
                }
                accepted
            })
        })
        .collect();

    tokio::time::sleep(Duration::from_millis(20)).await;
    batcher.close().await.unwrap();

    let mut accepted = HashSet::new();
    for producer in producers {
        accepted.extend(producer.await.unwrap());
    }
    let flushed: HashSet<u64> = recorded(&uploads).into_iter().flatten().collect();
    assert_eq!(flushed, accepted);
}

#[tokio::test]
async fn test_try_submit_reports_full_queue() {
    let (uploader, uploads) = recording_uploader();
    let config = BatcherConfig::builder()
        .batch_size(10)
        .max_delay_ms(60_000)
        .queue_capacity(1)
        .build();
    let batcher = EventBatcher::new(config, uploader).unwrap();

    // The worker cannot run until this task yields, so the first event stays queued
    batcher.try_submit(event(1)).unwrap();
    assert!(matches!(batcher.try_submit(event(2)), Err(Error::QueueFull)));

    batcher.close().await.unwrap();
    assert_eq!(recorded(&uploads), vec![vec![1]]);
}

#[tokio::test]
async fn test_manual_flush_emits_current_buffer() {
    let (uploader, uploads) = recording_uploader();
    let batcher = EventBatcher::with_limits(10, Duration::from_secs(60), uploader).unwrap();

    batcher.submit(event(1)).await.unwrap();
    batcher.submit(event(2)).await.unwrap();
    assert_eq!(batcher.flush().await.unwrap(), 2);
    assert_eq!(batcher.flush().await.unwrap(), 0);

    assert_eq!(recorded(&uploads), vec![vec![1, 2]]);
    assert_eq!(batcher.stats().flushes_by(FlushTrigger::Manual), 1);
    batcher.close().await.unwrap();
}

#[tokio::test]
async fn test_failed_upload_is_skipped_and_batching_continues() {
    let attempts = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&attempts);
    let uploader = FnUploader::new(move |batch: Batch| {
        sink.lock().unwrap().push(batch.ids());
        let result = if batch.sequence() == 1 {
            Err(Error::Other(anyhow::anyhow!("downstream unavailable")))
        } else {
            Ok(())
        };
        futures::future::ready(result)
    });
    let batcher = EventBatcher::with_limits(2, Duration::from_secs(60), uploader).unwrap();
    let mut reports = batcher.subscribe();

    for id in 1..=4 {
        batcher.submit(event(id)).await.unwrap();
    }
    batcher.close().await.unwrap();

    // The failed batch is neither retried nor published
    assert_eq!(attempts.lock().unwrap().clone(), vec![vec![1, 2], vec![3, 4]]);
    let published = reports.recv().await.expect("second batch published");
    assert_eq!(published.sequence(), 2);
    assert_eq!(published.ids(), vec![3, 4]);
    assert!(reports.recv().await.is_none());

    let stats = batcher.stats();
    assert_eq!(stats.upload_failures(), 1);
    assert_eq!(stats.events_lost(), 2);
    assert_eq!(stats.events_flushed(), 2);
}

#[tokio::test]
async fn test_drain_failure_is_reported_by_close() {
    let uploader = FnUploader::new(|batch: Batch| async move {
        Err(Error::Other(anyhow::anyhow!("rejected {} events", batch.len())))
    });
    let batcher = EventBatcher::with_limits(10, Duration::from_secs(60), uploader).unwrap();

    batcher.submit(event(1)).await.unwrap();
    let err = batcher.close().await.unwrap_err();

    match &err {
        Error::ShutdownDrainFailure(msg) => assert!(msg.contains("rejected 1 events"), "{msg}"),
        other => panic!("expected ShutdownDrainFailure, got {other:?}"),
    }
    // Later calls report the same outcome
    assert!(matches!(
        batcher.close().await,
        Err(Error::ShutdownDrainFailure(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_close_gives_up_after_drain_timeout() {
    let uploader = FnUploader::new(|_batch: Batch| async {
        tokio::time::sleep(Duration::from_secs(10)).await;
        Ok(())
    });
    let config = BatcherConfig::builder()
        .batch_size(10)
        .max_delay_ms(60_000)
        .drain_timeout(Duration::from_millis(50))
        .build();
    let batcher = EventBatcher::new(config, uploader).unwrap();

    batcher.submit(event(1)).await.unwrap();
    let start = Instant::now();
    let err = batcher.close().await.unwrap_err();

    assert!(matches!(err, Error::ShutdownDrainFailure(_)));
    assert!(err.to_string().contains("did not complete"), "{err}");
    assert!(start.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn test_lagging_subscriber_loses_oldest_reports() {
    let (uploader, _uploads) = recording_uploader();
    let config = BatcherConfig::builder()
        .batch_size(1)
        .max_delay_ms(60_000)
        .report_capacity(2)
        .build();
    let batcher = EventBatcher::new(config, uploader).unwrap();
    let mut slow = batcher.subscribe();

    for id in 1..=5 {
        batcher.submit(event(id)).await.unwrap();
    }
    batcher.close().await.unwrap();

    let mut received = Vec::new();
    while let Some(batch) = slow.recv().await {
        received.push(batch.sequence());
    }
    assert_eq!(received, vec![4, 5]);
    assert_eq!(slow.missed(), 3);
}

#[tokio::test]
async fn test_report_stream_ends_after_close() {
    let (uploader, _uploads) = recording_uploader();
    let batcher = EventBatcher::with_limits(2, Duration::from_secs(60), uploader).unwrap();
    let stream = batcher.subscribe().into_stream();
    assert_eq!(batcher.subscriber_count(), 1);

    for id in 1..=5 {
        batcher.submit(event(id)).await.unwrap();
    }
    batcher.close().await.unwrap();

    let batches: Vec<Vec<u64>> = stream.map(|batch| batch.ids()).collect().await;
    assert_eq!(batches, vec![vec![1, 2], vec![3, 4], vec![5]]);
}

#[tokio::test]
async fn test_dropping_batcher_still_drains() {
    let (uploader, uploads) = recording_uploader();
    let batcher = EventBatcher::with_limits(10, Duration::from_secs(60), uploader).unwrap();
    let mut reports = batcher.subscribe();

    batcher.submit(event(1)).await.unwrap();
    batcher.submit(event(2)).await.unwrap();
    drop(batcher);

    let batch = reports.recv().await.expect("drained batch");
    assert_eq!(batch.ids(), vec![1, 2]);
    assert!(reports.recv().await.is_none());
    assert_eq!(recorded(&uploads), vec![vec![1, 2]]);
}
