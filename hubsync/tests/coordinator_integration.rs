//! End-to-end coordinator behaviour over the in-memory transport.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use proptest::prelude::*;

use hubsync::channel::{cancel_request, start_request, MemoryConnector, MemoryServer};
use hubsync::download::{
    DownloadCoordinator, DownloadKey, DownloadRecord, DownloadStatus, FrameStatus, ProgressFrame,
    RegistryEvent, SourceParams, Subscription,
};

const WAIT: Duration = Duration::from_secs(2);

fn key(name: &str) -> DownloadKey {
    DownloadKey::new(name).unwrap()
}

fn source(repo: &str) -> SourceParams {
    SourceParams::new(repo, "checkpoints")
}

fn spawn(connector: &MemoryConnector) -> DownloadCoordinator {
    DownloadCoordinator::builder(Arc::new(connector.clone())).spawn()
}

async fn wait_until<P>(coordinator: &DownloadCoordinator, key: &DownloadKey, predicate: P) -> DownloadRecord
where
    P: Fn(&DownloadRecord) -> bool,
{
    tokio::time::timeout(WAIT, coordinator.store().wait_for(key, predicate))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {}", key))
}

async fn open(coordinator: &DownloadCoordinator, connector: &MemoryConnector, k: &DownloadKey) -> MemoryServer {
    coordinator.start_download(k.clone(), source(k.as_str())).unwrap();
    let server = tokio::time::timeout(WAIT, connector.wait_for_connection(k))
        .await
        .expect("no connection");
    wait_until(coordinator, k, |r| r.status == DownloadStatus::Starting).await;
    server
}

/// Records every state the store passes through for one key.
fn record_history(
    coordinator: &DownloadCoordinator,
    k: &DownloadKey,
) -> (Subscription, Arc<Mutex<Vec<DownloadRecord>>>) {
    let history = Arc::new(Mutex::new(Vec::new()));
    let store = coordinator.store().clone();
    let sink = Arc::clone(&history);
    let watched = k.clone();
    let subscription = coordinator.subscribe(move |event| {
        if event.key() == &watched {
            if let Some(record) = store.get_snapshot(&watched) {
                sink.lock().push(record);
            }
        }
    });
    (subscription, history)
}

#[tokio::test]
async fn test_start_progress_complete_then_late_frame_discarded() {
    let connector = MemoryConnector::new();
    let coordinator = spawn(&connector);
    let k = key("org/model");

    let server = open(&coordinator, &connector, &k).await;
    assert_eq!(server.received(), vec![start_request(&k, &source("org/model"))]);

    server.send_frame(&ProgressFrame::new(FrameStatus::Start));
    server.send_frame(
        &ProgressFrame::new(FrameStatus::Progress)
            .with_bytes(50, Some(100))
            .with_files(1, Some(2)),
    );
    let record = wait_until(&coordinator, &k, |r| r.status == DownloadStatus::InProgress).await;
    assert_eq!(record.downloaded_bytes, 50);
    assert_eq!(record.total_bytes, Some(100));
    assert_eq!(record.downloaded_files, 1);
    assert_eq!(record.total_files, Some(2));

    server.send_frame(&ProgressFrame::new(FrameStatus::Completed));
    let completed = wait_until(&coordinator, &k, |r| r.status == DownloadStatus::Completed).await;

    server.send_frame(&ProgressFrame::new(FrameStatus::Progress).with_bytes(10, None));
    tokio::time::sleep(Duration::from_millis(20)).await;
    coordinator.sync().await.unwrap();

    assert_eq!(coordinator.get_snapshot(&k), Some(completed));
    tokio::time::timeout(WAIT, server.closed()).await.expect("channel left open");
}

#[tokio::test]
async fn test_duplicate_start_opens_one_channel() {
    let connector = MemoryConnector::new();
    let coordinator = spawn(&connector);
    let k = key("a");

    coordinator.start_download(k.clone(), source("a")).unwrap();
    wait_until(&coordinator, &k, |r| r.status == DownloadStatus::Starting).await;
    coordinator.start_download(k.clone(), source("a")).unwrap();
    coordinator.sync().await.unwrap();

    assert_eq!(connector.connect_count(), 1);
    assert_eq!(connector.servers(&k).len(), 1);
    assert_eq!(coordinator.store().len(), 1);
    assert_eq!(coordinator.get_snapshot(&k).unwrap().generation, 1);
}

#[tokio::test]
async fn test_duplicate_start_while_queued_opens_one_channel() {
    let connector = MemoryConnector::new();
    connector.set_connect_delay(Some(Duration::from_millis(30)));
    let coordinator = spawn(&connector);
    let k = key("a");

    coordinator.start_download(k.clone(), source("a")).unwrap();
    coordinator.start_download(k.clone(), source("a")).unwrap();
    wait_until(&coordinator, &k, |r| r.status == DownloadStatus::Starting).await;

    assert_eq!(connector.connect_count(), 1);
}

#[tokio::test]
async fn test_cancel_before_any_frame() {
    let connector = MemoryConnector::new();
    let coordinator = spawn(&connector);
    let k = key("b");

    let server = open(&coordinator, &connector, &k).await;
    coordinator.cancel_download(&k).unwrap();
    coordinator.sync().await.unwrap();

    let cancelled = coordinator.get_snapshot(&k).unwrap();
    assert_eq!(cancelled.status, DownloadStatus::Cancelled);
    tokio::time::timeout(WAIT, server.closed()).await.expect("channel left open");
    assert_eq!(server.received().last(), Some(&cancel_request(&k)));

    server.send_frame(&ProgressFrame::new(FrameStatus::Progress).with_bytes(5, Some(10)));
    server.send_frame(&ProgressFrame::new(FrameStatus::Completed));
    tokio::time::sleep(Duration::from_millis(20)).await;
    coordinator.sync().await.unwrap();

    assert_eq!(coordinator.get_snapshot(&k), Some(cancelled));
}

#[tokio::test]
async fn test_cancel_is_idempotent() {
    let connector = MemoryConnector::new();
    let coordinator = spawn(&connector);
    let k = key("b");

    let server = open(&coordinator, &connector, &k).await;
    let (_subscription, history) = record_history(&coordinator, &k);

    coordinator.cancel_download(&k).unwrap();
    coordinator.sync().await.unwrap();
    let once = coordinator.get_snapshot(&k);

    coordinator.cancel_download(&k).unwrap();
    coordinator.sync().await.unwrap();

    assert_eq!(coordinator.get_snapshot(&k), once);
    assert_eq!(history.lock().len(), 1);

    tokio::time::timeout(WAIT, server.closed()).await.expect("channel left open");
    let cancels = server
        .received()
        .iter()
        .filter(|frame| **frame == cancel_request(&k))
        .count();
    assert_eq!(cancels, 1);
}

#[tokio::test]
async fn test_cancel_unknown_key_is_noop() {
    let coordinator = spawn(&MemoryConnector::new());
    coordinator.cancel_download(&key("nothing")).unwrap();
    coordinator.sync().await.unwrap();
    assert!(coordinator.store().is_empty());
}

#[tokio::test]
async fn test_errored_download_can_restart() {
    let connector = MemoryConnector::new();
    let coordinator = spawn(&connector);
    let k = key("org/model");

    let first = open(&coordinator, &connector, &k).await;
    first.send_frame(&ProgressFrame::new(FrameStatus::Error).with_message("disk full"));
    let errored = wait_until(&coordinator, &k, |r| r.status == DownloadStatus::Errored).await;
    assert_eq!(errored.message.as_deref(), Some("disk full"));

    coordinator.start_download(k.clone(), source("org/model")).unwrap();
    let second = tokio::time::timeout(WAIT, connector.wait_for_connections(&k, 2))
        .await
        .expect("no second connection");
    let restarted = wait_until(&coordinator, &k, |r| r.status == DownloadStatus::Starting).await;
    assert_eq!(restarted.generation, 2);
    assert_eq!(restarted.downloaded_bytes, 0);

    second.send_frame(&ProgressFrame::new(FrameStatus::Completed));
    wait_until(&coordinator, &k, |r| r.status == DownloadStatus::Completed).await;
}

#[tokio::test]
async fn test_independent_keys_progress_separately() {
    let connector = MemoryConnector::new();
    let coordinator = spawn(&connector);

    let a = open(&coordinator, &connector, &key("a")).await;
    let b = open(&coordinator, &connector, &key("b")).await;

    a.send_frame(&ProgressFrame::new(FrameStatus::Progress).with_bytes(1, Some(4)));
    b.send_frame(&ProgressFrame::new(FrameStatus::Error));

    wait_until(&coordinator, &key("a"), |r| r.downloaded_bytes == 1).await;
    wait_until(&coordinator, &key("b"), |r| r.status == DownloadStatus::Errored).await;

    assert_eq!(coordinator.store().active_keys(), vec![key("a")]);
    assert!(!a.is_closed());
}

#[tokio::test]
async fn test_every_listener_notified_once_per_change() {
    let connector = MemoryConnector::new();
    let coordinator = spawn(&connector);
    let k = key("org/model");

    let seen: Vec<Arc<Mutex<Vec<DownloadStatus>>>> = (0..3).map(|_| Arc::new(Mutex::new(Vec::new()))).collect();
    let _subscriptions: Vec<_> = seen
        .iter()
        .map(|sink| {
            let sink = Arc::clone(sink);
            let store = coordinator.store().clone();
            coordinator.subscribe(move |event| {
                let status = store.get_snapshot(event.key()).map(|r| r.status);
                if let Some(status) = status {
                    sink.lock().push(status);
                }
            })
        })
        .collect();

    let server = open(&coordinator, &connector, &k).await;
    server.send_frame(&ProgressFrame::new(FrameStatus::Start));
    server.send_frame(&ProgressFrame::new(FrameStatus::Progress).with_bytes(1, Some(2)));
    server.send_frame(&ProgressFrame::new(FrameStatus::Completed));
    wait_until(&coordinator, &k, |r| r.is_terminal()).await;

    let expected = vec![
        DownloadStatus::Queued,
        DownloadStatus::Starting,
        DownloadStatus::Starting,
        DownloadStatus::InProgress,
        DownloadStatus::Completed,
    ];
    for sink in &seen {
        assert_eq!(*sink.lock(), expected);
    }
}

#[tokio::test]
async fn test_dropped_subscription_stops_notifications() {
    let connector = MemoryConnector::new();
    let coordinator = spawn(&connector);
    let count = Arc::new(Mutex::new(0usize));

    let counter = Arc::clone(&count);
    let subscription = coordinator.subscribe(move |_| *counter.lock() += 1);

    coordinator.start_download(key("a"), source("a")).unwrap();
    coordinator.sync().await.unwrap();
    let before = *count.lock();
    assert!(before >= 1);

    drop(subscription);
    coordinator.start_download(key("b"), source("b")).unwrap();
    coordinator.sync().await.unwrap();

    assert_eq!(*count.lock(), before);
    assert_eq!(coordinator.store().subscriber_count(), 0);
}

#[tokio::test]
async fn test_events_stream_reports_removal() {
    let connector = MemoryConnector::new();
    let coordinator = spawn(&connector);
    let k = key("a");
    let mut events = coordinator.events();

    let server = open(&coordinator, &connector, &k).await;
    server.send_frame(&ProgressFrame::new(FrameStatus::Completed));
    wait_until(&coordinator, &k, |r| r.is_terminal()).await;
    coordinator.dismiss(&k).unwrap();
    coordinator.sync().await.unwrap();

    let mut received = Vec::new();
    while let Some(event) = events.try_recv() {
        received.push(event);
    }
    assert_eq!(received.last(), Some(&RegistryEvent::Removed(k.clone())));
    assert!(received[..received.len() - 1]
        .iter()
        .all(|event| *event == RegistryEvent::Upserted(k.clone())));
}

fn frame_strategy() -> impl Strategy<Value = ProgressFrame> {
    let status = prop_oneof![
        6 => Just(FrameStatus::Progress),
        1 => Just(FrameStatus::Start),
        1 => Just(FrameStatus::Completed),
        1 => Just(FrameStatus::Error),
    ];
    (
        status,
        proptest::option::of(0u64..1_000),
        proptest::option::of(500u64..1_000),
        proptest::option::of(0u64..10),
    )
        .prop_map(|(status, bytes, total, files)| {
            let mut frame = ProgressFrame::new(status);
            frame.downloaded_bytes = bytes;
            frame.total_bytes = total;
            frame.downloaded_files = files;
            frame
        })
}

const END_MARKER: &str = "end of frames";

async fn replay(frames: Vec<ProgressFrame>) -> Vec<DownloadRecord> {
    let connector = MemoryConnector::new();
    let coordinator = spawn(&connector);
    let k = key("org/model");
    let (_subscription, history) = record_history(&coordinator, &k);

    let server = open(&coordinator, &connector, &k).await;
    for frame in &frames {
        server.send_frame(frame);
    }
    server.send_frame(&ProgressFrame::new(FrameStatus::Progress).with_message(END_MARKER));

    wait_until(&coordinator, &k, |r| {
        r.is_terminal() || r.message.as_deref() == Some(END_MARKER)
    })
    .await;
    coordinator.sync().await.unwrap();

    let records = history.lock().clone();
    records
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_registry_counters_never_decrease(frames in proptest::collection::vec(frame_strategy(), 1..32)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let history = runtime.block_on(replay(frames));

        for pair in history.windows(2) {
            prop_assert!(pair[1].downloaded_bytes >= pair[0].downloaded_bytes);
            prop_assert!(pair[1].downloaded_files >= pair[0].downloaded_files);
            prop_assert!(!pair[0].is_terminal());
        }
        if let Some(last) = history.last() {
            if let Some(total) = last.total_bytes {
                prop_assert!(last.downloaded_bytes <= total);
            }
        }
    }
}
