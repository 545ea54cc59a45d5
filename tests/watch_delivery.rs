//! Config watcher delivery tests against the in-memory store.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use gatekeeper::lifecycle::Shutdown;
use gatekeeper::watch::{DirSnapshot, WatchError};

mod common;

const SETTLE: Duration = Duration::from_secs(3);

fn recorder() -> Arc<Mutex<Vec<Vec<u8>>>> {
    Arc::new(Mutex::new(Vec::new()))
}

#[tokio::test]
async fn test_key_updates_delivered_in_order() {
    let (store, watcher) = common::memory_watcher();
    store.put(&common::ns("config.app"), "v1");

    let seen = recorder();
    let sink = seen.clone();
    watcher
        .listen_key("config.app", move |value| {
            sink.lock().unwrap().push(value.to_vec());
            Ok(())
        })
        .await
        .unwrap();
    assert_eq!(*seen.lock().unwrap(), vec![b"v1".to_vec()]);

    let shutdown = Shutdown::new();
    let task = watcher.start(shutdown.subscribe()).unwrap();

    let v2 = store.put(&common::ns("config.app"), "v2");
    let v3 = store.put(&common::ns("config.app"), "v3");
    let delivered = common::eventually(SETTLE, || async {
        watcher.key_version("config.app").await == Some(v3)
    })
    .await;
    assert!(delivered, "v3 was never delivered");

    let values = seen.lock().unwrap().clone();
    assert_eq!(values.first().unwrap(), b"v1");
    assert_eq!(values.last().unwrap(), b"v3");
    // v2 may be coalesced into the v3 round, but never arrives after it
    if values.len() == 3 {
        assert_eq!(values[1], b"v2".to_vec());
    }
    assert!(v2 < v3);

    shutdown.trigger();
    task.await.unwrap();
}

#[tokio::test]
async fn test_unrelated_writes_do_not_redeliver() {
    let (store, watcher) = common::memory_watcher();
    let version = store.put(&common::ns("config.app"), "v1");

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    watcher
        .listen_key("config.app", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await
        .unwrap();

    let shutdown = Shutdown::new();
    let task = watcher.start(shutdown.subscribe()).unwrap();

    store.put(&common::ns("config.other"), "x");
    store.put(&common::ns("config.other"), "y");
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(watcher.key_version("config.app").await, Some(version));

    shutdown.trigger();
    task.await.unwrap();
}

#[tokio::test]
async fn test_directory_snapshot_grows() {
    let (store, watcher) = common::memory_watcher();
    store.put(&common::ns("users/a"), "1");
    store.put(&common::ns("users/b"), "2");

    let snapshots: Arc<Mutex<Vec<DirSnapshot>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = snapshots.clone();
    watcher
        .listen_dir("users", move |snapshot| {
            sink.lock().unwrap().push(snapshot.clone());
            Ok(())
        })
        .await
        .unwrap();

    {
        let first = snapshots.lock().unwrap();
        assert_eq!(first.len(), 1);
        let keys: Vec<&String> = first[0].keys().collect();
        assert_eq!(keys, vec![&common::ns("users/a"), &common::ns("users/b")]);
    }

    let shutdown = Shutdown::new();
    let task = watcher.start(shutdown.subscribe()).unwrap();

    let version = store.put(&common::ns("users/c"), "3");
    let delivered = common::eventually(SETTLE, || async {
        watcher.dir_version("users").await == Some(version)
    })
    .await;
    assert!(delivered, "directory change was never delivered");

    let latest = snapshots.lock().unwrap().last().cloned().unwrap();
    assert_eq!(latest.len(), 3);
    assert_eq!(latest.get(&common::ns("users/c")).unwrap(), b"3");
    assert_eq!(latest.get(&common::ns("users/a")).unwrap(), b"1");

    shutdown.trigger();
    task.await.unwrap();
}

#[tokio::test]
async fn test_failed_callback_is_not_retried() {
    let (store, watcher) = common::memory_watcher();
    let initial = store.put(&common::ns("config.app"), "good-1");

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    watcher
        .listen_key("config.app", move |value| {
            counter.fetch_add(1, Ordering::SeqCst);
            if value.starts_with(b"bad") {
                return Err("rejected value".into());
            }
            Ok(())
        })
        .await
        .unwrap();

    let shutdown = Shutdown::new();
    let task = watcher.start(shutdown.subscribe()).unwrap();

    store.put(&common::ns("config.app"), "bad");
    assert!(
        common::eventually(SETTLE, || async { calls.load(Ordering::SeqCst) == 2 }).await,
        "bad value was never offered"
    );

    // Several idle poll rounds pass without re-offering the failed version.
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(watcher.key_version("config.app").await, Some(initial));

    let fixed = store.put(&common::ns("config.app"), "good-2");
    let delivered = common::eventually(SETTLE, || async {
        watcher.key_version("config.app").await == Some(fixed)
    })
    .await;
    assert!(delivered);
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    shutdown.trigger();
    task.await.unwrap();
}

#[tokio::test]
async fn test_store_outage_recovers() {
    let (store, watcher) = common::memory_watcher();
    store.put(&common::ns("config.app"), "v1");

    let seen = recorder();
    let sink = seen.clone();
    watcher
        .listen_key("config.app", move |value| {
            sink.lock().unwrap().push(value.to_vec());
            Ok(())
        })
        .await
        .unwrap();

    let shutdown = Shutdown::new();
    let task = watcher.start(shutdown.subscribe()).unwrap();

    store.set_unavailable(true);
    let version = store.put(&common::ns("config.app"), "v2");
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(seen.lock().unwrap().len(), 1);

    store.set_unavailable(false);
    let delivered = common::eventually(SETTLE, || async {
        watcher.key_version("config.app").await == Some(version)
    })
    .await;
    assert!(delivered, "update lost across the outage");
    assert_eq!(seen.lock().unwrap().last().unwrap(), b"v2");

    shutdown.trigger();
    task.await.unwrap();
}

#[tokio::test]
async fn test_missing_key_is_not_registered() {
    let (_store, watcher) = common::memory_watcher();

    let err = watcher.listen_key("config.absent", |_| Ok(())).await.unwrap_err();
    assert!(matches!(err, WatchError::KeyNotFound(ref key) if key == "Acm/config.absent"));
    assert_eq!(watcher.key_version("config.absent").await, None);
}

#[tokio::test]
async fn test_failing_initial_load_is_not_registered() {
    let (store, watcher) = common::memory_watcher();
    store.put(&common::ns("config.app"), "bad");

    let err = watcher
        .listen_key("config.app", |_| Err("nope".into()))
        .await
        .unwrap_err();
    assert!(matches!(err, WatchError::CallbackFailed { .. }));
    assert_eq!(watcher.key_version("config.app").await, None);
}

#[tokio::test]
async fn test_start_is_single_shot() {
    let (_store, watcher) = common::memory_watcher();
    let shutdown = Shutdown::new();

    let task = watcher.start(shutdown.subscribe());
    assert!(task.is_some());
    assert!(watcher.start(shutdown.subscribe()).is_none());

    shutdown.trigger();
    task.unwrap().await.unwrap();
}
