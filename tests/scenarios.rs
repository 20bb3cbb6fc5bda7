//! End-to-end scenarios exercising the full client/storage stack together,
//! as opposed to the per-module unit tests living next to the code they
//! cover.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use zk_emulator::client::Client;
use zk_emulator::error::Error;
use zk_emulator::event::EventKind;
use zk_emulator::ids::{Version, ANY_VERSION};
use zk_emulator::storage::Storage;
use zk_emulator::transaction::TxnResult;

fn init_tracing() {
    static ONCE: std::sync::Once = std::sync::Once::new();
    ONCE.call_once(|| {
        let _ = tracing_subscriber::fmt::try_init();
    });
}

#[test]
fn s1_ephemeral_lifecycle() {
    init_tracing();
    let storage = Storage::new();
    let a = Client::new(storage.clone());
    let b = Client::new(storage.clone());
    a.start().unwrap();
    b.start().unwrap();

    a.create("/apps/lock", Vec::new(), true, false, true).unwrap();
    assert!(b.exists("/apps/lock", None).unwrap());

    let data_deleted = Arc::new(AtomicUsize::new(0));
    let child_deleted = Arc::new(AtomicUsize::new(0));
    {
        let counter = data_deleted.clone();
        b.get(
            "/apps/lock",
            Some(Box::new(move |event| {
                assert_eq!(event.kind, EventKind::Deleted);
                counter.fetch_add(1, Ordering::SeqCst);
            })),
        )
        .unwrap();
    }
    {
        let counter = child_deleted.clone();
        b.get_children(
            "/apps",
            Some(Box::new(move |event| {
                assert_eq!(event.kind, EventKind::Deleted);
                counter.fetch_add(1, Ordering::SeqCst);
            })),
        )
        .unwrap();
    }

    a.close();
    b.flush();

    assert!(!b.exists("/apps/lock", None).unwrap());
    assert_eq!(data_deleted.load(Ordering::SeqCst), 1);
    assert_eq!(child_deleted.load(Ordering::SeqCst), 1);

    a.stop();
    b.stop();
}

#[test]
fn s2_sequential_creation() {
    let storage = Storage::new();
    let client = Client::new(storage);
    client.start().unwrap();
    client.ensure_path("/q").unwrap();

    let p0 = client.create("/q/item-", Vec::new(), false, true, false).unwrap();
    let p1 = client.create("/q/item-", Vec::new(), false, true, false).unwrap();
    let p2 = client.create("/q/item-", Vec::new(), false, true, false).unwrap();

    assert_eq!(p0, "/q/item-0000000000");
    assert_eq!(p1, "/q/item-0000000001");
    assert_eq!(p2, "/q/item-0000000002");
    client.stop();
}

#[test]
fn s3_optimistic_update() {
    let storage = Storage::new();
    let client = Client::new(storage);
    client.start().unwrap();

    client.create("/k", b"v1".to_vec(), false, false, false).unwrap();
    let stat = client.set_data("/k", b"v2".to_vec(), Version(0)).unwrap();
    assert_eq!(stat.version, Version(1));

    let err = client.set_data("/k", b"v3".to_vec(), Version(0)).unwrap_err();
    assert!(matches!(err, Error::BadVersion { .. }));

    let (data, _stat) = client.get("/k", None).unwrap();
    assert_eq!(data, b"v2");
    client.stop();
}

#[test]
fn s4_recursive_delete_orders_events() {
    let storage = Storage::new();
    let client = Client::new(storage.clone());
    client.start().unwrap();

    client.create("/a", Vec::new(), false, false, false).unwrap();
    client.create("/a/b", Vec::new(), false, false, false).unwrap();
    client.create("/a/b/c", Vec::new(), false, false, false).unwrap();

    client.delete("/a", ANY_VERSION, true).unwrap();

    assert!(!storage.exists("/a"));
    assert!(!storage.exists("/a/b"));
    assert!(!storage.exists("/a/b/c"));
    client.stop();
}

#[test]
fn s5_transaction_rollback() {
    let storage = Storage::new();
    let client = Client::new(storage.clone());
    client.start().unwrap();

    let results = client
        .run_transaction(|txn| {
            txn.create("/x", b"v".to_vec(), false, false)?;
            txn.check("/missing", Version(0))?;
            txn.set_data("/x", b"w".to_vec(), Version(0))?;
            Ok(())
        })
        .unwrap();

    assert_eq!(
        results,
        vec![TxnResult::RolledBack, TxnResult::NoNode, TxnResult::RuntimeInconsistency]
    );
    assert!(!storage.exists("/x"));
    client.stop();
}

#[test]
fn s6_watch_single_fire() {
    let storage = Storage::new();
    let client = Client::new(storage);
    client.start().unwrap();

    client.create("/k", b"v".to_vec(), false, false, false).unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let calls2 = calls.clone();
    client
        .get(
            "/k",
            Some(Box::new(move |event| {
                assert_eq!(event.kind, EventKind::Changed);
                calls2.fetch_add(1, Ordering::SeqCst);
            })),
        )
        .unwrap();

    client.set_data("/k", b"x".to_vec(), ANY_VERSION).unwrap();
    client.flush();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // A second mutation must not re-invoke the now-consumed watcher.
    client.set_data("/k", b"y".to_vec(), ANY_VERSION).unwrap();
    client.flush();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    client.stop();
}

#[test]
fn s7_fan_out_across_independent_handlers() {
    let storage = Storage::new();
    let a = Client::new(storage.clone());
    let b = Client::new(storage.clone());
    a.start().unwrap();
    b.start().unwrap();

    a.create("/shared", b"0".to_vec(), false, false, false).unwrap();

    let seen = Arc::new(Mutex::new(None));
    let seen2 = seen.clone();
    b.get(
        "/shared",
        Some(Box::new(move |event| {
            *seen2.lock().unwrap() = Some(event.kind);
        })),
    )
    .unwrap();

    // Mutation happens on A's dispatch thread/session; delivery must reach
    // B's own dispatch thread, not just run inline on A's.
    a.set_data("/shared", b"1".to_vec(), ANY_VERSION).unwrap();
    b.flush();

    assert_eq!(*seen.lock().unwrap(), Some(EventKind::Changed));
    a.stop();
    b.stop();
}
