//! Tests for the persistent queue backing
//!
//! Crash behavior is simulated by dropping a queue without shutdown and
//! rebuilding a fresh one over the same store.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use ferry_storage::{MemoryStorage, Storage};

use super::{PersistentBacking, QueueCore, QueueSender};
use crate::metrics::ExporterMetrics;
use crate::request::{Outcome, Persistable, Request};
use crate::scope::Scope;
use crate::sender::{Sender, Transport, TransportSender};
use crate::testing::{FakeOutcome, FakeTransport, TestPayload, eventually};

fn backing(storage: &Arc<MemoryStorage>) -> PersistentBacking<TestPayload> {
    PersistentBacking::new(
        Arc::clone(storage) as Arc<dyn Storage>,
        Arc::new(|payload: &TestPayload| payload.encode()),
        Arc::new(|bytes: &[u8]| TestPayload::decode(bytes)),
    )
}

fn persistent_queue(
    storage: &Arc<MemoryStorage>,
    transport: &Arc<FakeTransport>,
    capacity: usize,
    num_workers: usize,
) -> QueueSender<TestPayload> {
    let next = Arc::new(TransportSender::new(
        Arc::clone(transport) as Arc<dyn Transport<TestPayload>>,
    ));
    let core = Arc::new(QueueCore::new(
        "persist-test",
        capacity,
        next,
        Arc::new(ExporterMetrics::new()),
        Some(backing(storage)),
        false,
    ));
    QueueSender::new(core, num_workers)
}

fn request(data: &str) -> Request<TestPayload> {
    Request::new(TestPayload::new(data), Scope::root())
}

/// Capture the settle outcome of one request
fn tracked(data: &str) -> (Request<TestPayload>, Arc<Mutex<Option<Outcome>>>) {
    let outcome = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&outcome);
    let req = request(data).on_finish(move |o| *slot.lock() = Some(o));
    (req, outcome)
}

#[tokio::test]
async fn test_produce_persists_before_accept() {
    let storage = Arc::new(MemoryStorage::new());
    let transport = Arc::new(FakeTransport::new());
    // No workers started: the record must be durable on accept alone.
    let queue = persistent_queue(&storage, &transport, 5, 0);

    queue.send(request("a")).await.unwrap();

    assert_eq!(storage.len(), 1);
    let record = storage.get(0).unwrap().unwrap();
    assert_eq!(TestPayload::decode(&record).unwrap().data, "a");
}

#[tokio::test]
async fn test_successful_send_removes_record() {
    let storage = Arc::new(MemoryStorage::new());
    let transport = Arc::new(FakeTransport::new());
    let queue = persistent_queue(&storage, &transport, 10, 1);
    queue.start().await.unwrap();

    let (req, outcome) = tracked("a");
    queue.send(req).await.unwrap();

    assert!(eventually(|| transport.consumed() == vec!["a"]).await);
    assert!(eventually(|| storage.is_empty()).await);
    assert_eq!(*outcome.lock(), Some(Outcome::Delivered));

    queue.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_reject_rolls_back_record() {
    let storage = Arc::new(MemoryStorage::new());
    let transport = Arc::new(FakeTransport::new());
    // Zero capacity and no workers: every produce rejects.
    let queue = persistent_queue(&storage, &transport, 0, 0);

    let (req, outcome) = tracked("a");
    let err = queue.send(req).await.unwrap_err();

    assert!(err.to_string().contains("full"));
    assert!(storage.is_empty(), "rejected produce must not leave a record");
    assert_eq!(*outcome.lock(), Some(Outcome::Dropped));
    assert_eq!(queue.core().metrics.enqueue_failed_items(), 1);
}

#[tokio::test]
async fn test_permanent_failure_drops_and_removes_record() {
    let storage = Arc::new(MemoryStorage::new());
    let transport = Arc::new(FakeTransport::new());
    transport.script([FakeOutcome::Permanent]);
    let queue = persistent_queue(&storage, &transport, 10, 1);
    queue.start().await.unwrap();

    let (req, outcome) = tracked("a");
    queue.send(req).await.unwrap();

    assert!(eventually(|| *outcome.lock() == Some(Outcome::Dropped)).await);
    assert!(eventually(|| storage.is_empty()).await);
    assert!(transport.consumed().is_empty());

    queue.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_recovery_replays_in_original_order() {
    let storage = Arc::new(MemoryStorage::new());
    for (seq, data) in [(0u64, "a"), (1, "b"), (2, "c")] {
        storage.set(seq, &TestPayload::new(data).encode()).unwrap();
    }

    let transport = Arc::new(FakeTransport::new());
    let queue = persistent_queue(&storage, &transport, 10, 1);
    queue.start().await.unwrap();

    assert!(eventually(|| transport.consumed() == vec!["a", "b", "c"]).await);
    assert!(eventually(|| storage.is_empty()).await);

    // Fresh work continues with sequence numbers past the recovered ones.
    queue.send(request("d")).await.unwrap();
    assert!(eventually(|| transport.consumed() == vec!["a", "b", "c", "d"]).await);

    queue.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_crash_then_recover_delivers_at_least_once() {
    let storage = Arc::new(MemoryStorage::new());

    {
        let transport = Arc::new(FakeTransport::new());
        // Workers never started, so nothing is delivered before the "crash".
        let queue = persistent_queue(&storage, &transport, 10, 0);
        queue.send(request("a")).await.unwrap();
        queue.send(request("b")).await.unwrap();
        assert_eq!(storage.len(), 2);
        // Dropped without shutdown - crash.
    }

    let transport = Arc::new(FakeTransport::new());
    let queue = persistent_queue(&storage, &transport, 10, 1);
    queue.start().await.unwrap();

    assert!(eventually(|| transport.consumed() == vec!["a", "b"]).await);
    assert!(eventually(|| storage.is_empty()).await);

    queue.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_undecodable_record_skipped() {
    let storage = Arc::new(MemoryStorage::new());
    storage.set(0, b"xx").unwrap(); // shorter than any valid record
    storage.set(1, &TestPayload::new("ok").encode()).unwrap();

    let transport = Arc::new(FakeTransport::new());
    let queue = persistent_queue(&storage, &transport, 10, 1);
    queue.start().await.unwrap();

    assert!(eventually(|| transport.consumed() == vec!["ok"]).await);
    assert!(eventually(|| storage.is_empty()).await);

    queue.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_put_back_re_enqueues_while_open() {
    let storage = Arc::new(MemoryStorage::new());
    let transport = Arc::new(FakeTransport::new());
    // No workers: the re-enqueued entry stays buffered and observable.
    let queue = persistent_queue(&storage, &transport, 2, 0);

    let (req, outcome) = tracked("again");
    queue.core().put_back(req);

    assert_eq!(storage.len(), 1);
    assert_eq!(queue.core().queue.len(), 1);
    assert_eq!(*outcome.lock(), None, "re-enqueued work has not left the pipeline");
}

#[tokio::test]
async fn test_put_back_after_close_parks_record() {
    let storage = Arc::new(MemoryStorage::new());
    let transport = Arc::new(FakeTransport::new());
    let queue = persistent_queue(&storage, &transport, 2, 0);
    queue.shutdown().await.unwrap();

    let (req, outcome) = tracked("parked");
    queue.core().put_back(req);

    // The buffer refused it, but the record is durable for the next start.
    assert_eq!(storage.len(), 1);
    assert_eq!(*outcome.lock(), Some(Outcome::Requeued));
}

#[tokio::test]
async fn test_finish_fires_exactly_once_through_queue() {
    let storage = Arc::new(MemoryStorage::new());
    let transport = Arc::new(FakeTransport::new());
    let queue = persistent_queue(&storage, &transport, 10, 2);
    queue.start().await.unwrap();

    let fired = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&fired);
    let req = request("once").on_finish(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    queue.send(req).await.unwrap();
    assert!(eventually(|| fired.load(Ordering::SeqCst) == 1).await);

    queue.shutdown().await.unwrap();
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}
