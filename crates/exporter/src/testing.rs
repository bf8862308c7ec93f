//! Test support: scripted transports and payloads
//!
//! Shared by the sender-chain tests. The fake transport plays back a script
//! of outcomes, records every consume call, and can be gated so tests can
//! hold a worker mid-flight.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::time::Instant;

use crate::error::{ExportError, ExportResult};
use crate::request::{DecodeError, Payload, Persistable};
use crate::scope::Scope;
use crate::sender::Transport;

/// String payload with a configurable item count
pub(crate) struct TestPayload {
    pub(crate) data: String,
    pub(crate) items: usize,
}

impl TestPayload {
    pub(crate) fn new(data: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            items: 1,
        }
    }

    pub(crate) fn with_items(data: impl Into<String>, items: usize) -> Self {
        Self {
            data: data.into(),
            items,
        }
    }
}

impl Payload for TestPayload {
    fn item_count(&self) -> usize {
        self.items
    }
}

impl Persistable for TestPayload {
    fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(4 + self.data.len());
        buf.put_u32(self.items as u32);
        buf.put_slice(self.data.as_bytes());
        buf.freeze()
    }

    fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() < 4 {
            return Err(DecodeError("record too short".into()));
        }
        let items = u32::from_be_bytes(bytes[0..4].try_into().unwrap()) as usize;
        let data = std::str::from_utf8(&bytes[4..])
            .map_err(|e| DecodeError(e.to_string()))?
            .to_string();
        Ok(Self { data, items })
    }
}

/// Scripted result for one consume call
pub(crate) enum FakeOutcome {
    /// Accept the batch
    Ok,
    /// Fail with a transient error
    Transient,
    /// Fail with a permanent error
    Permanent,
    /// Fail asking for back-off
    Throttle(Duration),
    /// Sleep, then accept
    Block(Duration),
}

/// Transport double that plays back a script of outcomes
///
/// Calls beyond the script succeed. Only successful calls record the
/// payload into `consumed`.
#[derive(Default)]
pub(crate) struct FakeTransport {
    script: Mutex<VecDeque<FakeOutcome>>,
    consumed: Mutex<Vec<String>>,
    call_times: Mutex<Vec<Instant>>,
    saw_deadline: Mutex<Vec<bool>>,
    calls: AtomicUsize,
    start_calls: AtomicUsize,
    shutdown_calls: AtomicUsize,
    fail_shutdown: AtomicBool,
    delay: Mutex<Option<Duration>>,
    gate: Mutex<Option<Arc<Semaphore>>>,
}

impl FakeTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Queue outcomes for the next consume calls
    pub(crate) fn script(&self, outcomes: impl IntoIterator<Item = FakeOutcome>) {
        self.script.lock().extend(outcomes);
    }

    /// Sleep this long at the start of every consume call
    pub(crate) fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    /// Block every consume call on a permit from `gate`
    pub(crate) fn set_gate(&self, gate: Arc<Semaphore>) {
        *self.gate.lock() = Some(gate);
    }

    /// Make `shutdown` fail
    pub(crate) fn fail_shutdown(&self) {
        self.fail_shutdown.store(true, Ordering::SeqCst);
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn consumed(&self) -> Vec<String> {
        self.consumed.lock().clone()
    }

    pub(crate) fn call_times(&self) -> Vec<Instant> {
        self.call_times.lock().clone()
    }

    pub(crate) fn saw_deadline(&self) -> Vec<bool> {
        self.saw_deadline.lock().clone()
    }

    pub(crate) fn start_calls(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn shutdown_calls(&self) -> usize {
        self.shutdown_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport<TestPayload> for FakeTransport {
    async fn consume(&self, scope: &Scope, payload: &TestPayload) -> ExportResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.call_times.lock().push(Instant::now());
        self.saw_deadline.lock().push(scope.deadline().is_some());

        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            gate.acquire().await.unwrap().forget();
        }
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let outcome = self.script.lock().pop_front().unwrap_or(FakeOutcome::Ok);
        match outcome {
            FakeOutcome::Ok => {
                self.consumed.lock().push(payload.data.clone());
                Ok(())
            }
            FakeOutcome::Transient => Err(ExportError::transient("scripted transient failure")),
            FakeOutcome::Permanent => Err(ExportError::permanent("scripted permanent failure")),
            FakeOutcome::Throttle(wait) => Err(ExportError::throttled(wait, "scripted throttle")),
            FakeOutcome::Block(wait) => {
                tokio::time::sleep(wait).await;
                self.consumed.lock().push(payload.data.clone());
                Ok(())
            }
        }
    }

    async fn start(&self) -> ExportResult {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn shutdown(&self) -> ExportResult {
        self.shutdown_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_shutdown.load(Ordering::SeqCst) {
            Err(ExportError::transient("scripted shutdown failure"))
        } else {
            Ok(())
        }
    }
}

/// Poll until `cond` holds or ~2 seconds pass
///
/// Queue state is eventually consistent with respect to in-flight workers,
/// so assertions wait instead of racing.
pub(crate) async fn eventually(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..400 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}
