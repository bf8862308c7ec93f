//! Bounded in-memory FIFO with rendezvous hand-off
//!
//! The sending queue needs a combination no ecosystem channel offers in one
//! place: non-blocking produce with a hard capacity bound, a zero-capacity
//! rendezvous mode where produce succeeds only while a worker is parked,
//! live size accounting that excludes hand-offs, and workers that drain the
//! backlog before exiting on close. So the buffer is built by hand: a
//! `VecDeque` behind a `parking_lot` mutex, a `tokio` `Notify` for parked
//! workers, and an atomic size counter updated under the lock.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;

struct State<T> {
    items: VecDeque<T>,
    /// Items admitted via rendezvous; they sit in `items` but do not occupy
    /// a buffer slot and are excluded from `len()`.
    handoff: usize,
    /// Workers currently parked in `pop`.
    idle: usize,
    closed: bool,
}

/// Bounded multi-producer multi-consumer FIFO
///
/// `produce` never blocks: it rejects when the buffer is full and no worker
/// is parked, or once the queue is closed. `pop` waits; after `close` it
/// keeps returning buffered items until the queue is empty, then `None`.
pub(crate) struct BoundedQueue<T> {
    state: Mutex<State<T>>,
    notify: Notify,
    size: AtomicUsize,
    capacity: usize,
}

impl<T: Send> BoundedQueue<T> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(State {
                items: VecDeque::new(),
                handoff: 0,
                idle: 0,
                closed: false,
            }),
            notify: Notify::new(),
            size: AtomicUsize::new(0),
            capacity,
        }
    }

    /// Try to enqueue an item
    ///
    /// Returns `true` iff the item was admitted: either a buffer slot was
    /// free, or the buffer is full (possibly zero-sized) and a parked worker
    /// can take it directly. Size is updated atomically with insertion.
    pub(crate) fn produce(&self, item: T) -> bool {
        let mut state = self.state.lock();
        if state.closed {
            return false;
        }

        let buffered = state.items.len() - state.handoff;
        if buffered < self.capacity {
            state.items.push_back(item);
            self.size.fetch_add(1, Ordering::Relaxed);
        } else if state.idle > state.handoff {
            // Rendezvous: one parked worker can hold one hand-off.
            state.items.push_back(item);
            state.handoff += 1;
        } else {
            return false;
        }

        drop(state);
        self.notify.notify_one();
        true
    }

    /// Enqueue an item ignoring the capacity bound
    ///
    /// Recovery only: records already accepted before a restart must be
    /// re-admitted even if there are more of them than `capacity`.
    pub(crate) fn restore(&self, item: T) {
        let mut state = self.state.lock();
        state.items.push_back(item);
        self.size.fetch_add(1, Ordering::Relaxed);
        drop(state);
        self.notify.notify_one();
    }

    /// Dequeue the next item, waiting if the queue is empty
    ///
    /// Returns `None` once the queue is closed **and** empty, so workers
    /// drain the backlog before exiting.
    pub(crate) async fn pop(&self) -> Option<T> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);

            {
                let mut state = self.state.lock();
                if let Some(item) = state.items.pop_front() {
                    if state.handoff > 0 {
                        state.handoff -= 1;
                    } else {
                        self.size.fetch_sub(1, Ordering::Relaxed);
                    }
                    let more = !state.items.is_empty();
                    drop(state);
                    if more {
                        // Chain the wakeup so a single stored permit cannot
                        // strand a second parked worker.
                        self.notify.notify_one();
                    }
                    return Some(item);
                }
                if state.closed {
                    return None;
                }
                state.idle += 1;
                // Register as a waiter while still holding the lock, so a
                // close() that follows is guaranteed to wake us.
                notified.as_mut().enable();
            }

            notified.await;

            let mut state = self.state.lock();
            state.idle = state.idle.saturating_sub(1);
        }
    }

    /// Close the queue to producers and wake every parked worker
    pub(crate) fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        drop(state);
        self.notify.notify_waiters();
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Items currently buffered (hand-offs and in-flight work excluded)
    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T> std::fmt::Debug for BoundedQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedQueue")
            .field("len", &self.size.load(Ordering::Relaxed))
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
#[path = "memory_test.rs"]
mod memory_test;
