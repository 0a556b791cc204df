//! Bounded multi-producer/multi-consumer work queue (spec.md §4.1).
//!
//! Backs the hand-off between the control thread and the media-forwarder
//! worker pool: the control thread enqueues session-lifecycle notices,
//! workers drain them in FIFO order per-consumer. Built on
//! [`crossbeam_channel`]'s bounded MPMC channel rather than `std::sync::mpsc`
//! (which is single-consumer only) — every queue allocates its own channel
//! pair rather than sharing a global runtime.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};
use std::time::Duration;

/// A typed sentinel used to signal worker shutdown without tearing down the
/// channel itself (spec.md §3 `WorkItem`, §5 "typed `Signal` sentinel").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Told to stop draining and exit.
    Shutdown,
}

/// Unit of inter-thread hand-off (spec.md §3).
///
/// `Data` carries an opaque payload; `Signal` is a typed sentinel that a
/// consumer recognizes and reacts to without inspecting the payload type.
#[derive(Debug, Clone)]
pub enum WorkItem<T> {
    Data(T),
    Signal(Signal),
}

impl<T> WorkItem<T> {
    /// True if this item is the shutdown sentinel.
    pub fn is_shutdown(&self) -> bool {
        matches!(self, WorkItem::Signal(Signal::Shutdown))
    }
}

/// Bounded FIFO work queue (spec.md §4.1).
///
/// `put` blocks the producer when the queue is full rather than dropping
/// the item — "never drops" is an explicit invariant. `get`/`get_batch`
/// support both blocking and non-blocking polling, matching the
/// `rtpp_queue_get_item(s)`/`block` parameter pattern in the source this
/// was distilled from.
pub struct WorkQueue<T> {
    tx: Sender<WorkItem<T>>,
    rx: Receiver<WorkItem<T>>,
    name: String,
}

impl<T> WorkQueue<T> {
    /// Create a new queue with the given bound and a name used in logging.
    pub fn new(capacity: usize, name: impl Into<String>) -> Self {
        let (tx, rx) = bounded(capacity.max(1));
        Self {
            tx,
            rx,
            name: name.into(),
        }
    }

    /// Enqueue an item, blocking the calling thread if the queue is full.
    pub fn put(&self, item: WorkItem<T>) {
        // crossbeam's bounded `send` already blocks on a full channel; this
        // only fails if every receiver has been dropped, which this crate
        // never does while producers are still live.
        if self.tx.send(item).is_err() {
            tracing::warn!(queue = %self.name, "put on a queue with no live consumers");
        }
    }

    /// Enqueue without blocking; returns the item back if the queue is full.
    pub fn try_put(&self, item: WorkItem<T>) -> Result<(), WorkItem<T>> {
        match self.tx.try_send(item) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(item)) => Err(item),
            Err(TrySendError::Disconnected(item)) => {
                tracing::warn!(queue = %self.name, "try_put on a queue with no live consumers");
                Err(item)
            }
        }
    }

    /// Remove and return the oldest item. When `block` is true, waits
    /// indefinitely for an item to arrive; when false, returns `None`
    /// immediately if the queue is empty.
    pub fn get(&self, block: bool) -> Option<WorkItem<T>> {
        if block {
            self.rx.recv().ok()
        } else {
            self.rx.try_recv().ok()
        }
    }

    /// Remove and return the oldest item, waiting up to `timeout`.
    pub fn get_timeout(&self, timeout: Duration) -> Option<WorkItem<T>> {
        match self.rx.recv_timeout(timeout) {
            Ok(item) => Some(item),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Drain up to `max` items in a single pass. When `block` is true and
    /// the queue is currently empty, waits for at least one item before
    /// returning; subsequent items up to `max` are taken without waiting.
    pub fn get_batch(&self, max: usize, block: bool) -> Vec<WorkItem<T>> {
        let mut out = Vec::with_capacity(max.min(64));
        if max == 0 {
            return out;
        }
        let first = if block {
            self.rx.recv().ok()
        } else {
            self.rx.try_recv().ok()
        };
        let Some(first) = first else {
            return out;
        };
        out.push(first);
        while out.len() < max {
            match self.rx.try_recv() {
                Ok(item) => out.push(item),
                Err(_) => break,
            }
        }
        out
    }

    /// Advisory snapshot of the number of items currently queued.
    pub fn length(&self) -> usize {
        self.rx.len()
    }

    /// Release all remaining items. Each dropped `WorkItem<T>` runs `T`'s
    /// destructor as part of the normal drop glue — there is no separate
    /// destructor callback to invoke, unlike the C original's
    /// per-item-type free function.
    pub fn destroy(self) {
        let remaining = self.rx.len();
        if remaining > 0 {
            tracing::debug!(queue = %self.name, remaining, "destroying queue with items pending");
        }
        drop(self.rx);
        drop(self.tx);
    }

    /// A cloneable producer handle sharing this queue's channel.
    pub fn sender(&self) -> WorkQueueSender<T> {
        WorkQueueSender {
            tx: self.tx.clone(),
            name: self.name.clone(),
        }
    }
}

/// A cloneable producer-only handle to a [`WorkQueue`], for handing out to
/// multiple threads that only need to enqueue (e.g. the control thread
/// handing session events to several media workers).
#[derive(Clone)]
pub struct WorkQueueSender<T> {
    tx: Sender<WorkItem<T>>,
    name: String,
}

impl<T> WorkQueueSender<T> {
    pub fn put(&self, item: WorkItem<T>) {
        if self.tx.send(item).is_err() {
            tracing::warn!(queue = %self.name, "put on a queue with no live consumers");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn fifo_single_consumer() {
        let q = WorkQueue::new(16, "test");
        for i in 0..10 {
            q.put(WorkItem::Data(i));
        }
        let mut seen = Vec::new();
        while let Some(WorkItem::Data(v)) = q.get(false) {
            seen.push(v);
        }
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn get_batch_respects_max() {
        let q = WorkQueue::new(16, "test");
        for i in 0..5 {
            q.put(WorkItem::Data(i));
        }
        let batch = q.get_batch(3, false);
        assert_eq!(batch.len(), 3);
        let rest = q.get_batch(10, false);
        assert_eq!(rest.len(), 2);
    }

    #[test]
    fn get_batch_empty_nonblocking() {
        let q: WorkQueue<u32> = WorkQueue::new(4, "test");
        assert!(q.get_batch(10, false).is_empty());
    }

    #[test]
    fn signal_recognized_by_consumer() {
        let q: WorkQueue<u32> = WorkQueue::new(4, "test");
        q.put(WorkItem::Data(1));
        q.put(WorkItem::Signal(Signal::Shutdown));
        let a = q.get(false).unwrap();
        assert!(!a.is_shutdown());
        let b = q.get(false).unwrap();
        assert!(b.is_shutdown());
    }

    #[test]
    fn blocking_get_wakes_on_put() {
        let q: Arc<WorkQueue<u32>> = Arc::new(WorkQueue::new(1, "test"));
        let got = Arc::new(AtomicUsize::new(0));
        let q2 = q.clone();
        let got2 = got.clone();
        let handle = thread::spawn(move || {
            if let Some(WorkItem::Data(v)) = q2.get(true) {
                got2.store(v as usize, Ordering::SeqCst);
            }
        });
        thread::sleep(std::time::Duration::from_millis(20));
        q.put(WorkItem::Data(42));
        handle.join().unwrap();
        assert_eq!(got.load(Ordering::SeqCst), 42);
    }

    #[test]
    fn length_is_advisory_snapshot() {
        let q = WorkQueue::new(16, "test");
        assert_eq!(q.length(), 0);
        q.put(WorkItem::Data(1));
        q.put(WorkItem::Data(2));
        assert_eq!(q.length(), 2);
    }

    #[test]
    fn producer_handle_shares_queue() {
        let q: WorkQueue<u32> = WorkQueue::new(4, "test");
        let producer = q.sender();
        producer.put(WorkItem::Data(7));
        assert_eq!(q.length(), 1);
    }
}
