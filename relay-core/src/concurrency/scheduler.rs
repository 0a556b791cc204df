//! Timed callback scheduler (spec.md §4.3).
//!
//! Drives two periodic jobs in this crate: the statistics derived-value
//! refresh and the retransmit cache eviction sweep (spec.md §2, §4.4),
//! grounded on `original_source/src/rtpp_objck.c`'s use of
//! `rtpp_timed_ctor`/`schedule_rc` to drive `update_derived_stats` on a
//! fixed period from a dedicated thread.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::concurrency::refcount::RefCounted;

/// Return value of a scheduled callback, deciding whether it runs again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CbResult {
    /// Reschedule for `now + period`.
    More,
    /// Do not reschedule; this was the final invocation.
    Last,
}

type Callback<A> = Box<dyn Fn(Instant, &A) -> CbResult + Send + Sync>;

struct Task<A> {
    id: u64,
    period: Duration,
    due: Instant,
    arg: RefCounted<A>,
    cb: Callback<A>,
    cancelled: Arc<AtomicBool>,
}

struct QueueEntry {
    due: Instant,
    id: u64,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.id == other.id
    }
}
impl Eq for QueueEntry {}
impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.due.cmp(&other.due).then(self.id.cmp(&other.id))
    }
}

/// Handle to a scheduled task. `cancel()` is idempotent and safe to call
/// from any thread (spec.md §4.3, §5 "Cancellation").
#[derive(Clone)]
pub struct TaskHandle {
    cancelled: Arc<AtomicBool>,
}

impl TaskHandle {
    /// Cancel this task. Guarantees no *new* invocation begins after this
    /// call returns, but may race with an invocation already in flight.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

struct SchedulerState<A> {
    tasks: Mutex<(
        std::collections::HashMap<u64, Task<A>>,
        BinaryHeap<Reverse<QueueEntry>>,
    )>,
    wakeup: Condvar,
    shutdown: AtomicBool,
    next_id: AtomicU64,
}

/// Periodic-callback scheduler running on one dedicated thread.
///
/// `A` is the argument type passed to every callback scheduled on this
/// instance; callers needing heterogeneous argument types run one
/// `TimedScheduler` per type (this crate runs one for `Stats`-refresh work
/// and a second, type-erased via a closure capture, for rcache eviction).
pub struct TimedScheduler<A> {
    state: Arc<SchedulerState<A>>,
    thread: Option<JoinHandle<()>>,
}

impl<A: Send + Sync + 'static> TimedScheduler<A> {
    /// Start the scheduler thread.
    pub fn start() -> Self {
        let state = Arc::new(SchedulerState {
            tasks: Mutex::new((std::collections::HashMap::new(), BinaryHeap::new())),
            wakeup: Condvar::new(),
            shutdown: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
        });
        let worker_state = state.clone();
        let thread = thread::Builder::new()
            .name("relay-scheduler".into())
            .spawn(move || Self::run(worker_state))
            .expect("failed to spawn scheduler thread");
        Self {
            state,
            thread: Some(thread),
        }
    }

    /// Schedule `cb` to run at `now + period`, `now + 2*period`, ... until
    /// it returns [`CbResult::Last`] or the returned [`TaskHandle`] is
    /// cancelled. `arg` is held alive for the task's lifetime so the
    /// callback's receiver cannot be freed mid-call (spec.md §4.3).
    pub fn schedule(
        &self,
        period: Duration,
        arg: RefCounted<A>,
        cb: impl Fn(Instant, &A) -> CbResult + Send + Sync + 'static,
    ) -> TaskHandle {
        let id = self.state.next_id.fetch_add(1, Ordering::SeqCst);
        let cancelled = Arc::new(AtomicBool::new(false));
        let due = Instant::now() + period;
        let task = Task {
            id,
            period,
            due,
            arg,
            cb: Box::new(cb),
            cancelled: cancelled.clone(),
        };
        {
            let mut guard = self.state.tasks.lock();
            guard.1.push(Reverse(QueueEntry { due, id }));
            guard.0.insert(id, task);
        }
        self.state.wakeup.notify_all();
        TaskHandle { cancelled }
    }

    fn run(state: Arc<SchedulerState<A>>) {
        loop {
            if state.shutdown.load(Ordering::SeqCst) {
                return;
            }
            let mut guard = state.tasks.lock();
            let next_due = guard.1.peek().map(|Reverse(e)| e.due);
            let now = Instant::now();
            let ready_id = match next_due {
                None => {
                    state.wakeup.wait_for(&mut guard, Duration::from_millis(200));
                    continue;
                }
                Some(due) if due > now => {
                    state.wakeup.wait_for(&mut guard, due - now);
                    continue;
                }
                Some(_) => {
                    let Reverse(entry) = guard.1.pop().unwrap();
                    entry.id
                }
            };

            let Some(task) = guard.0.remove(&ready_id) else {
                continue;
            };
            drop(guard);

            if task.cancelled.load(Ordering::SeqCst) || state.shutdown.load(Ordering::SeqCst) {
                continue;
            }

            let result = (task.cb)(Instant::now(), &task.arg);

            if task.cancelled.load(Ordering::SeqCst) || state.shutdown.load(Ordering::SeqCst) {
                continue;
            }
            if matches!(result, CbResult::More) {
                let mut guard = state.tasks.lock();
                let due = Instant::now() + task.period;
                let id = task.id;
                guard.1.push(Reverse(QueueEntry { due, id }));
                guard.0.insert(
                    id,
                    Task {
                        due,
                        ..task
                    },
                );
            }
        }
    }

    /// Stop the scheduler thread and join it.
    pub fn shutdown(mut self) {
        self.state.shutdown.store(true, Ordering::SeqCst);
        self.state.wakeup.notify_all();
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl<A> Drop for TimedScheduler<A> {
    fn drop(&mut self) {
        self.state.shutdown.store(true, Ordering::SeqCst);
        self.state.wakeup.notify_all();
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn callback_fires_and_reschedules() {
        let scheduler: TimedScheduler<AtomicUsize> = TimedScheduler::start();
        let counter = RefCounted::new(AtomicUsize::new(0));
        let handle = scheduler.schedule(Duration::from_millis(10), counter.clone(), |_now, arg| {
            let n = arg.fetch_add(1, Ordering::SeqCst);
            if n >= 2 { CbResult::Last } else { CbResult::More }
        });
        thread::sleep(Duration::from_millis(200));
        handle.cancel();
        assert!(counter.load(Ordering::SeqCst) >= 3);
    }

    #[test]
    fn cancel_stops_future_invocations() {
        let scheduler: TimedScheduler<AtomicUsize> = TimedScheduler::start();
        let counter = RefCounted::new(AtomicUsize::new(0));
        let handle = scheduler.schedule(Duration::from_millis(10), counter.clone(), |_now, arg| {
            arg.fetch_add(1, Ordering::SeqCst);
            CbResult::More
        });
        thread::sleep(Duration::from_millis(50));
        handle.cancel();
        let seen = counter.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(100));
        assert_eq!(counter.load(Ordering::SeqCst), seen);
    }

    #[test]
    fn cancel_is_idempotent() {
        let scheduler: TimedScheduler<AtomicUsize> = TimedScheduler::start();
        let counter = RefCounted::new(AtomicUsize::new(0));
        let handle = scheduler.schedule(Duration::from_secs(10), counter, |_now, _arg| CbResult::Last);
        handle.cancel();
        handle.cancel();
        assert!(handle.is_cancelled());
    }
}
