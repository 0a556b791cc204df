//! Concurrency substrate backing the session model and command engine
//! (spec.md §2, §5): a bounded work queue for cross-thread hand-off, a
//! reference-counting discipline with post-destruction detection, and a
//! timed-task scheduler for periodic maintenance work.

pub mod queue;
pub mod refcount;
pub mod scheduler;

pub use queue::{Signal, WorkItem, WorkQueue, WorkQueueSender};
pub use refcount::{RefCounted, WeakHandle, next_generation};
pub use scheduler::{CbResult, TaskHandle, TimedScheduler};
