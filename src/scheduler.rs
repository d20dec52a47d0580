//! Timer abstraction for deferred work.
//!
//! Debounced resorting goes through [`Scheduler`] so tests can drive
//! time explicitly with [`ManualScheduler`] while applications use
//! [`TokioScheduler`].

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::AbortHandle;
use tracing::trace;

/// Identifier of a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

/// Deferred work.
pub type Task = Box<dyn FnOnce() + Send>;

/// Runs tasks after a delay.
pub trait Scheduler: Send + Sync {
    /// Run `task` once `delay` has elapsed.
    fn schedule(&self, delay: Duration, task: Task) -> TaskId;

    /// Cancel a task that has not run yet. Returns false if it already ran
    /// or was unknown.
    fn cancel(&self, id: TaskId) -> bool;
}

/// Virtual-time scheduler. Tasks run only inside [`ManualScheduler::advance`].
#[derive(Default)]
pub struct ManualScheduler {
    inner: Mutex<ManualInner>,
}

#[derive(Default)]
struct ManualInner {
    now: Duration,
    next_id: u64,
    // Keyed by (due time, id) so equal deadlines run in scheduling order.
    tasks: BTreeMap<(Duration, u64), Task>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current virtual time.
    pub fn now(&self) -> Duration {
        self.inner.lock().now
    }

    /// Number of tasks not yet run.
    pub fn pending(&self) -> usize {
        self.inner.lock().tasks.len()
    }

    /// Advance virtual time by `by`, running every task that falls due in
    /// deadline order. Tasks scheduled by running tasks are honored if they
    /// fall within the window.
    pub fn advance(&self, by: Duration) {
        let target = self.inner.lock().now + by;
        loop {
            let task = {
                let mut inner = self.inner.lock();
                let due = inner.tasks.keys().next().copied();
                match due {
                    Some(key) if key.0 <= target => {
                        inner.now = key.0;
                        inner.tasks.remove(&key)
                    }
                    _ => None,
                }
            };
            match task {
                Some(task) => task(),
                None => break,
            }
        }
        self.inner.lock().now = target;
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, task: Task) -> TaskId {
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let id = inner.next_id;
        let due = inner.now + delay;
        inner.tasks.insert((due, id), task);
        TaskId(id)
    }

    fn cancel(&self, id: TaskId) -> bool {
        let mut inner = self.inner.lock();
        let key = inner.tasks.keys().find(|(_, task)| *task == id.0).copied();
        key.and_then(|key| inner.tasks.remove(&key)).is_some()
    }
}

/// Scheduler backed by `tokio::time::sleep`. Must be used from within a
/// tokio runtime.
#[derive(Default)]
pub struct TokioScheduler {
    next_id: AtomicU64,
    handles: Arc<Mutex<HashMap<u64, AbortHandle>>>,
}

impl TokioScheduler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: Task) -> TaskId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let handles = self.handles.clone();
        // Hold the map lock across spawn so the task cannot remove its
        // handle before it is inserted.
        let mut map = self.handles.lock();
        let join = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            handles.lock().remove(&id);
            task();
        });
        map.insert(id, join.abort_handle());
        TaskId(id)
    }

    fn cancel(&self, id: TaskId) -> bool {
        match self.handles.lock().remove(&id.0) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }
}

/// Trailing-edge debouncer: each trigger postpones the pending run.
pub struct Debouncer {
    scheduler: Arc<dyn Scheduler>,
    interval: Duration,
    pending: Arc<Mutex<Option<TaskId>>>,
}

impl Debouncer {
    pub fn new(scheduler: Arc<dyn Scheduler>, interval: Duration) -> Self {
        Self {
            scheduler,
            interval,
            pending: Arc::new(Mutex::new(None)),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Schedule `task`, replacing any run that has not happened yet.
    pub fn trigger(&self, task: Task) {
        let mut pending = self.pending.lock();
        if let Some(previous) = pending.take() {
            if self.scheduler.cancel(previous) {
                trace!("debounced run postponed");
            }
        }
        let slot = self.pending.clone();
        let id = self.scheduler.schedule(
            self.interval,
            Box::new(move || {
                slot.lock().take();
                task();
            }),
        );
        *pending = Some(id);
    }

    /// Drop the pending run, if any.
    pub fn cancel(&self) -> bool {
        match self.pending.lock().take() {
            Some(id) => self.scheduler.cancel(id),
            None => false,
        }
    }

    /// True while a run is scheduled.
    pub fn is_pending(&self) -> bool {
        self.pending.lock().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counter() -> (Arc<Mutex<Vec<&'static str>>>, impl Fn(&'static str) -> Task) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        let make = move |label: &'static str| -> Task {
            let sink = sink.clone();
            Box::new(move || sink.lock().push(label))
        };
        (log, make)
    }

    #[test]
    fn test_manual_runs_in_deadline_order() {
        let scheduler = ManualScheduler::new();
        let (log, task) = counter();
        scheduler.schedule(Duration::from_millis(30), task("late"));
        scheduler.schedule(Duration::from_millis(10), task("early"));
        scheduler.schedule(Duration::from_millis(10), task("early-2"));

        scheduler.advance(Duration::from_millis(9));
        assert!(log.lock().is_empty());
        scheduler.advance(Duration::from_millis(1));
        assert_eq!(*log.lock(), vec!["early", "early-2"]);
        scheduler.advance(Duration::from_millis(100));
        assert_eq!(*log.lock(), vec!["early", "early-2", "late"]);
        assert_eq!(scheduler.now(), Duration::from_millis(110));
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn test_manual_cancel() {
        let scheduler = ManualScheduler::new();
        let (log, task) = counter();
        let id = scheduler.schedule(Duration::from_millis(5), task("x"));
        assert!(scheduler.cancel(id));
        assert!(!scheduler.cancel(id));
        scheduler.advance(Duration::from_millis(10));
        assert!(log.lock().is_empty());
    }

    #[test]
    fn test_debouncer_coalesces() {
        let scheduler = Arc::new(ManualScheduler::new());
        let debouncer = Debouncer::new(scheduler.clone(), Duration::from_millis(50));
        let (log, task) = counter();

        debouncer.trigger(task("1"));
        scheduler.advance(Duration::from_millis(30));
        debouncer.trigger(task("2"));
        scheduler.advance(Duration::from_millis(30));
        assert!(log.lock().is_empty());
        assert!(debouncer.is_pending());

        scheduler.advance(Duration::from_millis(20));
        assert_eq!(*log.lock(), vec!["2"]);
        assert!(!debouncer.is_pending());
        assert_eq!(debouncer.interval(), Duration::from_millis(50));
    }

    #[test]
    fn test_debouncer_cancel() {
        let scheduler = Arc::new(ManualScheduler::new());
        let debouncer = Debouncer::new(scheduler.clone(), Duration::from_millis(50));
        let (log, task) = counter();
        debouncer.trigger(task("1"));
        assert!(debouncer.cancel());
        scheduler.advance(Duration::from_millis(100));
        assert!(log.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_scheduler() {
        let scheduler = TokioScheduler::new();
        let (log, task) = counter();
        scheduler.schedule(Duration::from_millis(10), task("ran"));
        let cancelled = scheduler.schedule(Duration::from_millis(10), task("cancelled"));
        assert!(scheduler.cancel(cancelled));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(*log.lock(), vec!["ran"]);
    }
}
