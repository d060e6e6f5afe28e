//! # Synchronization Context
//!
//! A serial execution queue: every resolver-internal state mutation
//! (resolve-state transitions, cluster-table membership changes,
//! `RoutingConfig` replacement, emitting resolution results) is funneled
//! through one of these so that concurrent LDS/RDS callbacks, and the
//! deferred removal step in `ClusterRefTable::release`, never interleave.
//! External watcher callbacks re-enter this queue before touching any
//! resolver state.
//!
//! There is no background thread. Like the `SynchronizationContext` this
//! is modeled on, tasks are drained inline by whichever thread's call to
//! `execute` finds the queue idle; a task submitted while another is
//! already draining is simply appended and picked up by the draining
//! thread, never spawning extra work. This keeps the core runtime-agnostic
//! — no dependency on an enclosing Tokio reactor just to construct one.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

type Task = Box<dyn FnOnce() + Send + 'static>;

struct Queue {
    tasks: Mutex<VecDeque<Task>>,
    draining: AtomicBool,
}

/// A handle to a serial executor. Cloning shares the same queue.
#[derive(Clone)]
pub struct SynchronizationContext {
    inner: Arc<Queue>,
}

impl SynchronizationContext {
    pub fn new() -> Self {
        Self { inner: Arc::new(Queue { tasks: Mutex::new(VecDeque::new()), draining: AtomicBool::new(false) }) }
    }

    /// Enqueue a closure to run on the serial queue. If no thread is
    /// currently draining, this call drains it (including any tasks other
    /// threads enqueue while that drain is in progress) before returning;
    /// otherwise it returns immediately, and the draining thread will pick
    /// up this task in submission order.
    pub fn execute<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.tasks.lock().unwrap().push_back(Box::new(task));
        self.drain();
    }

    fn drain(&self) {
        if self.inner.draining.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_err() {
            // Someone else is already draining; they will see our task.
            return;
        }
        loop {
            let next = self.inner.tasks.lock().unwrap().pop_front();
            match next {
                Some(task) => task(),
                None => {
                    self.inner.draining.store(false, Ordering::SeqCst);
                    // Re-check for a task that landed between the pop and
                    // clearing the flag; if so, try to resume draining.
                    let more_work = !self.inner.tasks.lock().unwrap().is_empty();
                    if !more_work {
                        break;
                    }
                    if self.inner.draining.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_err() {
                        break;
                    }
                }
            }
        }
    }
}

impl Default for SynchronizationContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[test]
    fn tasks_run_in_submission_order() {
        let ctx = SynchronizationContext::new();
        let observed = Arc::new(StdMutex::new(Vec::new()));

        for i in 0..100 {
            let observed = observed.clone();
            ctx.execute(move || observed.lock().unwrap().push(i));
        }

        let observed = observed.lock().unwrap();
        let expected: Vec<i32> = (0..100).collect();
        assert_eq!(*observed, expected);
    }

    #[test]
    fn construction_requires_no_async_runtime() {
        // Regression guard: this must not panic outside a Tokio reactor.
        let ctx = SynchronizationContext::new();
        ctx.execute(|| {});
    }

    #[test]
    fn a_task_enqueued_from_within_a_running_task_still_runs() {
        let ctx = SynchronizationContext::new();
        let observed = Arc::new(StdMutex::new(Vec::new()));

        let ctx_clone = ctx.clone();
        let observed_clone = observed.clone();
        ctx.execute(move || {
            observed_clone.lock().unwrap().push("outer");
            let observed_inner = observed_clone.clone();
            ctx_clone.execute(move || observed_inner.lock().unwrap().push("inner"));
        });

        assert_eq!(*observed.lock().unwrap(), vec!["outer", "inner"]);
    }
}
