// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Completion tracking for submitted GPU work.

A [`FenceCycle`] stands for one submission.  The host can block on it, poll it, or await it, and
can hand it objects that must outlive the GPU work (staging buffers, textures being copied) as
well as tasks that must run only once the work is done (writing rendered texels back to the
guest).

Completion is reported by the backend through [`FenceCycle::signal`].  Signaling runs the
completion tasks in the order they were registered, then wakes every waiter, and finally
releases the attached objects.  A waiter therefore observes the effects of every task.  Tasks
registered while signaling is under way run after the ones already queued.  Anything attached
or registered after completion is released or run immediately.

Recorded work that is never submitted is reported through [`FenceCycle::cancel`] instead.  The
completion tasks are dropped without running, the undo tasks registered with
[`FenceCycle::on_cancel`] run newest first, and waiters wake as if the work had completed.
*/

use std::any::Any;
use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

type Task = Box<dyn FnOnce() + Send>;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Default)]
struct CycleState {
    /// The GPU is done, or the work was discarded.  Nothing new is attached.
    signaled: bool,
    /// Every task registered before the signal has run; new tasks run immediately.
    completed: bool,
    tasks: Vec<Task>,
    undo: Vec<Task>,
    wakers: Vec<r#continue::Sender<()>>,
    attachments: Vec<Arc<dyn Any + Send + Sync>>,
}

/// One unit of submitted GPU work.
pub struct FenceCycle {
    id: u64,
    state: Mutex<CycleState>,
    signaled: Condvar,
}

/// Marks the cycle completed when dropped, including while unwinding from a task.
struct Completion<'a>(&'a FenceCycle);

impl Drop for Completion<'_> {
    fn drop(&mut self) {
        let (leftover, wakers) = {
            let mut state = self.0.lock();
            state.completed = true;
            (std::mem::take(&mut state.tasks), std::mem::take(&mut state.wakers))
        };
        self.0.signaled.notify_all();
        for waker in wakers {
            waker.send(());
        }
        drop(leftover);
    }
}

impl FenceCycle {
    pub fn new() -> Arc<FenceCycle> {
        Arc::new(FenceCycle {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            state: Mutex::new(CycleState::default()),
            signaled: Condvar::new(),
        })
    }

    /// A process-unique number, for diagnostics.
    pub fn id(&self) -> u64 {
        self.id
    }

    // A panicking completion task must not wedge every later waiter.
    fn lock(&self) -> MutexGuard<'_, CycleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether the GPU has finished the work.
    pub fn poll(&self) -> bool {
        self.lock().completed
    }

    /// Blocks the calling thread until the GPU has finished the work.
    pub fn wait(&self) {
        let state = self.lock();
        if state.completed {
            return;
        }
        let _perf = logwise::perfwarn_begin!("FenceCycle::wait");
        logwise::trace_sync!("Waiting on fence cycle {id}", id = self.id);
        let _state = self
            .signaled
            .wait_while(state, |state| !state.completed)
            .unwrap_or_else(PoisonError::into_inner);
    }

    /// Resolves once the GPU has finished the work, or the work was cancelled.
    pub async fn wait_async(&self) {
        let future = {
            let mut state = self.lock();
            if state.completed {
                return;
            }
            let (sender, future) = r#continue::continuation();
            state.wakers.push(sender);
            future
        };
        future.await
    }

    /// Keeps `object` alive until the GPU has finished the work.
    pub fn attach<T: Any + Send + Sync>(&self, object: Arc<T>) {
        let mut state = self.lock();
        if !state.signaled {
            state.attachments.push(object);
            return;
        }
        // Dropping the object may re-enter this cycle, so release the lock first.
        drop(state);
        drop(object);
    }

    /// Keeps every object in `objects` alive until the GPU has finished the work.
    pub fn attach_objects<I>(&self, objects: I)
    where
        I: IntoIterator<Item = Arc<dyn Any + Send + Sync>>,
    {
        for object in objects {
            let mut state = self.lock();
            if !state.signaled {
                state.attachments.push(object);
                continue;
            }
            drop(state);
            drop(object);
        }
    }

    /// Runs `task` exactly once, no earlier than the GPU finishing the work.
    ///
    /// Tasks run on the thread that signals the cycle, before any waiter wakes.  A task must
    /// not wait on the cycle it is registered with.  If the work is cancelled the task is
    /// dropped without running.
    pub fn on_complete(&self, task: impl FnOnce() + Send + 'static) {
        let mut state = self.lock();
        if !state.completed {
            state.tasks.push(Box::new(task));
            return;
        }
        drop(state);
        task();
    }

    /// Runs `task` if the recorded work is discarded instead of submitted.
    ///
    /// Used to roll back bookkeeping done while recording.  Dropped once the cycle signals.
    pub fn on_cancel(&self, task: impl FnOnce() + Send + 'static) {
        let mut state = self.lock();
        if !state.signaled {
            state.undo.push(Box::new(task));
        }
    }

    /// Reports that the GPU has finished the work.
    ///
    /// Called by the backend.  Signaling more than once, or after a cancel, has no further
    /// effect.
    pub fn signal(&self) {
        let (undo, attachments) = {
            let mut state = self.lock();
            if state.signaled {
                return;
            }
            state.signaled = true;
            (std::mem::take(&mut state.undo), std::mem::take(&mut state.attachments))
        };
        drop(undo);
        let completion = Completion(self);
        loop {
            let tasks = {
                let mut state = self.lock();
                if state.tasks.is_empty() {
                    state.completed = true;
                    break;
                }
                std::mem::take(&mut state.tasks)
            };
            logwise::trace_sync!(
                "Fence cycle {id} signaled, running {tasks} tasks",
                id = self.id,
                tasks = tasks.len()
            );
            for task in tasks {
                task();
            }
        }
        drop(completion);
        drop(attachments);
    }

    /// Reports that the recorded work was discarded without reaching the GPU.
    ///
    /// Called by the scheduler when recording or submission fails.  Has no effect once the
    /// cycle has signaled.
    pub fn cancel(&self) {
        let (tasks, undo, attachments) = {
            let mut state = self.lock();
            if state.signaled {
                return;
            }
            state.signaled = true;
            (
                std::mem::take(&mut state.tasks),
                std::mem::take(&mut state.undo),
                std::mem::take(&mut state.attachments),
            )
        };
        logwise::trace_sync!(
            "Fence cycle {id} cancelled, undoing {undo} recordings",
            id = self.id,
            undo = undo.len()
        );
        drop(tasks);
        let completion = Completion(self);
        for task in undo.into_iter().rev() {
            task();
        }
        drop(completion);
        drop(attachments);
    }
}

impl Debug for FenceCycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FenceCycle")
            .field("id", &self.id)
            .field("signaled", &self.poll())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn attachments_outlive_submission() {
        let cycle = FenceCycle::new();
        let object = Arc::new(5u32);
        cycle.attach(object.clone());
        assert_eq!(Arc::strong_count(&object), 2);
        cycle.signal();
        assert_eq!(Arc::strong_count(&object), 1);

        // already signaled: released straight away
        cycle.attach(object.clone());
        assert_eq!(Arc::strong_count(&object), 1);
    }

    #[test]
    fn tasks_run_once_in_order() {
        let cycle = FenceCycle::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = order.clone();
            cycle.on_complete(move || order.lock().unwrap().push(i));
        }
        assert!(order.lock().unwrap().is_empty());
        cycle.signal();
        cycle.signal();
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);

        let late = Arc::new(AtomicUsize::new(0));
        let move_late = late.clone();
        cycle.on_complete(move || {
            move_late.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(late.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn wait_blocks_until_signal() {
        let cycle = FenceCycle::new();
        let signaler = cycle.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            signaler.signal();
        });
        assert!(!cycle.poll());
        cycle.wait();
        assert!(cycle.poll());
        handle.join().unwrap();
    }

    #[test]
    fn wait_async_resolves_after_signal() {
        let cycle = FenceCycle::new();
        let signaler = cycle.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            signaler.signal();
        });
        test_executors::sleep_on(async { cycle.wait_async().await });
        assert!(cycle.poll());
        handle.join().unwrap();
    }

    #[test]
    fn tasks_registered_while_signaling_run_last() {
        let cycle = FenceCycle::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let first = order.clone();
        let nested_cycle = cycle.clone();
        let nested_order = order.clone();
        cycle.on_complete(move || {
            first.lock().unwrap().push("first");
            let nested = nested_order.clone();
            nested_cycle.on_complete(move || nested.lock().unwrap().push("late"));
        });
        let second = order.clone();
        cycle.on_complete(move || second.lock().unwrap().push("second"));
        cycle.signal();
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "late"]);
        assert!(cycle.poll());
    }

    #[test]
    fn panicking_task_still_completes_the_cycle() {
        let cycle = FenceCycle::new();
        cycle.on_complete(|| panic!("task failed"));
        let signaler = cycle.clone();
        let handle = std::thread::spawn(move || signaler.signal());
        assert!(handle.join().is_err());
        cycle.wait();
        assert!(cycle.poll());
    }

    #[test]
    fn cancel_undoes_newest_first_and_skips_tasks() {
        let cycle = FenceCycle::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let completed = order.clone();
        cycle.on_complete(move || completed.lock().unwrap().push(0));
        for i in 1..=2 {
            let order = order.clone();
            cycle.on_cancel(move || order.lock().unwrap().push(i));
        }
        let object = Arc::new(1u8);
        cycle.attach(object.clone());

        cycle.cancel();
        assert_eq!(*order.lock().unwrap(), vec![2, 1]);
        assert!(cycle.poll());
        assert_eq!(Arc::strong_count(&object), 1);
        cycle.wait();

        // a cancelled cycle never signals
        cycle.signal();
        assert_eq!(*order.lock().unwrap(), vec![2, 1]);
    }

    #[test]
    fn signal_drops_undo_tasks() {
        let cycle = FenceCycle::new();
        let undone = Arc::new(AtomicUsize::new(0));
        let move_undone = undone.clone();
        cycle.on_cancel(move || {
            move_undone.fetch_add(1, Ordering::SeqCst);
        });
        cycle.signal();
        cycle.cancel();
        assert_eq!(undone.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn wait_async_resolves_after_cancel() {
        let cycle = FenceCycle::new();
        let canceller = cycle.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            canceller.cancel();
        });
        test_executors::sleep_on(async { cycle.wait_async().await });
        assert!(cycle.poll());
        handle.join().unwrap();
    }

    #[test]
    fn ids_are_unique() {
        assert_ne!(FenceCycle::new().id(), FenceCycle::new().id());
    }
}
