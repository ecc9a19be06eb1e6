//! Task boxing and futured submission.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};

type Payload = Box<dyn Any + Send + 'static>;

/// An opaque unit of work: a boxed nullary callable.
///
/// A `Task` always holds a real callable; "no task" is expressed by the queue
/// contract (`Err(PopError::Closed)`), never by an empty task.
pub struct Task(Box<dyn FnOnce() + Send + 'static>);

impl Task {
    pub fn new(f: impl FnOnce() + Send + 'static) -> Self {
        Self(Box::new(f))
    }

    /// Execute the task, consuming it. Each task runs at most once.
    pub fn run(self) {
        (self.0)()
    }

    /// Wrap `f` so its result (or panic) resolves the returned handle once
    /// the task has executed.
    pub fn with_handle<R, F>(f: F) -> (Self, JoinHandle<R>)
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let cell = Arc::new(HandleCell {
            result: Mutex::new(None),
            done: Condvar::new(),
        });
        let publisher = Publisher {
            cell: Arc::clone(&cell),
            sent: false,
        };
        let task = Self::new(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(f));
            publisher.publish(outcome);
        });
        (task, JoinHandle { cell })
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Task")
    }
}

struct HandleCell<R> {
    result: Mutex<Option<Result<R, Payload>>>,
    done: Condvar,
}

impl<R> HandleCell<R> {
    fn store(&self, outcome: Result<R, Payload>) {
        let mut slot = self.result.lock().expect("task handle mutex poisoned");
        if slot.is_none() {
            *slot = Some(outcome);
        }
        drop(slot);
        self.done.notify_all();
    }
}

/// Publishes exactly one outcome into the handle cell. Dropping the task
/// without running it resolves the handle too, so a joiner never deadlocks on
/// a task the pool discarded during shutdown.
struct Publisher<R> {
    cell: Arc<HandleCell<R>>,
    sent: bool,
}

impl<R> Publisher<R> {
    fn publish(mut self, outcome: Result<R, Payload>) {
        self.cell.store(outcome);
        self.sent = true;
    }
}

impl<R> Drop for Publisher<R> {
    fn drop(&mut self) {
        if !self.sent {
            self.cell
                .store(Err(Box::new("task dropped before execution")));
        }
    }
}

/// Handle to a futured submission; resolves once the task has executed.
pub struct JoinHandle<R> {
    cell: Arc<HandleCell<R>>,
}

impl<R> JoinHandle<R> {
    /// Block until the task has executed and return its result.
    ///
    /// A panic raised by the task resumes here; the worker that ran the task
    /// never observes it. If the pool dropped the task unexecuted, this
    /// panics with a "task dropped before execution" payload.
    pub fn join(self) -> R {
        let mut slot = self.cell.result.lock().expect("task handle mutex poisoned");
        while slot.is_none() {
            slot = self
                .cell
                .done
                .wait(slot)
                .expect("task handle condvar wait poisoned");
        }
        match slot.take().expect("task outcome vanished") {
            Ok(value) => value,
            Err(payload) => panic::resume_unwind(payload),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.cell
            .result
            .lock()
            .expect("task handle mutex poisoned")
            .is_some()
    }
}

impl<R> fmt::Debug for JoinHandle<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinHandle")
            .field("finished", &self.is_finished())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_resolves_after_run() {
        let (task, handle) = Task::with_handle(|| 6 * 7);
        assert!(!handle.is_finished());
        task.run();
        assert!(handle.is_finished());
        assert_eq!(handle.join(), 42);
    }

    #[test]
    fn handle_propagates_panic() {
        let (task, handle) = Task::with_handle(|| -> u32 { panic!("boom") });
        // The runner itself must not unwind.
        assert!(panic::catch_unwind(AssertUnwindSafe(|| task.run())).is_ok());
        let joined = panic::catch_unwind(AssertUnwindSafe(|| handle.join()));
        let payload = joined.unwrap_err();
        assert_eq!(payload.downcast_ref::<&str>(), Some(&"boom"));
    }

    #[test]
    fn dropped_task_resolves_handle() {
        let (task, handle) = Task::with_handle(|| 1);
        drop(task);
        assert!(handle.is_finished());
        let joined = panic::catch_unwind(AssertUnwindSafe(|| handle.join()));
        assert!(joined.is_err());
    }
}
