use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

/// Unit of work run on a scheduler's context.
pub type Task = Box<dyn FnOnce() + Send>;

/// Identifies a scheduled task so it can be cancelled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TaskHandle(u64);

/// Serialized execution context with a clock and cancellable timers.
///
/// Every task of one scheduler runs on the same logical context, one at a
/// time. Due tasks run in deadline order, ties in submission order.
/// Cancelling a task that has not started guarantees it never runs;
/// cancelling one that already ran is a no-op.
pub trait Scheduler: Send + Sync {
    /// Time elapsed on this scheduler's clock.
    fn now(&self) -> Duration;

    fn schedule(&self, delay: Duration, task: Task) -> TaskHandle;

    fn cancel(&self, handle: TaskHandle);

    /// Runs `task` on the scheduler context as soon as possible.
    fn execute(&self, task: Task) -> TaskHandle {
        self.schedule(Duration::ZERO, task)
    }
}

/// Pending tasks ordered by `(deadline, submission)`.
#[derive(Default)]
pub(crate) struct TimerQueue {
    entries: BTreeMap<(Duration, u64), Task>,
    deadlines: HashMap<u64, Duration>,
    next_id: u64,
}

impl TimerQueue {
    pub(crate) fn push(&mut self, deadline: Duration, task: Task) -> TaskHandle {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.insert((deadline, id), task);
        self.deadlines.insert(id, deadline);
        TaskHandle(id)
    }

    /// Returns `true` if the task was still pending.
    pub(crate) fn cancel(&mut self, handle: TaskHandle) -> bool {
        match self.deadlines.remove(&handle.0) {
            Some(deadline) => self.entries.remove(&(deadline, handle.0)).is_some(),
            None => false,
        }
    }

    pub(crate) fn next_deadline(&self) -> Option<Duration> {
        self.entries.keys().next().map(|&(deadline, _)| deadline)
    }

    /// Removes the earliest task if it is due at `now`.
    pub(crate) fn pop_due(&mut self, now: Duration) -> Option<(Duration, Task)> {
        let (&(deadline, id), _) = self.entries.iter().next()?;
        if deadline > now {
            return None;
        }
        self.deadlines.remove(&id);
        self.entries
            .remove(&(deadline, id))
            .map(|task| (deadline, task))
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
