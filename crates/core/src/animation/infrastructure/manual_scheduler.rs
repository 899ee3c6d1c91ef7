use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::animation::scheduler::{Scheduler, Task, TaskHandle, TimerQueue};

#[derive(Default)]
struct State {
    now: Duration,
    queue: TimerQueue,
}

/// Scheduler driven by a virtual clock.
///
/// Nothing runs until [`advance`](Self::advance) or
/// [`run_pending`](Self::run_pending) is called, and tasks run on the
/// calling thread. Used for deterministic replays and tests.
#[derive(Default)]
pub struct ManualScheduler {
    state: Mutex<State>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves the clock forward by `by`, running every task that falls due on
    /// the way. The clock is set to each task's deadline before it runs, so
    /// tasks scheduled from a task are timed relative to that deadline.
    pub fn advance(&self, by: Duration) {
        let target = self.now() + by;
        loop {
            let task = {
                let mut state = self.lock();
                match state.queue.pop_due(target) {
                    Some((deadline, task)) => {
                        state.now = state.now.max(deadline);
                        task
                    }
                    None => {
                        state.now = target;
                        break;
                    }
                }
            };
            task();
        }
    }

    /// Runs the tasks due at the current time.
    pub fn run_pending(&self) {
        self.advance(Duration::ZERO);
    }

    pub fn pending(&self) -> usize {
        self.lock().queue.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Scheduler for ManualScheduler {
    fn now(&self) -> Duration {
        self.lock().now
    }

    fn schedule(&self, delay: Duration, task: Task) -> TaskHandle {
        let mut state = self.lock();
        let deadline = state.now + delay;
        state.queue.push(deadline, task)
    }

    fn cancel(&self, handle: TaskHandle) {
        self.lock().queue.cancel(handle);
    }
}
