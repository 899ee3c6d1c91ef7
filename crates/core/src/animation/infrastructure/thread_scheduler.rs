use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::animation::scheduler::{Scheduler, Task, TaskHandle, TimerQueue};
use crate::pipeline::infrastructure::worker_pool::panic_message;

struct Shared {
    epoch: Instant,
    queue: Mutex<TimerQueue>,
}

impl Shared {
    fn now(&self) -> Duration {
        self.epoch.elapsed()
    }

    fn queue(&self) -> std::sync::MutexGuard<'_, TimerQueue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Scheduler backed by one dedicated thread and the wall clock.
///
/// Dropping the scheduler stops its thread; tasks still pending at that
/// point never run.
pub struct ThreadScheduler {
    shared: Arc<Shared>,
    wake: Mutex<Option<Sender<()>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl ThreadScheduler {
    pub fn new(name: &str) -> std::io::Result<Self> {
        let shared = Arc::new(Shared {
            epoch: Instant::now(),
            queue: Mutex::new(TimerQueue::default()),
        });
        let (wake, woken) = crossbeam_channel::unbounded();
        let thread = {
            let shared = shared.clone();
            thread::Builder::new()
                .name(name.to_string())
                .spawn(move || run_loop(&shared, &woken))?
        };
        Ok(Self {
            shared,
            wake: Mutex::new(Some(wake)),
            thread: Mutex::new(Some(thread)),
        })
    }

    fn wake(&self) {
        if let Some(wake) = self.wake.lock().unwrap_or_else(PoisonError::into_inner).as_ref() {
            let _ = wake.send(());
        }
    }
}

impl Scheduler for ThreadScheduler {
    fn now(&self) -> Duration {
        self.shared.now()
    }

    fn schedule(&self, delay: Duration, task: Task) -> TaskHandle {
        let deadline = self.shared.now() + delay;
        let handle = self.shared.queue().push(deadline, task);
        self.wake();
        handle
    }

    fn cancel(&self, handle: TaskHandle) {
        self.shared.queue().cancel(handle);
    }
}

impl Drop for ThreadScheduler {
    fn drop(&mut self) {
        drop(self.wake.lock().unwrap_or_else(PoisonError::into_inner).take());
        let handle = self.thread.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                log::error!("Scheduler thread panicked");
            }
        }
        log::debug!("Scheduler stopped");
    }
}

fn run_loop(shared: &Shared, woken: &Receiver<()>) {
    loop {
        let next = loop {
            let due = shared.queue().pop_due(shared.now());
            match due {
                Some((_, task)) => {
                    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
                        log::error!("Scheduled task panicked: {}", panic_message(payload.as_ref()));
                    }
                }
                None => break shared.queue().next_deadline(),
            }
        };

        let outcome = match next {
            Some(deadline) => woken.recv_deadline(shared.epoch + deadline),
            None => woken.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        if let Err(RecvTimeoutError::Disconnected) = outcome {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduler() -> Arc<ThreadScheduler> {
        Arc::new(ThreadScheduler::new("test-scheduler").unwrap())
    }

    #[test]
    fn test_runs_tasks_in_deadline_order() {
        let scheduler = scheduler();
        let (tx, rx) = crossbeam_channel::unbounded();
        for (delay, name) in [(40, "c"), (10, "a"), (25, "b")] {
            let tx = tx.clone();
            scheduler.schedule(
                Duration::from_millis(delay),
                Box::new(move || tx.send(name).unwrap()),
            );
        }

        let seen: Vec<_> = (0..3)
            .map(|_| rx.recv_timeout(Duration::from_secs(1)).unwrap())
            .collect();
        assert_eq!(seen, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_task_does_not_run_before_deadline() {
        let scheduler = scheduler();
        let (tx, rx) = crossbeam_channel::unbounded();
        let clock = scheduler.clone();
        let scheduled_at = scheduler.now();
        scheduler.schedule(
            Duration::from_millis(30),
            Box::new(move || tx.send(clock.now()).unwrap()),
        );

        let ran_at = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert!(ran_at >= scheduled_at + Duration::from_millis(30));
    }

    #[test]
    fn test_cancelled_task_never_runs() {
        let scheduler = scheduler();
        let (tx, rx) = crossbeam_channel::unbounded();
        let cancelled_tx = tx.clone();
        let handle = scheduler.schedule(
            Duration::from_millis(20),
            Box::new(move || cancelled_tx.send("cancelled").unwrap()),
        );
        scheduler.cancel(handle);
        scheduler.schedule(Duration::from_millis(40), Box::new(move || tx.send("kept").unwrap()));

        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), "kept");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_panicking_task_does_not_stop_scheduler() {
        let scheduler = scheduler();
        scheduler.execute(Box::new(|| panic!("tick failed")));
        let (tx, rx) = crossbeam_channel::unbounded();
        scheduler.execute(Box::new(move || tx.send(()).unwrap()));
        assert!(rx.recv_timeout(Duration::from_secs(1)).is_ok());
    }

    #[test]
    fn test_drop_stops_thread() {
        let scheduler = ThreadScheduler::new("test-scheduler").unwrap();
        let (tx, rx) = crossbeam_channel::unbounded::<()>();
        scheduler.schedule(Duration::from_secs(60), Box::new(move || tx.send(()).unwrap()));
        drop(scheduler);
        assert!(matches!(
            rx.recv_timeout(Duration::from_millis(100)),
            Err(crossbeam_channel::RecvTimeoutError::Disconnected)
        ));
    }
}
