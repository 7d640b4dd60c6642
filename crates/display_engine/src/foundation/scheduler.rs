//! Delayed task scheduling
//!
//! A [`TimerService`] owns one worker thread that runs cancellable tasks once
//! their deadline passes. Tasks are stored in a slot map shared with the
//! worker; the worker sleeps on a channel until either the earliest deadline
//! expires or a new task wakes it up.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use slotmap::{new_key_type, SlotMap};

new_key_type! {
    /// Handle to a task scheduled on a [`TimerService`]
    pub struct TaskKey;
}

type Job = Box<dyn FnOnce() + Send + 'static>;

struct ScheduledTask {
    deadline: Instant,
    job: Job,
}

type TaskTable = Arc<Mutex<SlotMap<TaskKey, ScheduledTask>>>;

enum Signal {
    Wake,
    Shutdown,
}

/// Runs delayed tasks on a dedicated thread
///
/// Tasks run one after another in deadline order on the timer thread, so they
/// must be short or hand their heavy work elsewhere.
pub struct TimerService {
    tasks: TaskTable,
    sender: Sender<Signal>,
    worker: Option<Worker>,
}

impl TimerService {
    /// Spawn the timer thread
    pub fn new(name: &str) -> std::io::Result<Self> {
        let tasks: TaskTable = Arc::new(Mutex::new(SlotMap::with_key()));
        let (sender, receiver) = unbounded();
        let worker = Worker::spawn(name, Arc::clone(&tasks), receiver)?;

        log::debug!("Timer service '{name}' started");

        Ok(Self {
            tasks,
            sender,
            worker: Some(worker),
        })
    }

    /// Run `job` once `delay` has elapsed
    pub fn schedule<F>(&self, delay: Duration, job: F) -> TaskKey
    where
        F: FnOnce() + Send + 'static,
    {
        self.schedule_at(Instant::now() + delay, job)
    }

    /// Run `job` once `deadline` has passed
    pub fn schedule_at<F>(&self, deadline: Instant, job: F) -> TaskKey
    where
        F: FnOnce() + Send + 'static,
    {
        let key = self.tasks.lock().insert(ScheduledTask {
            deadline,
            job: Box::new(job),
        });
        // The worker only exits when the service is dropped
        let _ = self.sender.send(Signal::Wake);
        key
    }

    /// Cancel a task that has not started yet
    ///
    /// Returns false if the task already ran, is running, or was cancelled.
    pub fn cancel(&self, key: TaskKey) -> bool {
        self.tasks.lock().remove(key).is_some()
    }

    /// Number of tasks waiting for their deadline
    pub fn pending(&self) -> usize {
        self.tasks.lock().len()
    }
}

impl Drop for TimerService {
    fn drop(&mut self) {
        let _ = self.sender.send(Signal::Shutdown);
        if let Some(worker) = self.worker.take() {
            worker.join();
        }
    }
}

struct Worker {
    thread: thread::JoinHandle<()>,
}

impl Worker {
    fn spawn(name: &str, tasks: TaskTable, receiver: Receiver<Signal>) -> std::io::Result<Self> {
        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || Self::run(&tasks, &receiver))?;

        Ok(Self { thread })
    }

    fn run(tasks: &TaskTable, receiver: &Receiver<Signal>) {
        loop {
            let next_deadline = tasks.lock().values().map(|task| task.deadline).min();
            let signal = match next_deadline {
                Some(deadline) => receiver.recv_deadline(deadline),
                None => receiver.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };

            match signal {
                Ok(Signal::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                Ok(Signal::Wake) | Err(RecvTimeoutError::Timeout) => {}
            }

            for job in Self::take_due(tasks, Instant::now()) {
                job();
            }
        }
    }

    /// Remove every task whose deadline has passed, earliest first
    fn take_due(tasks: &TaskTable, now: Instant) -> Vec<Job> {
        let mut tasks = tasks.lock();
        let due_keys: Vec<TaskKey> = tasks
            .iter()
            .filter(|(_, task)| task.deadline <= now)
            .map(|(key, _)| key)
            .collect();

        let mut due: Vec<ScheduledTask> = due_keys
            .into_iter()
            .filter_map(|key| tasks.remove(key))
            .collect();
        due.sort_by_key(|task| task.deadline);
        due.into_iter().map(|task| task.job).collect()
    }

    fn join(self) {
        // The last handle to the service can be released by one of its own
        // tasks; joining from the timer thread itself would never return.
        if self.thread.thread().id() == thread::current().id() {
            return;
        }
        if self.thread.join().is_err() {
            log::error!("Timer thread panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::bounded;

    #[test]
    fn test_task_runs_after_delay() {
        let service = TimerService::new("test-timer").unwrap();
        let (tx, rx) = bounded(1);
        let scheduled_at = Instant::now();

        service.schedule(Duration::from_millis(50), move || {
            tx.send(Instant::now()).unwrap();
        });

        let fired_at = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(fired_at.duration_since(scheduled_at) >= Duration::from_millis(50));
        assert_eq!(service.pending(), 0);
    }

    #[test]
    fn test_cancelled_task_never_runs() {
        let service = TimerService::new("test-timer").unwrap();
        let (tx, rx) = bounded(1);

        let key = service.schedule(Duration::from_millis(50), move || {
            tx.send(()).unwrap();
        });
        assert!(service.cancel(key));
        assert!(!service.cancel(key));

        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn test_tasks_run_in_deadline_order() {
        let service = TimerService::new("test-timer").unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));
        let (tx, rx) = bounded(3);

        for (label, delay) in [("late", 120), ("early", 20), ("middle", 60)] {
            let order = Arc::clone(&order);
            let tx = tx.clone();
            service.schedule(Duration::from_millis(delay), move || {
                order.lock().push(label);
                tx.send(()).unwrap();
            });
        }

        for _ in 0..3 {
            rx.recv_timeout(Duration::from_secs(2)).unwrap();
        }
        assert_eq!(*order.lock(), vec!["early", "middle", "late"]);
    }

    #[test]
    fn test_drop_discards_pending_tasks() {
        let (tx, rx) = bounded(1);
        {
            let service = TimerService::new("test-timer").unwrap();
            service.schedule(Duration::from_millis(100), move || {
                let _ = tx.send(());
            });
        }
        assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
    }
}
