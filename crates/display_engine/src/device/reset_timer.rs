//! Device reset debounce timer
//!
//! Display reconfiguration arrives as bursts of OS notifications. Instead of
//! announcing a reset after each of them, the window system arms this timer
//! and only announces once the display has been quiet for the settle delay.
//!
//! States: `Idle -> Armed -> Fired -> Idle`. Arming an armed timer moves its
//! deadline; there is never more than one pending firing.

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::foundation::{TaskKey, TimerService};

/// Phase of a [`DeviceResetTimer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerPhase {
    /// Nothing pending
    Idle,
    /// Waiting for the deadline
    Armed,
    /// Reset callback running
    Fired,
}

#[derive(Debug)]
struct TimerState {
    phase: TimerPhase,
    deadline: Option<Instant>,
    // Bumped on every start/stop; a scheduled firing only counts if its
    // generation is still current.
    generation: u64,
    task: Option<TaskKey>,
}

type FireCallback = dyn Fn() + Send + Sync;

/// Single-shot, re-armable timer driving the reset announcement
pub struct DeviceResetTimer {
    state: Arc<Mutex<TimerState>>,
    service: Arc<TimerService>,
    on_fire: Arc<FireCallback>,
}

impl DeviceResetTimer {
    /// Create an idle timer that calls `on_fire` on the timer thread
    pub fn new<F>(service: Arc<TimerService>, on_fire: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            state: Arc::new(Mutex::new(TimerState {
                phase: TimerPhase::Idle,
                deadline: None,
                generation: 0,
                task: None,
            })),
            service,
            on_fire: Arc::new(on_fire),
        }
    }

    /// Arm the timer to fire after `delay`, replacing any pending deadline
    pub fn start(&self, delay: Duration) {
        let mut state = self.state.lock();
        if let Some(task) = state.task.take() {
            self.service.cancel(task);
        }

        state.generation = state.generation.wrapping_add(1);
        let generation = state.generation;
        let deadline = Instant::now() + delay;
        let rearmed = state.phase == TimerPhase::Armed;

        state.phase = TimerPhase::Armed;
        state.deadline = Some(deadline);

        let weak_state = Arc::downgrade(&self.state);
        let on_fire = Arc::clone(&self.on_fire);
        state.task = Some(self.service.schedule_at(deadline, move || {
            Self::fire(&weak_state, on_fire.as_ref(), generation);
        }));

        if rearmed {
            log::debug!("Device reset timer re-armed for {delay:?}");
        } else {
            log::debug!("Device reset timer armed for {delay:?}");
        }
    }

    /// Cancel a pending firing; harmless when idle or already fired
    pub fn stop(&self) {
        let mut state = self.state.lock();
        if state.phase != TimerPhase::Armed {
            return;
        }

        if let Some(task) = state.task.take() {
            self.service.cancel(task);
        }
        state.generation = state.generation.wrapping_add(1);
        state.phase = TimerPhase::Idle;
        state.deadline = None;
        log::debug!("Device reset timer stopped");
    }

    /// Current phase
    pub fn phase(&self) -> TimerPhase {
        self.state.lock().phase
    }

    /// Whether a firing is pending
    pub fn is_armed(&self) -> bool {
        self.phase() == TimerPhase::Armed
    }

    /// When the pending firing is due
    pub fn deadline(&self) -> Option<Instant> {
        self.state.lock().deadline
    }

    fn fire(state: &Weak<Mutex<TimerState>>, on_fire: &FireCallback, generation: u64) {
        let Some(state) = state.upgrade() else {
            return;
        };

        {
            let mut state = state.lock();
            if state.phase != TimerPhase::Armed || state.generation != generation {
                // Stopped or re-armed after this firing was dequeued
                return;
            }
            state.phase = TimerPhase::Fired;
            state.deadline = None;
            state.task = None;
        }

        log::debug!("Device reset timer fired");
        on_fire();

        let mut state = state.lock();
        if state.phase == TimerPhase::Fired && state.generation == generation {
            state.phase = TimerPhase::Idle;
        }
    }
}

impl Drop for DeviceResetTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::{unbounded, Receiver};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn timer() -> (DeviceResetTimer, Receiver<Instant>, Arc<AtomicUsize>) {
        let service = Arc::new(TimerService::new("reset-timer-test").unwrap());
        let (tx, rx) = unbounded();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let timer = DeviceResetTimer::new(service, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            let _ = tx.send(Instant::now());
        });
        (timer, rx, fired)
    }

    #[test]
    fn test_fires_once_and_returns_to_idle() {
        let (timer, rx, fired) = timer();
        assert_eq!(timer.phase(), TimerPhase::Idle);

        timer.start(Duration::from_millis(30));
        assert!(timer.is_armed());
        assert!(timer.deadline().is_some());

        rx.recv_timeout(Duration::from_secs(2)).unwrap();
        thread::sleep(Duration::from_millis(50));

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(timer.phase(), TimerPhase::Idle);
        assert_eq!(timer.deadline(), None);
    }

    #[test]
    fn test_rearm_moves_deadline_instead_of_stacking() {
        let (timer, rx, fired) = timer();

        timer.start(Duration::from_millis(300));
        thread::sleep(Duration::from_millis(150));
        let second_start = Instant::now();
        timer.start(Duration::from_millis(300));

        let fired_at = rx.recv_timeout(Duration::from_secs(3)).unwrap();
        assert!(fired_at.duration_since(second_start) >= Duration::from_millis(300));

        assert!(rx.recv_timeout(Duration::from_millis(400)).is_err());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stop_cancels_pending_firing() {
        let (timer, rx, fired) = timer();

        timer.start(Duration::from_millis(50));
        timer.stop();
        assert_eq!(timer.phase(), TimerPhase::Idle);

        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_stop_when_idle_is_noop() {
        let (timer, _rx, _fired) = timer();
        timer.stop();
        timer.stop();
        assert_eq!(timer.phase(), TimerPhase::Idle);
    }

    #[test]
    fn test_stale_firing_is_ignored() {
        let (timer, rx, fired) = timer();

        timer.start(Duration::from_millis(40));
        let stale_generation = timer.state.lock().generation;
        timer.stop();

        // Simulates a firing dequeued just before stop() ran
        DeviceResetTimer::fire(&Arc::downgrade(&timer.state), timer.on_fire.as_ref(), stale_generation);

        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_callback_may_rearm() {
        let service = Arc::new(TimerService::new("reset-timer-test").unwrap());
        let (tx, rx) = unbounded();
        let slot: Arc<Mutex<Option<Weak<DeviceResetTimer>>>> = Arc::new(Mutex::new(None));
        let rearms = Arc::new(AtomicUsize::new(0));

        let timer = {
            let slot = Arc::clone(&slot);
            let rearms = Arc::clone(&rearms);
            Arc::new(DeviceResetTimer::new(service, move || {
                let _ = tx.send(());
                if rearms.fetch_add(1, Ordering::SeqCst) == 0 {
                    if let Some(timer) = slot.lock().as_ref().and_then(Weak::upgrade) {
                        timer.start(Duration::from_millis(20));
                    }
                }
            }))
        };
        *slot.lock() = Some(Arc::downgrade(&timer));

        timer.start(Duration::from_millis(20));
        rx.recv_timeout(Duration::from_secs(2)).unwrap();
        rx.recv_timeout(Duration::from_secs(2)).unwrap();
        thread::sleep(Duration::from_millis(50));

        assert_eq!(rearms.load(Ordering::SeqCst), 2);
        assert_eq!(timer.phase(), TimerPhase::Idle);
    }
}
