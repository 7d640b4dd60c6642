//! Scenario tests for the window system over the headless backend

mod display_changes;

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::config::DisplayConfig;
use crate::device::DisplayResource;
use crate::window::{HeadlessBackend, HeadlessControl, HeadlessOutput, WindowSystem};

pub(super) const SETTLE: Duration = Duration::from_millis(50);

/// Records lost/reset callbacks into a shared log
pub(super) struct Recorder {
    name: &'static str,
    log: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    pub(super) fn new(name: &'static str, log: &Arc<Mutex<Vec<String>>>) -> Arc<Self> {
        Arc::new(Self {
            name,
            log: Arc::clone(log),
        })
    }
}

impl DisplayResource for Recorder {
    fn on_lost_device(&self) {
        self.log.lock().unwrap().push(format!("{} lost", self.name));
    }

    fn on_reset_device(&self) {
        self.log.lock().unwrap().push(format!("{} reset", self.name));
    }
}

pub(super) fn new_log() -> Arc<Mutex<Vec<String>>> {
    Arc::new(Mutex::new(Vec::new()))
}

pub(super) fn entries(log: &Arc<Mutex<Vec<String>>>) -> Vec<String> {
    log.lock().unwrap().clone()
}

pub(super) fn television(name: &str) -> HeadlessOutput {
    HeadlessOutput::full_hd(name)
}

pub(super) fn fast_config() -> DisplayConfig {
    DisplayConfig::new().with_settle_delay(SETTLE)
}

pub(super) fn setup(outputs: Vec<HeadlessOutput>, config: DisplayConfig) -> (WindowSystem, HeadlessControl) {
    let _ = env_logger::builder().is_test(true).try_init();
    let backend = HeadlessBackend::new(outputs);
    let control = backend.control();
    let system = WindowSystem::new(backend, config).unwrap();
    (system, control)
}

/// Poll `condition` until it holds or `timeout` passes
pub(super) fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}
