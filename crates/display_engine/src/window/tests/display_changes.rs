//! Display reconfiguration and device lost/reset cycles

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{OnceLock, Weak};
use std::time::{Duration, Instant};

use crossbeam::channel::{bounded, unbounded};

use super::*;
use crate::display::DisplayMode;
use crate::window::{
    DisplayChangeFlags, DisplayChangeOutcome, LifecyclePhase, PlatformEvent, WindowGeometry,
};

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOWED: DisplayMode = DisplayMode::new(0, 1280, 720, 0.0);
    const TIMEOUT: Duration = Duration::from_secs(2);

    #[test]
    fn test_topology_change_runs_one_cycle() {
        let log = new_log();
        let (system, _control) = setup(vec![television("TV")], fast_config());
        let a = Recorder::new("A", &log);
        system.register(&a);
        system.create_new_window("Player", false, &WINDOWED).unwrap();

        let outcome = system.check_display_changing(DisplayChangeFlags::SET_MODE);

        assert_eq!(outcome, DisplayChangeOutcome::ResetScheduled);
        assert_eq!(system.phase(), LifecyclePhase::LostAnnounced);
        assert_eq!(entries(&log), vec!["A lost"]);

        assert!(wait_until(TIMEOUT, || system.phase() == LifecyclePhase::Ready));
        assert_eq!(entries(&log), vec!["A lost", "A reset"]);
    }

    #[test]
    fn test_burst_of_changes_is_debounced() {
        let log = new_log();
        let (system, _control) = setup(vec![television("TV")], fast_config());
        let a = Recorder::new("A", &log);
        system.register(&a);

        for flags in [
            DisplayChangeFlags::BEGIN_CONFIGURATION,
            DisplayChangeFlags::SET_MODE,
            DisplayChangeFlags::SET_MODE | DisplayChangeFlags::DESKTOP_SHAPE_CHANGED,
        ] {
            assert_eq!(system.check_display_changing(flags), DisplayChangeOutcome::ResetScheduled);
        }

        assert!(wait_until(TIMEOUT, || system.phase() == LifecyclePhase::Ready));
        std::thread::sleep(SETTLE * 2);
        assert_eq!(entries(&log), vec!["A lost", "A reset"]);
    }

    #[test]
    fn test_announcements_follow_registration_order() {
        let log = new_log();
        let (system, _control) = setup(vec![television("TV")], fast_config());
        let a = Recorder::new("A", &log);
        let b = Recorder::new("B", &log);
        system.register(&a);
        system.register(&b);

        system.check_display_changing(DisplayChangeFlags::ADDED);

        assert!(wait_until(TIMEOUT, || entries(&log).len() == 4));
        assert_eq!(entries(&log), vec!["A lost", "B lost", "A reset", "B reset"]);
    }

    #[test]
    fn test_own_toggle_is_suppressed() {
        let log = new_log();
        let (system, _control) = setup(vec![television("TV")], fast_config());
        let a = Recorder::new("A", &log);
        system.register(&a);
        system.create_new_window("Player", false, &WINDOWED).unwrap();

        system.set_fullscreen_will_toggle(true);
        assert!(system.fullscreen_will_toggle());
        assert_eq!(
            system.check_display_changing(DisplayChangeFlags::SET_MODE),
            DisplayChangeOutcome::Suppressed
        );
        system.set_fullscreen_will_toggle(false);

        assert_eq!(system.phase(), LifecyclePhase::Ready);
        assert!(entries(&log).is_empty());
    }

    #[test]
    fn test_late_notification_after_full_screen_switch_is_suppressed() {
        let log = new_log();
        let config = fast_config().with_settle_delay(Duration::from_millis(500));
        let (system, _control) = setup(vec![television("TV")], config);
        let a = Recorder::new("A", &log);
        system.register(&a);
        system.create_new_window("Player", false, &WINDOWED).unwrap();

        assert!(system.set_full_screen(true, &DisplayMode::new(0, 1920, 1080, 50.0), false));
        assert_eq!(entries(&log), vec!["A lost"]);

        // The OS reports the switch after the toggle returned
        assert_eq!(
            system.check_display_changing(DisplayChangeFlags::SET_MODE),
            DisplayChangeOutcome::Suppressed
        );
        // A second notification is external
        assert_eq!(
            system.check_display_changing(DisplayChangeFlags::REMOVED),
            DisplayChangeOutcome::ResetScheduled
        );
        assert_eq!(entries(&log), vec!["A lost"]);
    }

    #[test]
    fn test_geometry_change_only_resizes() {
        let log = new_log();
        let (system, control) = setup(vec![television("TV")], fast_config());
        let a = Recorder::new("A", &log);
        system.register(&a);
        system.create_new_window("Player", false, &WINDOWED).unwrap();
        let window = system.window_state().window().unwrap();
        let surface = system.window_state().surface().unwrap();

        control.set_window_geometry(window, WindowGeometry::new(100, 50, 1024, 576));
        let outcome = system.check_display_changing(DisplayChangeFlags::MOVED);

        assert_eq!(outcome, DisplayChangeOutcome::Resized);
        assert_eq!(system.window_state().surface_size(), (1024, 576));
        assert_eq!(control.surface_size(surface), Some((1024, 576)));
        assert_eq!(system.phase(), LifecyclePhase::Ready);
        assert!(entries(&log).is_empty());
    }

    #[test]
    fn test_screen_change_intention_forces_a_cycle() {
        let log = new_log();
        let (system, _control) = setup(vec![television("TV")], fast_config());
        let a = Recorder::new("A", &log);
        system.register(&a);

        system.notify_screen_change_intention();
        assert_eq!(
            system.check_display_changing(DisplayChangeFlags::MOVED),
            DisplayChangeOutcome::ResetScheduled
        );
        assert_eq!(entries(&log), vec!["A lost"]);

        assert!(wait_until(TIMEOUT, || system.phase() == LifecyclePhase::Ready));
        // The intention applies to one notification only
        assert_eq!(
            system.check_display_changing(DisplayChangeFlags::MOVED),
            DisplayChangeOutcome::Resized
        );
    }

    #[test]
    fn test_empty_notification_is_ignored() {
        let (system, _control) = setup(vec![television("TV")], fast_config());
        assert_eq!(
            system.check_display_changing(DisplayChangeFlags::empty()),
            DisplayChangeOutcome::Ignored
        );
    }

    #[test]
    fn test_invalid_surface_is_recreated_on_reset() {
        let (system, control) = setup(vec![television("TV")], fast_config());
        system.create_new_window("Player", false, &WINDOWED).unwrap();
        let original = system.window_state().surface().unwrap();

        control.invalidate_surfaces();
        system.check_display_changing(DisplayChangeFlags::SET_MODE);
        assert!(wait_until(TIMEOUT, || system.phase() == LifecyclePhase::Ready));

        let state = system.window_state();
        let replacement = state.surface().unwrap();
        assert_ne!(replacement, original);
        assert_eq!(state.surface_size(), (1280, 720));
        assert_eq!(control.stats().surfaces_created, 2);
        assert_eq!(control.live_surfaces(), 1);
    }

    #[test]
    fn test_window_follows_removed_output() {
        let log = new_log();
        let (system, control) = setup(vec![television("TV"), television("Projector")], fast_config());
        let a = Recorder::new("A", &log);
        system.register(&a);
        system
            .create_new_window("Player", false, &DisplayMode::new(1, 1280, 720, 0.0))
            .unwrap();
        assert_eq!(system.window_state().output(), 1);

        control.remove_output(1);
        system.check_display_changing(DisplayChangeFlags::REMOVED);
        assert!(wait_until(TIMEOUT, || system.phase() == LifecyclePhase::Ready));

        assert_eq!(system.window_state().output(), 0);
        assert_eq!(system.connected_outputs(), vec!["TV"]);
        assert_eq!(entries(&log), vec!["A lost", "A reset"]);
    }

    #[test]
    fn test_refresh_change_holds_reset_back() {
        let log = new_log();
        let config = fast_config().with_refresh_change_delay(Duration::from_millis(300));
        let (system, _control) = setup(vec![television("TV")], config);
        let a = Recorder::new("A", &log);
        system.register(&a);
        system.create_new_window("Player", false, &WINDOWED).unwrap();

        let switched_at = Instant::now();
        assert!(system.switch_mode(1920, 1080, 50.0));

        std::thread::sleep(Duration::from_millis(150));
        assert_eq!(entries(&log), vec!["A lost"]);

        assert!(wait_until(TIMEOUT, || entries(&log).len() == 2));
        assert!(switched_at.elapsed() >= Duration::from_millis(300));
        assert_eq!(entries(&log), vec!["A lost", "A reset"]);
    }

    #[test]
    fn test_moving_to_another_output_runs_a_cycle() {
        let log = new_log();
        let (system, control) = setup(vec![television("TV"), television("Monitor")], fast_config());
        let a = Recorder::new("A", &log);
        system.register(&a);
        system.create_new_window("Player", false, &WINDOWED).unwrap();
        let window = system.window_state().window().unwrap();

        system.on_move(200, 100);
        assert_eq!(system.window_state().windowed_geometry().x, 200);
        assert!(entries(&log).is_empty());

        control.move_window_to_output(window, 1);
        system.on_move(2100, 100);
        assert_eq!(system.window_state().output(), 1);
        assert_eq!(entries(&log), vec!["A lost"]);
        assert!(wait_until(TIMEOUT, || entries(&log).len() == 2));
    }

    #[test]
    fn test_monitor_pumps_platform_events() {
        let log = new_log();
        let (system, _control) = setup(vec![television("TV")], fast_config());
        let a = Recorder::new("A", &log);
        system.register(&a);
        system.create_new_window("Player", false, &WINDOWED).unwrap();
        let monitor = system.screen_monitor();
        assert!(monitor.is_attached());

        let (tx, rx) = unbounded();
        tx.send(PlatformEvent::CursorEntered(true)).unwrap();
        tx.send(PlatformEvent::WindowResized { width: 960, height: 540 }).unwrap();
        tx.send(PlatformEvent::OutputConnected { name: "Projector".to_string() }).unwrap();
        tx.send(PlatformEvent::CloseRequested).unwrap();

        let status = monitor.pump(&rx);
        assert_eq!(status.processed, 4);
        assert!(status.close_requested);
        assert!(!status.disconnected);

        assert!(system.has_cursor());
        assert_eq!(system.window_state().surface_size(), (960, 540));
        assert_eq!(entries(&log), vec!["A lost"]);

        drop(tx);
        assert!(monitor.pump(&rx).disconnected);

        drop(system);
        assert!(!monitor.is_attached());
    }

    /// Reacts to its first reset with `action`, recording lost/reset like [`Recorder`]
    struct FirstResetHook {
        system: OnceLock<Weak<WindowSystem>>,
        done: AtomicBool,
        action: fn(&WindowSystem) -> DisplayChangeOutcome,
        outcome: Mutex<Option<DisplayChangeOutcome>>,
    }

    impl FirstResetHook {
        fn new(system: &Arc<WindowSystem>, action: fn(&WindowSystem) -> DisplayChangeOutcome) -> Arc<Self> {
            let hook = Arc::new(Self {
                system: OnceLock::new(),
                done: AtomicBool::new(false),
                action,
                outcome: Mutex::new(None),
            });
            let _ = hook.system.set(Arc::downgrade(system));
            hook
        }

        fn outcome(&self) -> Option<DisplayChangeOutcome> {
            *self.outcome.lock().unwrap()
        }
    }

    impl DisplayResource for FirstResetHook {
        fn on_lost_device(&self) {}

        fn on_reset_device(&self) {
            if self.done.swap(true, Ordering::SeqCst) {
                return;
            }
            if let Some(system) = self.system.get().and_then(Weak::upgrade) {
                let outcome = (self.action)(&system);
                *self.outcome.lock().unwrap() = Some(outcome);
            }
        }
    }

    #[test]
    fn test_switch_from_reset_callback_opens_next_cycle_after_fan_out() {
        let log = new_log();
        let (system, control) = setup(vec![television("TV")], fast_config());
        let system = Arc::new(system);
        let a = FirstResetHook::new(&system, |system| {
            if system.set_full_screen(true, &DisplayMode::new(0, 1920, 1080, 50.0), false) {
                DisplayChangeOutcome::ResetScheduled
            } else {
                DisplayChangeOutcome::Ignored
            }
        });
        let b = Recorder::new("B", &log);
        system.register(&a);
        system.register(&b);
        system.create_new_window("Player", false, &WINDOWED).unwrap();

        system.check_display_changing(DisplayChangeFlags::SET_MODE);

        assert!(wait_until(TIMEOUT, || entries(&log).len() == 4));
        assert_eq!(entries(&log), vec!["B lost", "B reset", "B lost", "B reset"]);
        assert_eq!(a.outcome(), Some(DisplayChangeOutcome::ResetScheduled));
        assert_eq!(control.current_mode(0), Some(DisplayMode::new(0, 1920, 1080, 50.0)));
        assert!(wait_until(TIMEOUT, || system.phase() == LifecyclePhase::Ready));

        system.unregister(&a);
        system.unregister(&b);
    }

    #[test]
    fn test_change_from_another_thread_during_reset_gets_its_own_cycle() {
        let log = new_log();
        let (system, _control) = setup(vec![television("TV")], fast_config());
        let system = Arc::new(system);
        // The event thread reports an unplug while the timer thread announces reset
        let a = FirstResetHook::new(&system, |system| {
            let monitor = system.screen_monitor();
            let (tx, rx) = bounded(1);
            std::thread::spawn(move || {
                let (events, receiver) = unbounded();
                let _ = events.send(PlatformEvent::DisplayReconfigured(DisplayChangeFlags::REMOVED));
                let _ = tx.send(monitor.pump(&receiver).processed);
            });
            match rx.recv_timeout(Duration::from_secs(1)) {
                Ok(1) => DisplayChangeOutcome::ResetScheduled,
                _ => DisplayChangeOutcome::Ignored,
            }
        });
        let b = Recorder::new("B", &log);
        system.register(&a);
        system.register(&b);

        system.check_display_changing(DisplayChangeFlags::SET_MODE);
        assert!(wait_until(TIMEOUT, || entries(&log).len() >= 2));
        assert_eq!(entries(&log)[..2], ["B lost", "B reset"]);
        assert_eq!(a.outcome(), Some(DisplayChangeOutcome::ResetScheduled));

        // The deferred cycle still waits for the settle delay before its reset
        assert!(wait_until(TIMEOUT, || entries(&log).len() == 4));
        assert_eq!(entries(&log), vec!["B lost", "B reset", "B lost", "B reset"]);
        assert!(wait_until(TIMEOUT, || system.phase() == LifecyclePhase::Ready));

        system.unregister(&a);
        system.unregister(&b);
    }

    #[test]
    fn test_rejected_switch_does_not_hide_external_change() {
        let log = new_log();
        let (system, control) = setup(vec![television("TV")], fast_config());
        let a = Recorder::new("A", &log);
        system.register(&a);
        system.create_new_window("Player", false, &WINDOWED).unwrap();
        for rate in [60.0, 59.94, 50.0, 23.976] {
            control.reject_mode(DisplayMode::new(0, 1920, 1080, rate));
        }

        assert!(!system.switch_mode(1920, 1080, 50.0));
        assert!(!system.fullscreen_will_toggle());
        assert_eq!(control.current_mode(0), Some(DisplayMode::new(0, 1920, 1080, 60.0)));

        assert_eq!(
            system.check_display_changing(DisplayChangeFlags::REMOVED),
            DisplayChangeOutcome::ResetScheduled
        );
        assert!(wait_until(TIMEOUT, || system.phase() == LifecyclePhase::Ready));
        assert_eq!(entries(&log), vec!["A lost", "A reset"]);
    }
}
