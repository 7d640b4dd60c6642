//! Window lifecycle manager
//!
//! [`WindowSystem`] owns the native window and its graphics surface and
//! coordinates full-screen transitions, mode switches and display
//! reconfiguration with the resources that use the graphics device.
//!
//! # Device cycles
//! Every change that invalidates the device runs one cycle:
//! `Ready -> ChangeDetected -> LostAnnounced -> ResetAnnounced -> Ready`.
//! Lost is announced as soon as a change is detected. Reset is announced by
//! the device reset timer once the display has been quiet for the settle
//! delay. Changes arriving while a cycle is open only push the reset back.
//!
//! # Locking
//! Window state lives behind one mutex (`core`), the cycle phase behind a
//! second one taken after it. Lost and reset announcements never run while
//! `core` is held, so resources may call back into the window system.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard};

use super::backend::{BackendResult, DisplayBackend, WindowDescriptor, WindowGeometry, WindowId};
use super::monitor::{
    DisplayChangeFlags, DisplayChangeKind, DisplayChangeOutcome, ScreenChangeMonitor, ToggleGuard,
};
use super::state::WindowState;
use crate::config::{DisplayConfig, WindowConfig};
use crate::device::{DeviceResetTimer, DisplayResource, ResourceRegistry, TimerPhase};
use crate::display::{DisplayMode, DisplayModes, ModeSwitcher, ResolutionCatalog, REFRESH_TOLERANCE_HZ};
use crate::error::DisplayError;
use crate::foundation::TimerService;

/// Where the window system is in a device lost/reset cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    /// Device usable, no cycle open
    Ready,
    /// A change was detected and lost is being announced
    ChangeDetected,
    /// Lost announced, waiting for the display to settle
    LostAnnounced,
    /// Reset being announced
    ResetAnnounced,
}

/// Owns the application window and drives device lost/reset cycles
///
/// All methods take `&self`; the system can be shared between the
/// application, the event pump and the device reset timer. Dropping it shuts
/// it down.
pub struct WindowSystem {
    shared: Arc<Shared>,
}

impl WindowSystem {
    /// Create a window system over `backend`
    ///
    /// Reads the output catalog and starts the device reset timer thread. No
    /// window is created yet.
    pub fn new<B>(backend: B, config: DisplayConfig) -> Result<Self, DisplayError>
    where
        B: DisplayBackend + 'static,
    {
        config.validate().map_err(DisplayError::Config)?;

        let backend: Box<dyn DisplayBackend> = Box::new(backend);
        let mut catalog = ResolutionCatalog::new();
        catalog.refresh(backend.as_ref());

        let service = Arc::new(TimerService::new("display-reset")?);

        let shared = Arc::new_cyclic(|weak: &Weak<Shared>| {
            let weak = weak.clone();
            let reset_timer = DeviceResetTimer::new(service, move || {
                if let Some(shared) = weak.upgrade() {
                    shared.handle_reset_device();
                }
            });

            Shared {
                core: Mutex::new(Core {
                    backend,
                    catalog,
                    window: WindowState::default(),
                    switched_outputs: Vec::new(),
                    reset_not_before: None,
                }),
                resources: ResourceRegistry::new(),
                reset_timer,
                toggle: ToggleGuard::new(config.settle_delay()),
                transition: AtomicBool::new(false),
                screen_change_intended: AtomicBool::new(false),
                change_during_reset: AtomicBool::new(false),
                phase: Mutex::new(LifecyclePhase::Ready),
                config,
            }
        });

        log::info!("Window system initialized");
        Ok(Self { shared })
    }

    /// Configuration the system was created with
    pub fn config(&self) -> &DisplayConfig {
        &self.shared.config
    }

    /// Create the window and its graphics surface
    ///
    /// An existing window is destroyed first. On failure no window exists
    /// afterwards. When `fullscreen` is requested but the switch fails, the
    /// window stays windowed and creation still succeeds.
    pub fn create_new_window(
        &self,
        name: &str,
        fullscreen: bool,
        resolution: &DisplayMode,
    ) -> Result<(), DisplayError> {
        self.shared
            .lock_core()
            .create_window(name, fullscreen, resolution, &self.shared.config.window)?;

        if fullscreen
            && !self.set_full_screen(true, resolution, self.shared.config.blank_other_displays)
        {
            log::warn!("Window '{name}' stays windowed: full-screen switch failed");
        }
        Ok(())
    }

    /// Destroy the window and its surface
    ///
    /// Returns whether a window existed. Leaving full-screen this way restores
    /// the desktop mode of the window's output.
    pub fn destroy_window(&self) -> bool {
        self.shared.lock_core().destroy_window()
    }

    /// Resize the windowed window, optionally moving it
    ///
    /// In full-screen only the windowed geometry used when leaving
    /// full-screen is updated. On failure the previous geometry is kept.
    pub fn resize_window(&self, width: u32, height: u32, left: Option<i32>, top: Option<i32>) -> bool {
        self.shared.lock_core().resize_window(width, height, left, top)
    }

    /// Enter or leave full-screen presentation
    ///
    /// Entering uses the catalog mode closest to `resolution` on its output
    /// and switches the output when it runs another mode; a switch announces
    /// lost device before it happens and schedules the reset. Leaving
    /// restores the desktop mode and the last windowed geometry.
    ///
    /// A request arriving while another transition runs (for example from a
    /// resource callback) is coalesced and reports success.
    pub fn set_full_screen(&self, fullscreen: bool, resolution: &DisplayMode, blank_other_displays: bool) -> bool {
        let Some(_transition) = TransitionGuard::try_begin(&self.shared.transition) else {
            log::debug!("Full-screen transition already running, coalescing request");
            return true;
        };

        self.shared.toggle.set(true);
        let done = if fullscreen {
            self.shared.enter_full_screen(resolution, blank_other_displays)
        } else {
            self.shared.leave_full_screen()
        };
        self.shared.toggle.set(false);
        done
    }

    /// Switch the window's output to `width`x`height` at the nearest refresh rate
    ///
    /// Fails without side effects when the output has no mode of that size.
    pub fn switch_mode(&self, width: u32, height: u32, refresh_rate_hz: f64) -> bool {
        let Some(_transition) = TransitionGuard::try_begin(&self.shared.transition) else {
            log::debug!("Mode switch requested during a transition, coalescing request");
            return true;
        };
        self.shared.switch_mode(width, height, refresh_rate_hz)
    }

    /// Re-read outputs and modes; returns whether any output is connected
    pub fn update_resolutions(&self) -> bool {
        let mut core = self.shared.lock_core();
        core.refresh_catalog();
        core.sync_window_output();
        core.catalog.output_count() > 0
    }

    /// Modes supported by `output`
    pub fn resolutions(&self, output: usize) -> DisplayModes {
        let mut core = self.shared.lock_core();
        let Core { backend, catalog, .. } = &mut *core;
        catalog.enumerate(backend.as_ref(), output)
    }

    /// Mode `output` runs now
    pub fn current_mode(&self, output: usize) -> Option<DisplayMode> {
        self.shared.lock_core().current_mode(output)
    }

    /// Mode `output` ran when the catalog was last refreshed
    pub fn desktop_mode(&self, output: usize) -> Option<DisplayMode> {
        self.shared.lock_core().catalog.desktop_mode(output)
    }

    /// Names of the connected outputs
    pub fn connected_outputs(&self) -> Vec<String> {
        self.shared.lock_core().catalog.connected_outputs()
    }

    /// Snapshot of the window state
    pub fn window_state(&self) -> WindowState {
        self.shared.lock_core().window.clone()
    }

    /// Current device cycle phase
    pub fn phase(&self) -> LifecyclePhase {
        *self.shared.phase.lock()
    }

    /// Phase of the device reset timer
    pub fn reset_timer_phase(&self) -> TimerPhase {
        self.shared.reset_timer.phase()
    }

    /// Whether a full-screen transition or mode switch is running
    pub fn is_transition_in_progress(&self) -> bool {
        self.shared.transition.load(Ordering::Acquire)
    }

    /// Subscribe a resource to device lost/reset announcements
    pub fn register<R: DisplayResource + 'static>(&self, resource: &Arc<R>) {
        self.shared.resources.register(resource);
    }

    /// Unsubscribe a resource; waits for a running announcement to finish
    pub fn unregister<R: DisplayResource + ?Sized>(&self, resource: &Arc<R>) {
        self.shared.resources.unregister(resource);
    }

    /// Handle a display reconfiguration notification
    pub fn check_display_changing(&self, flags: DisplayChangeFlags) -> DisplayChangeOutcome {
        self.shared.check_display_changing(flags)
    }

    /// Mark an own full-screen toggle as starting or finished
    pub fn set_fullscreen_will_toggle(&self, toggling: bool) {
        self.shared.toggle.set(toggling);
    }

    /// Whether an own full-screen toggle is in progress
    pub fn fullscreen_will_toggle(&self) -> bool {
        self.shared.toggle.is_set()
    }

    /// Treat the next display change as a topology change
    ///
    /// Used when the application is about to move the window to another
    /// screen and the OS may only report a move.
    pub fn notify_screen_change_intention(&self) {
        self.shared.screen_change_intended.store(true, Ordering::Release);
    }

    /// The window moved to `x`, `y`
    pub fn on_move(&self, x: i32, y: i32) {
        self.shared.on_move(x, y);
    }

    /// The window was resized from outside
    pub fn on_resize(&self, width: u32, height: u32) {
        self.shared.on_resize(width, height);
    }

    /// The pointer entered the window
    pub fn signal_mouse_entered(&self) {
        self.shared.set_cursor_inside(true);
    }

    /// The pointer left the window
    pub fn signal_mouse_exited(&self) {
        self.shared.set_cursor_inside(false);
    }

    /// Whether the pointer is inside the window
    pub fn has_cursor(&self) -> bool {
        self.shared.lock_core().window.cursor_visible
    }

    /// Iconify the window
    pub fn minimize(&self) -> bool {
        let mut core = self.shared.lock_core();
        let done = core.window_op("minimize", |backend, window| backend.minimize(window));
        if done {
            core.window.minimized = true;
        }
        done
    }

    /// Bring the window back from iconified or hidden
    pub fn restore(&self) -> bool {
        let mut core = self.shared.lock_core();
        let done = core.window_op("restore", |backend, window| backend.restore(window));
        if done {
            core.window.minimized = false;
            core.window.visible = true;
        }
        done
    }

    /// Hide the window
    pub fn hide(&self) -> bool {
        let mut core = self.shared.lock_core();
        let done = core.window_op("hide", |backend, window| backend.hide(window));
        if done {
            core.window.visible = false;
        }
        done
    }

    /// Show the window, optionally raising it above other windows
    pub fn show(&self, raise: bool) -> bool {
        let mut core = self.shared.lock_core();
        let done = core.window_op("show", |backend, window| backend.show(window, raise));
        if done {
            core.window.visible = true;
        }
        done
    }

    /// Monitor feeding platform events into this system
    pub fn screen_monitor(&self) -> ScreenChangeMonitor {
        ScreenChangeMonitor::new(Arc::downgrade(&self.shared))
    }

    /// Stop the reset timer, destroy the window and restore desktop modes
    ///
    /// Safe to call more than once.
    pub fn shutdown(&self) {
        self.shared.reset_timer.stop();
        let mut core = self.shared.lock_core();
        core.destroy_window();
        core.restore_desktop_modes();
        log::info!("Window system shut down");
    }
}

impl Drop for WindowSystem {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Marks a full-screen transition or mode switch as running
struct TransitionGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> TransitionGuard<'a> {
    fn try_begin(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for TransitionGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

pub(crate) struct Shared {
    core: Mutex<Core>,
    resources: ResourceRegistry,
    reset_timer: DeviceResetTimer,
    toggle: ToggleGuard,
    transition: AtomicBool,
    screen_change_intended: AtomicBool,
    // Set under the phase lock when a change arrives while reset is announced
    change_during_reset: AtomicBool,
    phase: Mutex<LifecyclePhase>,
    config: DisplayConfig,
}

impl Shared {
    fn lock_core(&self) -> MutexGuard<'_, Core> {
        self.core.lock()
    }

    fn settle_delay(&self) -> Duration {
        self.config.settle_delay()
    }

    /// Open a device cycle by announcing lost device
    ///
    /// Does nothing when a cycle is already open. A change arriving while
    /// reset is being announced opens the next cycle once every resource has
    /// seen that reset.
    fn enter_lost(&self, reason: &str) {
        {
            let mut phase = self.phase.lock();
            match *phase {
                LifecyclePhase::Ready => {
                    *phase = LifecyclePhase::ChangeDetected;
                }
                LifecyclePhase::ResetAnnounced => {
                    log::debug!("{reason}: reset still being announced, deferring lost device");
                    self.change_during_reset.store(true, Ordering::Release);
                    return;
                }
                LifecyclePhase::ChangeDetected | LifecyclePhase::LostAnnounced => {
                    log::debug!("{reason}: device cycle already open");
                    return;
                }
            }
        }

        log::info!("{reason}: announcing lost device");
        self.resources.announce_lost_device();
        *self.phase.lock() = LifecyclePhase::LostAnnounced;
    }

    /// Announce lost if needed and (re)arm the reset timer
    fn begin_device_cycle(&self, reason: &str) {
        self.enter_lost(reason);
        self.reset_timer.start(self.settle_delay());
    }

    /// Reset timer callback
    fn handle_reset_device(&self) {
        let hold_back = self
            .lock_core()
            .reset_not_before
            .and_then(|not_before| not_before.checked_duration_since(Instant::now()));

        {
            let mut phase = self.phase.lock();
            let current = *phase;
            match current {
                LifecyclePhase::LostAnnounced => {}
                LifecyclePhase::ChangeDetected => {
                    drop(phase);
                    log::debug!("Lost device still being announced, postponing reset");
                    self.reset_timer.start(self.settle_delay());
                    return;
                }
                LifecyclePhase::Ready | LifecyclePhase::ResetAnnounced => {
                    log::debug!("No lost device outstanding, ignoring reset");
                    return;
                }
            }

            if let Some(remaining) = hold_back {
                drop(phase);
                log::info!("Holding device reset back {remaining:?} after a refresh rate change");
                self.reset_timer.start(remaining);
                return;
            }
            *phase = LifecyclePhase::ResetAnnounced;
        }

        {
            let mut core = self.lock_core();
            core.reset_not_before = None;
            core.refresh_catalog();
            core.sync_window_output();
            if let Err(err) = core.revalidate_surface() {
                log::error!("Graphics surface could not be recreated: {err}");
            }
        }

        self.resources.announce_reset_device();

        let deferred = {
            let mut phase = self.phase.lock();
            if self.change_during_reset.swap(false, Ordering::AcqRel) {
                *phase = LifecyclePhase::ChangeDetected;
                true
            } else {
                *phase = LifecyclePhase::Ready;
                false
            }
        };
        log::info!("Device reset complete");

        if deferred {
            log::info!("Display changed during the reset: announcing lost device");
            self.resources.announce_lost_device();
            *self.phase.lock() = LifecyclePhase::LostAnnounced;
            self.reset_timer.start(self.settle_delay());
        }
    }

    pub(crate) fn check_display_changing(&self, flags: DisplayChangeFlags) -> DisplayChangeOutcome {
        let kind = flags.kind();
        if kind == DisplayChangeKind::None {
            return DisplayChangeOutcome::Ignored;
        }

        if self.toggle.should_suppress() {
            log::debug!("Display change {flags:?} caused by own full-screen toggle");
            if !self.transition.load(Ordering::Acquire) {
                self.lock_core().sync_geometry();
            }
            return DisplayChangeOutcome::Suppressed;
        }

        let intended = self.screen_change_intended.swap(false, Ordering::AcqRel);
        if kind == DisplayChangeKind::GeometryOnly && !intended {
            log::debug!("Display geometry changed ({flags:?}), resizing surface");
            self.lock_core().sync_geometry();
            return DisplayChangeOutcome::Resized;
        }

        self.begin_device_cycle(&format!("Display configuration changed ({flags:?})"));
        DisplayChangeOutcome::ResetScheduled
    }

    pub(crate) fn on_move(&self, x: i32, y: i32) {
        let changed_output = {
            let mut core = self.lock_core();
            if !core.window.is_created() {
                return;
            }
            if !core.window.fullscreen {
                core.window.windowed.x = x;
                core.window.windowed.y = y;
            }
            core.sync_window_output()
        };

        if changed_output {
            self.begin_device_cycle("Window changed screen");
        }
    }

    pub(crate) fn on_resize(&self, width: u32, height: u32) {
        let mut core = self.lock_core();
        if !core.window.is_created() || core.window.fullscreen {
            return;
        }
        core.window.windowed.width = width;
        core.window.windowed.height = height;
        if let Err(err) = core.resize_surface(width, height) {
            log::warn!("Surface resize to {width}x{height} failed: {err}");
        }
    }

    pub(crate) fn set_cursor_inside(&self, inside: bool) {
        let mut core = self.lock_core();
        if core.window.cursor_visible != inside {
            log::trace!("Cursor {} the window", if inside { "entered" } else { "left" });
        }
        core.window.cursor_visible = inside;
    }

    fn enter_full_screen(&self, request: &DisplayMode, blank_others: bool) -> bool {
        let (window, target, needs_switch) = {
            let mut core = self.lock_core();
            let Some(window) = core.window.window else {
                log::warn!("Cannot enter full-screen without a window");
                return false;
            };

            let output = if core.catalog.contains(request.output) {
                request.output
            } else {
                log::warn!("Output {} is not connected, using output {}", request.output, core.window.output);
                core.window.output
            };
            let request = request.on_output(output);
            let Some(target) = core.switcher().resolve(&request) else {
                log::warn!("No display mode matches {request} on output {output}");
                return false;
            };
            let needs_switch = core
                .current_mode(output)
                .map_or(true, |current| !current.matches(&target));
            (window, target, needs_switch)
        };

        if needs_switch {
            self.enter_lost("Full-screen mode switch");
        }
        let done = self.lock_core().enter_full_screen(
            window,
            &target,
            needs_switch,
            blank_others,
            self.config.refresh_change_delay(),
        );
        if needs_switch {
            self.reset_timer.start(self.settle_delay());
        }
        done
    }

    fn leave_full_screen(&self) -> bool {
        let (window, restore) = {
            let core = self.lock_core();
            if !core.window.fullscreen {
                log::debug!("Window is already windowed");
                return true;
            }
            let Some(window) = core.window.window else {
                return false;
            };

            let output = core.window.output;
            let restore = match (core.catalog.desktop_mode(output), core.current_mode(output)) {
                (Some(desktop), Some(current)) if !desktop.matches(&current) => Some(desktop),
                _ => None,
            };
            (window, restore)
        };

        if restore.is_some() {
            self.enter_lost("Restoring desktop mode");
        }
        let done = self.lock_core().leave_full_screen(window, restore.as_ref());
        if restore.is_some() {
            self.reset_timer.start(self.settle_delay());
        }
        done
    }

    fn switch_mode(&self, width: u32, height: u32, refresh_rate_hz: f64) -> bool {
        let output = {
            let mut core = self.lock_core();
            let output = core.window.output;
            let Some(best) = core.switcher().candidates(output, width, height, refresh_rate_hz).first().copied() else {
                log::warn!("Output {output} has no {width}x{height} mode");
                return false;
            };
            if core.current_mode(output).is_some_and(|current| current.matches(&best)) {
                log::debug!("Output {output} already runs {best}");
                return true;
            }
            output
        };

        self.toggle.set(true);
        self.enter_lost("Display mode switch");
        let switched = self.lock_core().switch_mode(
            output,
            width,
            height,
            refresh_rate_hz,
            self.config.refresh_change_delay(),
        );
        if switched {
            self.toggle.set(false);
        } else {
            // Nothing changed on the display, so no notification will follow
            self.toggle.cancel();
        }
        self.reset_timer.start(self.settle_delay());
        switched
    }
}

struct Core {
    backend: Box<dyn DisplayBackend>,
    catalog: ResolutionCatalog,
    window: WindowState,
    // Outputs left in a non-desktop mode, restored at shutdown
    switched_outputs: Vec<usize>,
    reset_not_before: Option<Instant>,
}

impl Core {
    fn switcher(&mut self) -> ModeSwitcher<'_> {
        ModeSwitcher::new(self.backend.as_mut(), &mut self.catalog)
    }

    fn current_mode(&self, output: usize) -> Option<DisplayMode> {
        self.catalog.current_mode(self.backend.as_ref(), output)
    }

    /// Re-read the catalog, keeping desktop modes of outputs we switched
    ///
    /// Outputs are matched by name since indices shift when outputs come and
    /// go.
    fn refresh_catalog(&mut self) {
        let remembered: Vec<(String, DisplayMode)> = self
            .switched_outputs
            .iter()
            .filter_map(|output| {
                let name = self.catalog.output_name(*output)?.to_string();
                Some((name, self.catalog.desktop_mode(*output)?))
            })
            .collect();

        self.catalog.refresh(self.backend.as_ref());

        self.switched_outputs.clear();
        for (name, desktop) in remembered {
            if let Some(output) = self.catalog.output_index(&name) {
                self.catalog.set_desktop_mode(output, desktop);
                self.switched_outputs.push(output);
            } else {
                log::info!("Switched output '{name}' is gone");
            }
        }
    }

    fn create_window(
        &mut self,
        name: &str,
        fullscreen: bool,
        resolution: &DisplayMode,
        defaults: &WindowConfig,
    ) -> Result<(), DisplayError> {
        if self.window.is_created() {
            log::info!("Replacing window '{}'", self.window.name);
            self.destroy_window();
        }

        let output = if self.catalog.contains(resolution.output) {
            resolution.output
        } else {
            0
        };
        // A full-screen window opens at the configured windowed size so that
        // leaving full-screen has somewhere sensible to go.
        let (width, height) = if fullscreen || resolution.width == 0 || resolution.height == 0 {
            (defaults.width, defaults.height)
        } else {
            (resolution.width, resolution.height)
        };

        let descriptor = WindowDescriptor {
            title: name.to_string(),
            geometry: WindowGeometry::new(0, 0, width, height),
            output,
        };
        let window = self
            .backend
            .create_window(&descriptor)
            .map_err(DisplayError::WindowCreation)?;

        let surface = match self.backend.create_surface(window) {
            Ok(surface) => surface,
            Err(err) => {
                if let Err(destroy_err) = self.backend.destroy_window(window) {
                    log::warn!("Could not destroy half-created {window}: {destroy_err}");
                }
                return Err(DisplayError::SurfaceCreation(err));
            }
        };

        let geometry = self.backend.window_geometry(window).unwrap_or(descriptor.geometry);
        let refresh_rate_hz = self.current_mode(output).map_or(0.0, |mode| mode.refresh_rate_hz);
        self.window = WindowState {
            name: name.to_string(),
            window: Some(window),
            surface: Some(surface),
            output,
            refresh_rate_hz,
            visible: true,
            windowed: geometry,
            surface_size: geometry.size(),
            ..WindowState::default()
        };

        log::info!(
            "Created window '{name}' ({window}, {surface}) {}x{} on output {output}",
            geometry.width,
            geometry.height
        );
        Ok(())
    }

    fn destroy_window(&mut self) -> bool {
        let Some(window) = self.window.window else {
            log::debug!("No window to destroy");
            return false;
        };

        if self.window.fullscreen {
            if let Err(err) = self.backend.set_fullscreen(window, None) {
                log::warn!("Could not leave full-screen before destroying {window}: {err}");
            }
            self.restore_desktop_mode(self.window.output);
            self.unblank_outputs();
        }

        if let Some(surface) = self.window.surface {
            if let Err(err) = self.backend.destroy_surface(surface) {
                log::warn!("Could not destroy {surface}: {err}");
            }
        }
        if let Err(err) = self.backend.destroy_window(window) {
            log::warn!("Could not destroy {window}: {err}");
        }

        self.window.clear_native();
        log::info!("Window '{}' destroyed", self.window.name);
        true
    }

    fn resize_window(&mut self, width: u32, height: u32, left: Option<i32>, top: Option<i32>) -> bool {
        let Some(window) = self.window.window else {
            log::warn!("Cannot resize: no window");
            return false;
        };
        if width == 0 || height == 0 {
            log::warn!("Ignoring resize to {width}x{height}");
            return false;
        }

        if self.window.fullscreen {
            let windowed = &mut self.window.windowed;
            *windowed = WindowGeometry::new(left.unwrap_or(windowed.x), top.unwrap_or(windowed.y), width, height);
            log::debug!("Full-screen: {width}x{height} kept for the windowed window");
            return true;
        }

        let previous = self.backend.window_geometry(window).unwrap_or(self.window.windowed);
        let geometry = WindowGeometry::new(left.unwrap_or(previous.x), top.unwrap_or(previous.y), width, height);
        if let Err(err) = self.backend.set_window_geometry(window, geometry) {
            log::warn!("Could not resize {window} to {width}x{height}: {err}");
            return false;
        }

        if let Err(err) = self.resize_surface(width, height) {
            log::warn!("Surface resize to {width}x{height} failed, restoring window geometry: {err}");
            if let Err(err) = self.backend.set_window_geometry(window, previous) {
                log::error!("Could not restore geometry of {window}: {err}");
            }
            return false;
        }

        self.window.windowed = geometry;
        true
    }

    fn enter_full_screen(
        &mut self,
        window: WindowId,
        target: &DisplayMode,
        switch: bool,
        blank_others: bool,
        refresh_change_delay: Option<Duration>,
    ) -> bool {
        if self.window.window != Some(window) {
            log::warn!("Window replaced during full-screen transition");
            return false;
        }

        if !self.window.fullscreen {
            if let Some(geometry) = self.backend.window_geometry(window) {
                self.window.windowed = geometry;
            }
        }

        let output = target.output;
        let previous = self.current_mode(output);
        let applied = if switch {
            match self.switcher().apply(target) {
                Ok(mode) => mode,
                Err(err) => {
                    log::warn!("Could not switch output {output} to {target}: {err}");
                    return false;
                }
            }
        } else {
            *target
        };

        if let Err(err) = self.backend.set_fullscreen(window, Some(&applied)) {
            log::warn!("Full-screen presentation on output {output} failed: {err}");
            if switch {
                if let Some(previous) = previous {
                    if let Err(err) = self.switcher().apply(&previous) {
                        log::error!("Could not restore {previous} on output {output}: {err}");
                    }
                }
            }
            return false;
        }

        if switch {
            self.record_switch(previous, &applied, refresh_change_delay);
        }

        if blank_others {
            match self.backend.set_outputs_blanked(output, true) {
                Ok(()) => self.window.blanked_outputs = true,
                Err(err) => log::warn!("Could not blank other outputs: {err}"),
            }
        }

        if let Err(err) = self.resize_surface(applied.width, applied.height) {
            log::warn!("Surface resize to {}x{} failed: {err}", applied.width, applied.height);
        }

        self.window.fullscreen = true;
        self.window.output = output;
        self.window.refresh_rate_hz = applied.refresh_rate_hz;
        log::info!("Entered full-screen {applied} on output {output}");
        true
    }

    fn leave_full_screen(&mut self, window: WindowId, restore: Option<&DisplayMode>) -> bool {
        if self.window.window != Some(window) {
            log::warn!("Window replaced during full-screen transition");
            return false;
        }

        if let Err(err) = self.backend.set_fullscreen(window, None) {
            log::warn!("Could not leave full-screen: {err}");
            return false;
        }

        if let Some(desktop) = restore {
            self.restore_desktop_mode(desktop.output);
        }
        self.unblank_outputs();

        let windowed = self.window.windowed;
        if let Err(err) = self.backend.set_window_geometry(window, windowed) {
            log::warn!("Could not restore windowed geometry: {err}");
        }
        if let Err(err) = self.resize_surface(windowed.width, windowed.height) {
            log::warn!("Surface resize to {}x{} failed: {err}", windowed.width, windowed.height);
        }

        self.window.fullscreen = false;
        if let Some(mode) = self.current_mode(self.window.output) {
            self.window.refresh_rate_hz = mode.refresh_rate_hz;
        }
        log::info!("Left full-screen, window restored to {}x{}", windowed.width, windowed.height);
        true
    }

    fn switch_mode(
        &mut self,
        output: usize,
        width: u32,
        height: u32,
        refresh_rate_hz: f64,
        refresh_change_delay: Option<Duration>,
    ) -> bool {
        let previous = self.current_mode(output);
        let applied = match self.switcher().switch(output, width, height, refresh_rate_hz) {
            Ok(applied) => applied,
            Err(err) => {
                log::warn!("Switching output {output} to {width}x{height}@{refresh_rate_hz:.2}Hz failed: {err}");
                return false;
            }
        };

        self.record_switch(previous, &applied, refresh_change_delay);

        if output == self.window.output {
            self.window.refresh_rate_hz = applied.refresh_rate_hz;
            if let (true, Some(window)) = (self.window.fullscreen, self.window.window) {
                if let Err(err) = self.backend.set_fullscreen(window, Some(&applied)) {
                    log::warn!("Could not present full-screen at {applied}: {err}");
                }
                if let Err(err) = self.resize_surface(applied.width, applied.height) {
                    log::warn!("Surface resize to {}x{} failed: {err}", applied.width, applied.height);
                }
            }
        }
        true
    }

    /// Remember an applied mode for shutdown and the refresh change holdback
    fn record_switch(&mut self, previous: Option<DisplayMode>, applied: &DisplayMode, delay: Option<Duration>) {
        let output = applied.output;
        let is_desktop = self
            .catalog
            .desktop_mode(output)
            .is_some_and(|desktop| desktop.matches(applied));
        if is_desktop {
            self.switched_outputs.retain(|switched| *switched != output);
        } else if !self.switched_outputs.contains(&output) {
            self.switched_outputs.push(output);
        }

        let refresh_changed = previous.map_or(true, |previous| {
            previous.refresh_distance(applied.refresh_rate_hz) >= REFRESH_TOLERANCE_HZ
        });
        if let (true, Some(delay)) = (refresh_changed, delay) {
            self.reset_not_before = Some(Instant::now() + delay);
        }
    }

    fn restore_desktop_mode(&mut self, output: usize) {
        let Some(desktop) = self.catalog.desktop_mode(output) else {
            return;
        };
        match self.switcher().apply(&desktop) {
            Ok(_) => {
                self.switched_outputs.retain(|switched| *switched != output);
                log::info!("Restored desktop mode {desktop} on output {output}");
            }
            Err(err) => log::warn!("Could not restore desktop mode {desktop} on output {output}: {err}"),
        }
    }

    fn restore_desktop_modes(&mut self) {
        for output in self.switched_outputs.clone() {
            self.restore_desktop_mode(output);
        }
    }

    fn unblank_outputs(&mut self) {
        if !self.window.blanked_outputs {
            return;
        }
        if let Err(err) = self.backend.set_outputs_blanked(self.window.output, false) {
            log::warn!("Could not unblank outputs: {err}");
        }
        self.window.blanked_outputs = false;
    }

    fn resize_surface(&mut self, width: u32, height: u32) -> BackendResult<()> {
        let Some(surface) = self.window.surface else {
            return Ok(());
        };
        self.backend.resize_surface(surface, width, height)?;
        self.window.surface_size = (width, height);
        Ok(())
    }

    /// Size the surface should have right now
    fn target_surface_size(&self) -> Option<(u32, u32)> {
        if self.window.fullscreen {
            self.current_mode(self.window.output).map(|mode| (mode.width, mode.height))
        } else {
            Some(self.window.windowed.size())
        }
    }

    /// Follow the window to the output the backend reports; returns whether it changed
    fn sync_window_output(&mut self) -> bool {
        let Some(window) = self.window.window else {
            return false;
        };

        let reported = self.backend.window_output(window);
        let output = match reported {
            Some(output) if self.catalog.contains(output) => output,
            _ if self.catalog.contains(self.window.output) => self.window.output,
            _ => 0,
        };

        let changed = output != self.window.output;
        if changed {
            log::info!("Window moved from output {} to output {output}", self.window.output);
            self.window.output = output;
        }
        if let Some(mode) = self.current_mode(output) {
            self.window.refresh_rate_hz = mode.refresh_rate_hz;
        }
        changed
    }

    /// Re-read geometry after a change that keeps the device
    fn sync_geometry(&mut self) {
        self.sync_window_output();
        let Some(window) = self.window.window else {
            return;
        };
        if !self.window.fullscreen {
            if let Some(geometry) = self.backend.window_geometry(window) {
                self.window.windowed = geometry;
            }
        }

        let Some((width, height)) = self.target_surface_size() else {
            return;
        };
        if (width, height) != self.window.surface_size {
            if let Err(err) = self.resize_surface(width, height) {
                log::warn!("Surface resize to {width}x{height} failed: {err}");
            }
        }
    }

    /// Recreate the surface if the device change invalidated it
    fn revalidate_surface(&mut self) -> BackendResult<()> {
        let (Some(window), Some(surface)) = (self.window.window, self.window.surface) else {
            return Ok(());
        };
        if self.backend.is_surface_valid(surface) {
            return Ok(());
        }

        log::warn!("{surface} was invalidated, recreating it");
        if let Err(err) = self.backend.destroy_surface(surface) {
            log::debug!("Destroying invalid {surface}: {err}");
        }
        self.window.surface = None;

        let replacement = self.backend.create_surface(window)?;
        self.window.surface = Some(replacement);
        if let Some((width, height)) = self.target_surface_size() {
            self.resize_surface(width, height)?;
        }
        Ok(())
    }

    /// Run a native call on the window, logging failures
    fn window_op(
        &mut self,
        what: &str,
        op: impl FnOnce(&mut dyn DisplayBackend, WindowId) -> BackendResult<()>,
    ) -> bool {
        let Some(window) = self.window.window else {
            log::debug!("Cannot {what}: no window");
            return false;
        };
        match op(self.backend.as_mut(), window) {
            Ok(()) => true,
            Err(err) => {
                log::warn!("Could not {what} {window}: {err}");
                false
            }
        }
    }
}
