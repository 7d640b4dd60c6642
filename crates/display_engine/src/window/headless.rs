//! In-memory display backend
//!
//! Simulates outputs, windows and surfaces without touching the OS. Tests and
//! the demo application drive the simulated hardware through a
//! [`HeadlessControl`]: unplug outputs, refuse modes, fail window creation or
//! invalidate surfaces, and inspect what the window system asked for.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use super::backend::{
    BackendError, BackendResult, DisplayBackend, SurfaceId, WindowDescriptor, WindowGeometry,
    WindowId,
};
use crate::display::DisplayMode;

/// A simulated output
#[derive(Debug, Clone)]
pub struct HeadlessOutput {
    name: String,
    modes: Vec<DisplayMode>,
    current: Option<DisplayMode>,
    lists_modes: bool,
}

impl HeadlessOutput {
    /// An output without modes
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            modes: Vec::new(),
            current: None,
            lists_modes: true,
        }
    }

    /// A 1080p television with the usual broadcast and film rates
    pub fn full_hd(name: impl Into<String>) -> Self {
        Self::new(name)
            .with_mode(1920, 1080, 60.0)
            .with_mode(1920, 1080, 59.94)
            .with_mode(1920, 1080, 50.0)
            .with_mode(1920, 1080, 23.976)
            .with_mode(1280, 720, 60.0)
    }

    /// Add a supported mode; the first one added is the desktop mode
    #[must_use]
    pub fn with_mode(mut self, width: u32, height: u32, refresh_rate_hz: f64) -> Self {
        let mode = DisplayMode::new(0, width, height, refresh_rate_hz);
        self.modes.push(mode);
        if self.current.is_none() {
            self.current = Some(mode);
        }
        self
    }

    /// An output that runs one mode and reports no mode list
    #[must_use]
    pub fn with_fixed_mode(mut self, width: u32, height: u32, refresh_rate_hz: f64) -> Self {
        let mode = DisplayMode::new(0, width, height, refresh_rate_hz);
        self.modes = vec![mode];
        self.current = Some(mode);
        self.lists_modes = false;
        self
    }
}

/// Call counters of a [`HeadlessBackend`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeadlessStats {
    /// Windows created
    pub windows_created: usize,
    /// Windows destroyed
    pub windows_destroyed: usize,
    /// Surfaces created
    pub surfaces_created: usize,
    /// Surfaces destroyed
    pub surfaces_destroyed: usize,
    /// Successful surface resizes
    pub surface_resizes: usize,
    /// Successful mode switches
    pub mode_switches: usize,
    /// Full-screen/windowed presentation changes
    pub presentation_changes: usize,
}

#[derive(Debug)]
struct HeadlessWindow {
    geometry: WindowGeometry,
    output: usize,
    fullscreen: Option<DisplayMode>,
    minimized: bool,
    visible: bool,
}

#[derive(Debug)]
struct HeadlessSurface {
    window: u64,
    size: (u32, u32),
    valid: bool,
}

#[derive(Debug, Default)]
struct HeadlessState {
    outputs: Vec<HeadlessOutput>,
    windows: HashMap<u64, HeadlessWindow>,
    surfaces: HashMap<u64, HeadlessSurface>,
    next_id: u64,
    rejected_modes: Vec<DisplayMode>,
    fail_next_window: bool,
    fail_next_surface: bool,
    blanked: Vec<usize>,
    stats: HeadlessStats,
}

impl HeadlessState {
    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn output(&self, output: usize) -> BackendResult<&HeadlessOutput> {
        self.outputs.get(output).ok_or(BackendError::InvalidOutput(output))
    }

    fn window_mut(&mut self, window: WindowId) -> BackendResult<&mut HeadlessWindow> {
        self.windows
            .get_mut(&window.raw())
            .ok_or(BackendError::UnknownWindow(window))
    }
}

/// Display backend simulating outputs in memory
pub struct HeadlessBackend {
    state: Arc<Mutex<HeadlessState>>,
}

impl HeadlessBackend {
    /// Create a backend with the given outputs
    pub fn new(outputs: Vec<HeadlessOutput>) -> Self {
        Self {
            state: Arc::new(Mutex::new(HeadlessState {
                outputs,
                ..HeadlessState::default()
            })),
        }
    }

    /// Handle for driving the simulated hardware
    pub fn control(&self) -> HeadlessControl {
        HeadlessControl {
            state: Arc::clone(&self.state),
        }
    }

    fn state(&self) -> MutexGuard<'_, HeadlessState> {
        self.state.lock()
    }
}

impl DisplayBackend for HeadlessBackend {
    fn output_count(&self) -> usize {
        self.state().outputs.len()
    }

    fn output_name(&self, output: usize) -> Option<String> {
        self.state().outputs.get(output).map(|out| out.name.clone())
    }

    fn video_modes(&self, output: usize) -> Vec<DisplayMode> {
        self.state()
            .outputs
            .get(output)
            .filter(|out| out.lists_modes)
            .map(|out| out.modes.iter().map(|mode| mode.on_output(output)).collect())
            .unwrap_or_default()
    }

    fn current_mode(&self, output: usize) -> Option<DisplayMode> {
        self.state()
            .outputs
            .get(output)
            .and_then(|out| out.current)
            .map(|mode| mode.on_output(output))
    }

    fn apply_mode(&mut self, mode: &DisplayMode) -> BackendResult<()> {
        let mut state = self.state();
        if state
            .rejected_modes
            .iter()
            .any(|rejected| rejected.output == mode.output && rejected.matches(mode))
        {
            return Err(BackendError::ModeRejected(mode.to_string()));
        }

        let out = state
            .outputs
            .get_mut(mode.output)
            .ok_or(BackendError::InvalidOutput(mode.output))?;
        let Some(supported) = out.modes.iter().find(|candidate| candidate.matches(mode)).copied() else {
            return Err(BackendError::ModeUnsupported(mode.to_string()));
        };

        out.current = Some(supported);
        state.stats.mode_switches += 1;
        Ok(())
    }

    fn set_outputs_blanked(&mut self, keep: usize, blanked: bool) -> BackendResult<()> {
        let mut state = self.state();
        state.output(keep)?;
        state.blanked = if blanked {
            (0..state.outputs.len()).filter(|output| *output != keep).collect()
        } else {
            Vec::new()
        };
        Ok(())
    }

    fn create_window(&mut self, descriptor: &WindowDescriptor) -> BackendResult<WindowId> {
        let mut state = self.state();
        if std::mem::take(&mut state.fail_next_window) {
            return Err(BackendError::WindowCreationFailed("simulated failure".to_string()));
        }
        state.output(descriptor.output)?;

        let id = state.allocate_id();
        state.windows.insert(
            id,
            HeadlessWindow {
                geometry: descriptor.geometry,
                output: descriptor.output,
                fullscreen: None,
                minimized: false,
                visible: true,
            },
        );
        state.stats.windows_created += 1;
        Ok(WindowId::from_raw(id))
    }

    fn destroy_window(&mut self, window: WindowId) -> BackendResult<()> {
        let mut state = self.state();
        state
            .windows
            .remove(&window.raw())
            .ok_or(BackendError::UnknownWindow(window))?;
        for surface in state.surfaces.values_mut().filter(|s| s.window == window.raw()) {
            surface.valid = false;
        }
        state.stats.windows_destroyed += 1;
        Ok(())
    }

    fn create_surface(&mut self, window: WindowId) -> BackendResult<SurfaceId> {
        let mut state = self.state();
        let size = state.window_mut(window)?.geometry.size();
        if std::mem::take(&mut state.fail_next_surface) {
            return Err(BackendError::SurfaceCreationFailed("simulated failure".to_string()));
        }

        let id = state.allocate_id();
        state.surfaces.insert(
            id,
            HeadlessSurface {
                window: window.raw(),
                size,
                valid: true,
            },
        );
        state.stats.surfaces_created += 1;
        Ok(SurfaceId::from_raw(id))
    }

    fn destroy_surface(&mut self, surface: SurfaceId) -> BackendResult<()> {
        let mut state = self.state();
        state
            .surfaces
            .remove(&surface.raw())
            .ok_or(BackendError::UnknownSurface(surface))?;
        state.stats.surfaces_destroyed += 1;
        Ok(())
    }

    fn is_surface_valid(&self, surface: SurfaceId) -> bool {
        let state = self.state();
        state
            .surfaces
            .get(&surface.raw())
            .is_some_and(|s| s.valid && state.windows.contains_key(&s.window))
    }

    fn resize_surface(&mut self, surface: SurfaceId, width: u32, height: u32) -> BackendResult<()> {
        let mut state = self.state();
        let entry = state
            .surfaces
            .get_mut(&surface.raw())
            .filter(|s| s.valid)
            .ok_or(BackendError::UnknownSurface(surface))?;
        entry.size = (width, height);
        state.stats.surface_resizes += 1;
        Ok(())
    }

    fn window_geometry(&self, window: WindowId) -> Option<WindowGeometry> {
        self.state().windows.get(&window.raw()).map(|w| w.geometry)
    }

    fn set_window_geometry(&mut self, window: WindowId, geometry: WindowGeometry) -> BackendResult<()> {
        self.state().window_mut(window)?.geometry = geometry;
        Ok(())
    }

    fn window_output(&self, window: WindowId) -> Option<usize> {
        self.state().windows.get(&window.raw()).map(|w| w.output)
    }

    fn set_fullscreen(&mut self, window: WindowId, mode: Option<&DisplayMode>) -> BackendResult<()> {
        let mut state = self.state();
        let entry = state.window_mut(window)?;
        entry.fullscreen = mode.copied();
        if let Some(mode) = mode {
            entry.output = mode.output;
        }
        state.stats.presentation_changes += 1;
        Ok(())
    }

    fn minimize(&mut self, window: WindowId) -> BackendResult<()> {
        self.state().window_mut(window)?.minimized = true;
        Ok(())
    }

    fn restore(&mut self, window: WindowId) -> BackendResult<()> {
        let mut state = self.state();
        let entry = state.window_mut(window)?;
        entry.minimized = false;
        entry.visible = true;
        Ok(())
    }

    fn hide(&mut self, window: WindowId) -> BackendResult<()> {
        self.state().window_mut(window)?.visible = false;
        Ok(())
    }

    fn show(&mut self, window: WindowId, _raise: bool) -> BackendResult<()> {
        self.state().window_mut(window)?.visible = true;
        Ok(())
    }
}

/// Drives and inspects a [`HeadlessBackend`] from outside the window system
#[derive(Clone)]
pub struct HeadlessControl {
    state: Arc<Mutex<HeadlessState>>,
}

impl HeadlessControl {
    fn state(&self) -> MutexGuard<'_, HeadlessState> {
        self.state.lock()
    }

    /// Make the OS refuse `mode` on its output
    pub fn reject_mode(&self, mode: DisplayMode) {
        self.state().rejected_modes.push(mode);
    }

    /// The next window creation fails
    pub fn fail_next_window_creation(&self) {
        self.state().fail_next_window = true;
    }

    /// The next surface creation fails
    pub fn fail_next_surface_creation(&self) {
        self.state().fail_next_surface = true;
    }

    /// Invalidate every live surface, as a lost graphics device would
    pub fn invalidate_surfaces(&self) {
        for surface in self.state().surfaces.values_mut() {
            surface.valid = false;
        }
    }

    /// Plug in an output
    pub fn add_output(&self, output: HeadlessOutput) {
        self.state().outputs.push(output);
    }

    /// Unplug an output; windows on it move to the first output
    pub fn remove_output(&self, output: usize) {
        let mut state = self.state();
        if output >= state.outputs.len() {
            return;
        }
        state.outputs.remove(output);
        state.blanked.clear();
        for window in state.windows.values_mut() {
            if window.output == output {
                window.output = 0;
                window.fullscreen = None;
            } else if window.output > output {
                window.output -= 1;
            }
        }
    }

    /// Change an output's mode behind the window system's back
    pub fn set_current_mode(&self, output: usize, width: u32, height: u32, refresh_rate_hz: f64) {
        if let Some(out) = self.state().outputs.get_mut(output) {
            out.current = Some(DisplayMode::new(0, width, height, refresh_rate_hz));
        }
    }

    /// Move or resize a window as the user or window manager would
    pub fn set_window_geometry(&self, window: WindowId, geometry: WindowGeometry) {
        if let Some(entry) = self.state().windows.get_mut(&window.raw()) {
            entry.geometry = geometry;
        }
    }

    /// Move a window to another output
    pub fn move_window_to_output(&self, window: WindowId, output: usize) {
        if let Some(entry) = self.state().windows.get_mut(&window.raw()) {
            entry.output = output;
        }
    }

    /// Mode an output runs now
    pub fn current_mode(&self, output: usize) -> Option<DisplayMode> {
        self.state()
            .outputs
            .get(output)
            .and_then(|out| out.current)
            .map(|mode| mode.on_output(output))
    }

    /// Call counters
    pub fn stats(&self) -> HeadlessStats {
        self.state().stats
    }

    /// Successful mode switches so far
    pub fn mode_switches(&self) -> usize {
        self.state().stats.mode_switches
    }

    /// Windows alive now
    pub fn live_windows(&self) -> usize {
        self.state().windows.len()
    }

    /// Surfaces alive now
    pub fn live_surfaces(&self) -> usize {
        self.state().surfaces.len()
    }

    /// Full-screen mode a window is presented with
    pub fn window_fullscreen(&self, window: WindowId) -> Option<DisplayMode> {
        self.state().windows.get(&window.raw()).and_then(|w| w.fullscreen)
    }

    /// Geometry of a window
    pub fn window_geometry(&self, window: WindowId) -> Option<WindowGeometry> {
        self.state().windows.get(&window.raw()).map(|w| w.geometry)
    }

    /// Whether a window is iconified and whether it is shown
    pub fn window_flags(&self, window: WindowId) -> Option<(bool, bool)> {
        self.state()
            .windows
            .get(&window.raw())
            .map(|w| (w.minimized, w.visible))
    }

    /// Drawable size of a surface
    pub fn surface_size(&self, surface: SurfaceId) -> Option<(u32, u32)> {
        self.state().surfaces.get(&surface.raw()).map(|s| s.size)
    }

    /// Outputs currently blanked
    pub fn blanked_outputs(&self) -> Vec<usize> {
        self.state().blanked.clone()
    }
}
