//! Window state owned by the window system

use super::backend::{SurfaceId, WindowGeometry, WindowId};

/// Snapshot of the managed window
///
/// The window system owns the native window and surface ids stored here and
/// is the only component that creates or destroys them. Snapshots handed out
/// by [`WindowSystem::window_state`](super::WindowSystem::window_state) are
/// copies; changing them has no effect on the window.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WindowState {
    pub(crate) name: String,
    pub(crate) window: Option<WindowId>,
    pub(crate) surface: Option<SurfaceId>,
    pub(crate) output: usize,
    pub(crate) refresh_rate_hz: f64,
    pub(crate) fullscreen: bool,
    pub(crate) cursor_visible: bool,
    pub(crate) minimized: bool,
    pub(crate) visible: bool,
    pub(crate) blanked_outputs: bool,
    pub(crate) windowed: WindowGeometry,
    pub(crate) surface_size: (u32, u32),
}

impl WindowState {
    /// Window name given at creation
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Native window, `None` when no window exists
    pub const fn window(&self) -> Option<WindowId> {
        self.window
    }

    /// Graphics surface of the window
    pub const fn surface(&self) -> Option<SurfaceId> {
        self.surface
    }

    /// Whether a native window exists
    pub const fn is_created(&self) -> bool {
        self.window.is_some()
    }

    /// Output the window is on
    pub const fn output(&self) -> usize {
        self.output
    }

    /// Refresh rate of the window's output
    pub const fn refresh_rate_hz(&self) -> f64 {
        self.refresh_rate_hz
    }

    /// Whether the window is presented full-screen
    pub const fn is_fullscreen(&self) -> bool {
        self.fullscreen
    }

    /// Whether the pointer is inside the window
    pub const fn has_cursor(&self) -> bool {
        self.cursor_visible
    }

    /// Whether the window is iconified
    pub const fn is_minimized(&self) -> bool {
        self.minimized
    }

    /// Whether the window is shown
    pub const fn is_visible(&self) -> bool {
        self.visible
    }

    /// Whether other outputs are blanked for full-screen
    pub const fn other_outputs_blanked(&self) -> bool {
        self.blanked_outputs
    }

    /// Last known windowed geometry, restored when leaving full-screen
    pub const fn windowed_geometry(&self) -> WindowGeometry {
        self.windowed
    }

    /// Current drawable size of the surface
    pub const fn surface_size(&self) -> (u32, u32) {
        self.surface_size
    }

    /// Forget the native objects after they were destroyed
    pub(crate) fn clear_native(&mut self) {
        self.window = None;
        self.surface = None;
        self.fullscreen = false;
        self.cursor_visible = false;
        self.minimized = false;
        self.visible = false;
        self.blanked_outputs = false;
        self.surface_size = (0, 0);
    }
}
