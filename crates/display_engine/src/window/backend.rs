//! Backend-agnostic display trait
//!
//! This module defines the contract every native display API must fulfil for
//! the window system. The window system never talks to the OS directly; it
//! drives a [`DisplayBackend`] and keeps its own [`WindowState`] consistent
//! with what the backend reports.
//!
//! Windows and graphics surfaces are identified by opaque ids handed out by
//! the backend. Each id is created once and destroyed once; the window system
//! owns the ids it receives and is the only caller of the matching destroy
//! call.
//!
//! [`WindowState`]: crate::window::WindowState

use std::fmt;

use thiserror::Error;

use crate::display::DisplayMode;

/// Native display API errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    /// The native API could not be initialized
    #[error("Display backend initialization failed: {0}")]
    InitializationFailed(String),

    /// Output index out of range
    #[error("Invalid output index {0}")]
    InvalidOutput(usize),

    /// The window id is not (or no longer) known
    #[error("Unknown window {0}")]
    UnknownWindow(WindowId),

    /// The surface id is not (or no longer) known
    #[error("Unknown graphics surface {0}")]
    UnknownSurface(SurfaceId),

    /// No mode matches the request
    #[error("Display mode not supported: {0}")]
    ModeUnsupported(String),

    /// The OS refused to apply a mode
    #[error("Display mode rejected: {0}")]
    ModeRejected(String),

    /// Native window creation failed
    #[error("Window creation failed: {0}")]
    WindowCreationFailed(String),

    /// Graphics surface creation failed
    #[error("Surface creation failed: {0}")]
    SurfaceCreationFailed(String),

    /// The backend cannot perform this operation
    #[error("Operation not supported by this backend: {0}")]
    Unsupported(&'static str),

    /// The thread owning the native API is gone
    #[error("Display thread disconnected")]
    Disconnected,

    /// Any other native failure
    #[error("Native display error: {0}")]
    Native(String),
}

/// Result alias for backend calls
pub type BackendResult<T> = Result<T, BackendError>;

/// Opaque handle to a native window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowId(u64);

impl WindowId {
    /// Wrap a backend-specific raw id
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Backend-specific raw id
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "window#{}", self.0)
    }
}

/// Opaque handle to a graphics surface/view attached to a window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceId(u64);

impl SurfaceId {
    /// Wrap a backend-specific raw id
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Backend-specific raw id
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "surface#{}", self.0)
    }
}

/// Position and client size of a window in desktop coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WindowGeometry {
    /// Left edge
    pub x: i32,
    /// Top edge
    pub y: i32,
    /// Client width in pixels
    pub width: u32,
    /// Client height in pixels
    pub height: u32,
}

impl WindowGeometry {
    /// Create a geometry
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Size as a tuple
    pub const fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Parameters for native window creation
#[derive(Debug, Clone, PartialEq)]
pub struct WindowDescriptor {
    /// Window title
    pub title: String,
    /// Initial windowed geometry
    pub geometry: WindowGeometry,
    /// Output the window should open on
    pub output: usize,
}

/// Native display API used by the window system
///
/// Implementations must be `Send`: the window system is shared between the
/// event thread, the timer thread and the application. Backends whose native
/// API is bound to one thread run that API on a thread of their own (see the
/// GLFW backend).
///
/// # Failure contract
/// A call that returns an error must leave the native object in its previous
/// state; the window system relies on this to keep its own state unchanged.
pub trait DisplayBackend: Send {
    /// Number of connected outputs
    fn output_count(&self) -> usize;

    /// Human readable output name
    fn output_name(&self, output: usize) -> Option<String>;

    /// Every mode the output supports, in the OS's preferred order
    fn video_modes(&self, output: usize) -> Vec<DisplayMode>;

    /// The mode the output is running now
    fn current_mode(&self, output: usize) -> Option<DisplayMode>;

    /// Reconfigure `mode.output` to run `mode`
    fn apply_mode(&mut self, mode: &DisplayMode) -> BackendResult<()>;

    /// Blank (or unblank) every output except `keep`
    fn set_outputs_blanked(&mut self, keep: usize, blanked: bool) -> BackendResult<()>;

    /// Create a native window
    fn create_window(&mut self, descriptor: &WindowDescriptor) -> BackendResult<WindowId>;

    /// Destroy a native window
    fn destroy_window(&mut self, window: WindowId) -> BackendResult<()>;

    /// Create the graphics surface/view of a window
    fn create_surface(&mut self, window: WindowId) -> BackendResult<SurfaceId>;

    /// Destroy a graphics surface
    fn destroy_surface(&mut self, surface: SurfaceId) -> BackendResult<()>;

    /// Whether the surface can still be rendered to
    ///
    /// Surfaces can be invalidated behind the application's back by display
    /// reconfiguration; the window system re-creates them on device reset.
    fn is_surface_valid(&self, surface: SurfaceId) -> bool;

    /// Resize the drawable of a surface
    fn resize_surface(&mut self, surface: SurfaceId, width: u32, height: u32) -> BackendResult<()>;

    /// Current windowed geometry of a window
    fn window_geometry(&self, window: WindowId) -> Option<WindowGeometry>;

    /// Move and resize a window
    fn set_window_geometry(&mut self, window: WindowId, geometry: WindowGeometry) -> BackendResult<()>;

    /// Output the window is (mostly) on
    fn window_output(&self, window: WindowId) -> Option<usize>;

    /// Present the window full-screen with `mode`, or windowed when `None`
    fn set_fullscreen(&mut self, window: WindowId, mode: Option<&DisplayMode>) -> BackendResult<()>;

    /// Iconify a window
    fn minimize(&mut self, window: WindowId) -> BackendResult<()>;

    /// Undo minimize
    fn restore(&mut self, window: WindowId) -> BackendResult<()>;

    /// Hide a window
    fn hide(&mut self, window: WindowId) -> BackendResult<()>;

    /// Show a window, optionally raising it above others
    fn show(&mut self, window: WindowId, raise: bool) -> BackendResult<()>;
}
