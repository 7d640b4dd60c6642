//! Window and display lifecycle
//!
//! - **`backend`**: the [`DisplayBackend`] contract native display APIs implement
//! - **`headless`**: in-memory backend for tests and demos
//! - **`glfw_backend`**: GLFW backend (feature `glfw`)
//! - **`monitor`**: display change classification and platform event pumping
//! - **`system`**: the [`WindowSystem`] owning the window and device cycles

pub mod backend;
#[cfg(feature = "glfw")]
pub mod glfw_backend;
pub mod headless;
pub mod monitor;
mod state;
mod system;

#[cfg(test)]
mod tests;

pub use backend::{
    BackendError, BackendResult, DisplayBackend, SurfaceId, WindowDescriptor, WindowGeometry,
    WindowId,
};
#[cfg(feature = "glfw")]
pub use glfw_backend::GlfwBackend;
pub use headless::{HeadlessBackend, HeadlessControl, HeadlessOutput, HeadlessStats};
pub use monitor::{
    DisplayChangeFlags, DisplayChangeKind, DisplayChangeOutcome, PlatformEvent, PumpStatus,
    ScreenChangeMonitor, ToggleGuard,
};
pub use state::WindowState;
pub use system::{LifecyclePhase, WindowSystem};
