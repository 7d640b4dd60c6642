//! # Display Engine
//!
//! Display surface lifecycle for media-center style applications: one main
//! window, its graphics surface, and the display modes of the outputs it runs
//! on.
//!
//! ## Features
//!
//! - **Resolution catalog**: per-output mode lists and desktop modes
//! - **Mode switching**: nearest refresh rate with fallback when the OS refuses
//! - **Device lost/reset**: debounced announcements to registered resources
//! - **Screen-change monitoring**: own toggles told apart from external changes
//! - **Backends**: headless simulation, GLFW behind the `glfw` feature
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use display_engine::prelude::*;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = HeadlessBackend::new(vec![HeadlessOutput::full_hd("TV")]);
//!     let system = WindowSystem::new(backend, DisplayConfig::default())?;
//!
//!     system.create_new_window("Player", false, &DisplayMode::new(0, 1280, 720, 0.0))?;
//!     system.set_full_screen(true, &DisplayMode::new(0, 1920, 1080, 23.976), false);
//!
//!     system.shutdown();
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names)]

pub mod config;
pub mod device;
pub mod display;
pub mod foundation;
pub mod window;

mod error;

pub use error::DisplayError;

/// Common imports for users of the window system
pub mod prelude {
    pub use crate::{
        config::{Config, DisplayConfig, WindowConfig},
        device::{DisplayResource, TimerPhase},
        display::{DisplayMode, DisplayModes},
        window::{
            DisplayBackend, DisplayChangeFlags, DisplayChangeOutcome, HeadlessBackend,
            HeadlessOutput, LifecyclePhase, PlatformEvent, ScreenChangeMonitor, WindowState,
            WindowSystem,
        },
        DisplayError,
    };
}
