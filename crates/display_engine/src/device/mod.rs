//! Graphics device continuity
//!
//! When the display is reconfigured the graphics device behind it can be
//! lost. Dependent resources are told through the [`ResourceRegistry`], and
//! the [`DeviceResetTimer`] decides when the display has settled enough to
//! announce the reset.

pub mod registry;
pub mod reset_timer;

pub use registry::{DisplayResource, ResourceRegistry};
pub use reset_timer::{DeviceResetTimer, TimerPhase};
