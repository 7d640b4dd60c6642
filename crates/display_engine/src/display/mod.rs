//! Display modes of physical outputs
//!
//! - **`catalog`**: per-output mode enumeration and desktop mode bookkeeping
//! - **`switcher`**: choosing and applying a mode, with refresh-rate fallback

pub mod catalog;
pub mod switcher;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use catalog::{DisplayModes, ResolutionCatalog};
pub use switcher::ModeSwitcher;

/// Refresh rates closer than this are considered the same rate
pub const REFRESH_TOLERANCE_HZ: f64 = 0.01;

/// A resolution and refresh rate supported by one output
///
/// Modes are plain values: once enumerated they never change, and a catalog
/// refresh produces new ones.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DisplayMode {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Refresh rate in Hz, 0 when the output does not report one
    pub refresh_rate_hz: f64,
    /// Index of the output this mode belongs to
    pub output: usize,
}

impl DisplayMode {
    /// Create a mode for `output`
    pub const fn new(output: usize, width: u32, height: u32, refresh_rate_hz: f64) -> Self {
        Self {
            width,
            height,
            refresh_rate_hz,
            output,
        }
    }

    /// Same mode moved to another output
    #[must_use]
    pub const fn on_output(mut self, output: usize) -> Self {
        self.output = output;
        self
    }

    /// Whether the mode has exactly this size
    pub const fn has_size(&self, width: u32, height: u32) -> bool {
        self.width == width && self.height == height
    }

    /// Distance between this mode's refresh rate and `refresh_rate_hz`
    pub fn refresh_distance(&self, refresh_rate_hz: f64) -> f64 {
        (self.refresh_rate_hz - refresh_rate_hz).abs()
    }

    /// Same size and refresh rate, regardless of output
    pub fn matches(&self, other: &Self) -> bool {
        self.has_size(other.width, other.height)
            && self.refresh_distance(other.refresh_rate_hz) < REFRESH_TOLERANCE_HZ
    }
}

impl fmt::Display for DisplayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}@{:.2}Hz", self.width, self.height, self.refresh_rate_hz)
    }
}
