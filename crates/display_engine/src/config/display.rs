//! # Display Configuration
//!
//! Settle delays for device reset recovery and the initial window setup.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::Config;

/// Settle delay used when no configuration is given
pub const DEFAULT_SETTLE_DELAY_MS: u64 = 3000;

/// # Window Configuration
///
/// Initial window placement used by the application when it creates its
/// main window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Window title
    pub title: String,
    /// Windowed client width in pixels
    pub width: u32,
    /// Windowed client height in pixels
    pub height: u32,
    /// Start in full-screen mode
    pub fullscreen: bool,
    /// Output the window opens on
    pub output: usize,
    /// Preferred refresh rate for full-screen, 0 keeps the desktop rate
    pub refresh_rate_hz: f64,
}

impl WindowConfig {
    /// Create a window configuration with the given title
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    /// Set windowed size
    #[must_use]
    pub const fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Start in full-screen
    #[must_use]
    pub const fn with_fullscreen(mut self, fullscreen: bool) -> Self {
        self.fullscreen = fullscreen;
        self
    }

    /// Select the output to open on
    #[must_use]
    pub const fn with_output(mut self, output: usize) -> Self {
        self.output = output;
        self
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Display Engine".to_string(),
            width: 1280,
            height: 720,
            fullscreen: false,
            output: 0,
            refresh_rate_hz: 0.0,
        }
    }
}

/// # Display Configuration
///
/// Tunables of the window system. The settle delay absorbs bursts of OS
/// display notifications before consumers are told the device is back; the
/// refresh change delay holds the reset back further after a refresh-rate
/// switch, for displays that take long to resync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Debounce interval between the last display change and the reset
    pub settle_delay_ms: u64,
    /// Minimum time between a refresh-rate switch and the reset, 0 disables
    pub refresh_change_delay_ms: u64,
    /// Blank secondary outputs while full-screen
    pub blank_other_displays: bool,
    /// Main window setup
    pub window: WindowConfig,
}

impl DisplayConfig {
    /// Create a configuration with default delays
    pub fn new() -> Self {
        Self {
            settle_delay_ms: DEFAULT_SETTLE_DELAY_MS,
            refresh_change_delay_ms: 0,
            blank_other_displays: false,
            window: WindowConfig::default(),
        }
    }

    /// Set the settle delay
    #[must_use]
    pub const fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Set the refresh change delay
    #[must_use]
    pub const fn with_refresh_change_delay(mut self, delay: Duration) -> Self {
        self.refresh_change_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Blank other outputs while full-screen
    #[must_use]
    pub const fn with_blank_other_displays(mut self, blank: bool) -> Self {
        self.blank_other_displays = blank;
        self
    }

    /// Set the main window configuration
    #[must_use]
    pub fn with_window(mut self, window: WindowConfig) -> Self {
        self.window = window;
        self
    }

    /// Settle delay as a duration
    pub const fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Refresh change delay, `None` when disabled
    pub const fn refresh_change_delay(&self) -> Option<Duration> {
        if self.refresh_change_delay_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.refresh_change_delay_ms))
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.settle_delay_ms == 0 {
            return Err("Settle delay must be at least 1 ms".to_string());
        }

        if self.window.width == 0 || self.window.height == 0 {
            return Err(format!(
                "Window size {}x{} is empty",
                self.window.width, self.window.height
            ));
        }

        if !self.window.refresh_rate_hz.is_finite() || self.window.refresh_rate_hz < 0.0 {
            return Err(format!(
                "Refresh rate {} is not a valid rate",
                self.window.refresh_rate_hz
            ));
        }

        Ok(())
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl Config for DisplayConfig {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigError;

    #[test]
    fn test_default_config_is_valid() {
        let config = DisplayConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.settle_delay(), Duration::from_millis(DEFAULT_SETTLE_DELAY_MS));
        assert_eq!(config.refresh_change_delay(), None);
    }

    #[test]
    fn test_validation_rejects_unusable_values() {
        let config = DisplayConfig::default().with_settle_delay(Duration::ZERO);
        assert!(config.validate().is_err());

        let config = DisplayConfig::default().with_window(WindowConfig::new("x").with_size(0, 720));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: DisplayConfig = toml::from_str(
            r#"
            settle_delay_ms = 250

            [window]
            title = "Player"
            fullscreen = true
            "#,
        )
        .unwrap();

        assert_eq!(config.settle_delay(), Duration::from_millis(250));
        assert_eq!(config.window.title, "Player");
        assert!(config.window.fullscreen);
        assert_eq!(config.window.width, 1280);
        assert!(!config.blank_other_displays);
    }

    #[test]
    fn test_load_from_ron_file() {
        let path = std::env::temp_dir().join(format!("display_config_{}.ron", std::process::id()));
        let path = path.to_string_lossy().to_string();
        let config = DisplayConfig::default()
            .with_refresh_change_delay(Duration::from_millis(1500))
            .with_blank_other_displays(true);

        config.save_to_file(&path).unwrap();
        let loaded = DisplayConfig::load_from_file(&path).unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let loaded = DisplayConfig::load_or_default("/nonexistent/display.toml").unwrap();
        assert_eq!(loaded, DisplayConfig::default());

        assert!(matches!(
            DisplayConfig::load_from_file("display.yaml"),
            Err(ConfigError::Io(_) | ConfigError::UnsupportedFormat(_))
        ));
    }
}
