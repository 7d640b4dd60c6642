//! Resolution catalog
//!
//! Caches the modes each output supports. Mode lists are read from the
//! backend the first time an output is enumerated and kept until the next
//! [`ResolutionCatalog::refresh`]; the desktop mode of every output is
//! recorded at refresh time so leaving full-screen can restore it.

use std::sync::Arc;

use super::DisplayMode;
use crate::window::backend::DisplayBackend;

/// Restartable iterator over the modes of one output
///
/// Cloning the iterator restarts enumeration from its current position
/// without querying the backend again. Modes come out in the order the
/// backend reported them.
#[derive(Debug, Clone)]
pub struct DisplayModes {
    modes: Arc<[DisplayMode]>,
    next: usize,
}

impl DisplayModes {
    fn new(modes: Arc<[DisplayMode]>) -> Self {
        Self { modes, next: 0 }
    }

    /// An empty sequence
    pub fn empty() -> Self {
        Self::new(Arc::from(Vec::new()))
    }

    /// All modes of the sequence, including ones already yielded
    pub fn as_slice(&self) -> &[DisplayMode] {
        &self.modes
    }
}

impl Iterator for DisplayModes {
    type Item = DisplayMode;

    fn next(&mut self) -> Option<Self::Item> {
        let mode = self.modes.get(self.next).copied()?;
        self.next += 1;
        Some(mode)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.modes.len().saturating_sub(self.next);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for DisplayModes {}

#[derive(Debug)]
struct OutputEntry {
    name: String,
    desktop: Option<DisplayMode>,
    modes: Option<Arc<[DisplayMode]>>,
}

/// Mode lists and desktop modes of every connected output
#[derive(Debug, Default)]
pub struct ResolutionCatalog {
    outputs: Vec<OutputEntry>,
}

impl ResolutionCatalog {
    /// Create an empty catalog; call [`refresh`](Self::refresh) to fill it
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-read outputs and desktop modes, dropping every cached mode list
    pub fn refresh(&mut self, backend: &dyn DisplayBackend) {
        self.outputs = (0..backend.output_count())
            .map(|output| OutputEntry {
                name: backend
                    .output_name(output)
                    .unwrap_or_else(|| format!("Output {output}")),
                desktop: backend.current_mode(output).map(|mode| mode.on_output(output)),
                modes: None,
            })
            .collect();

        log::info!("Display catalog refreshed: {} output(s)", self.outputs.len());
        for (index, entry) in self.outputs.iter().enumerate() {
            match entry.desktop {
                Some(mode) => log::debug!("Output {index} '{}': desktop mode {mode}", entry.name),
                None => log::debug!("Output {index} '{}': no desktop mode reported", entry.name),
            }
        }
    }

    /// Number of outputs seen at the last refresh
    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }

    /// Whether `output` is a known output index
    pub fn contains(&self, output: usize) -> bool {
        output < self.outputs.len()
    }

    /// Names of the outputs seen at the last refresh
    pub fn connected_outputs(&self) -> Vec<String> {
        self.outputs.iter().map(|entry| entry.name.clone()).collect()
    }

    /// Name of one output
    pub fn output_name(&self, output: usize) -> Option<&str> {
        self.outputs.get(output).map(|entry| entry.name.as_str())
    }

    /// Every mode `output` supports, in the order the backend reports them
    ///
    /// An unknown output yields an empty sequence; callers fall back to the
    /// current desktop mode.
    pub fn enumerate(&mut self, backend: &dyn DisplayBackend, output: usize) -> DisplayModes {
        let Some(entry) = self.outputs.get_mut(output) else {
            log::debug!("Enumerating unknown output {output}");
            return DisplayModes::empty();
        };

        let modes = entry.modes.get_or_insert_with(|| {
            backend
                .video_modes(output)
                .into_iter()
                .map(|mode| mode.on_output(output))
                .collect()
        });
        DisplayModes::new(Arc::clone(modes))
    }

    /// The mode `output` is running right now
    pub fn current_mode(&self, backend: &dyn DisplayBackend, output: usize) -> Option<DisplayMode> {
        if !self.contains(output) {
            return None;
        }
        backend.current_mode(output).map(|mode| mode.on_output(output))
    }

    /// The mode `output` was running at the last refresh
    pub fn desktop_mode(&self, output: usize) -> Option<DisplayMode> {
        self.outputs.get(output).and_then(|entry| entry.desktop)
    }

    /// Index of the output called `name`
    pub fn output_index(&self, name: &str) -> Option<usize> {
        self.outputs.iter().position(|entry| entry.name == name)
    }

    /// Override the recorded desktop mode of `output`
    ///
    /// Used after a refresh while an output runs a mode we switched it to, so
    /// the mode to restore is not lost.
    pub(crate) fn set_desktop_mode(&mut self, output: usize, mode: DisplayMode) {
        if let Some(entry) = self.outputs.get_mut(output) {
            entry.desktop = Some(mode.on_output(output));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window::headless::{HeadlessBackend, HeadlessOutput};

    fn backend() -> HeadlessBackend {
        HeadlessBackend::new(vec![
            HeadlessOutput::new("DP-1")
                .with_mode(2560, 1440, 144.0)
                .with_mode(2560, 1440, 60.0)
                .with_mode(1920, 1080, 60.0),
            HeadlessOutput::new("HDMI-1").with_mode(1920, 1080, 50.0),
        ])
    }

    #[test]
    fn test_enumerate_keeps_backend_order() {
        let backend = backend();
        let mut catalog = ResolutionCatalog::new();
        catalog.refresh(&backend);

        let modes: Vec<_> = catalog.enumerate(&backend, 0).collect();
        assert_eq!(
            modes,
            vec![
                DisplayMode::new(0, 2560, 1440, 144.0),
                DisplayMode::new(0, 2560, 1440, 60.0),
                DisplayMode::new(0, 1920, 1080, 60.0),
            ]
        );

        let second: Vec<_> = catalog.enumerate(&backend, 1).collect();
        assert_eq!(second, vec![DisplayMode::new(1, 1920, 1080, 50.0)]);
    }

    #[test]
    fn test_unknown_output_is_empty() {
        let backend = backend();
        let mut catalog = ResolutionCatalog::new();
        catalog.refresh(&backend);

        assert_eq!(catalog.enumerate(&backend, 7).len(), 0);
        assert_eq!(catalog.current_mode(&backend, 7), None);
        assert_eq!(catalog.desktop_mode(7), None);
    }

    #[test]
    fn test_sequence_is_restartable() {
        let backend = backend();
        let mut catalog = ResolutionCatalog::new();
        catalog.refresh(&backend);

        let mut modes = catalog.enumerate(&backend, 0);
        assert_eq!(modes.len(), 3);
        modes.next();
        let restarted = modes.clone();
        assert_eq!(modes.count(), 2);
        assert_eq!(restarted.len(), 2);
        assert_eq!(restarted.as_slice().len(), 3);
    }

    #[test]
    fn test_output_lookup_by_name() {
        let backend = backend();
        let mut catalog = ResolutionCatalog::new();
        catalog.refresh(&backend);

        assert_eq!(catalog.output_index("HDMI-1"), Some(1));
        assert_eq!(catalog.output_index("VGA-1"), None);
        assert_eq!(catalog.output_name(0), Some("DP-1"));
    }

    #[test]
    fn test_refresh_rebuilds_outputs() {
        let backend = backend();
        let control = backend.control();
        let mut catalog = ResolutionCatalog::new();
        catalog.refresh(&backend);
        assert_eq!(catalog.connected_outputs(), vec!["DP-1", "HDMI-1"]);
        assert_eq!(catalog.desktop_mode(0), Some(DisplayMode::new(0, 2560, 1440, 144.0)));

        control.remove_output(0);
        // Cached until the next refresh
        assert_eq!(catalog.output_count(), 2);

        catalog.refresh(&backend);
        assert_eq!(catalog.connected_outputs(), vec!["HDMI-1"]);
        assert_eq!(
            catalog.enumerate(&backend, 0).collect::<Vec<_>>(),
            vec![DisplayMode::new(0, 1920, 1080, 50.0)]
        );
    }
}
