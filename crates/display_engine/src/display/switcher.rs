//! Display mode switching
//!
//! The switcher picks a mode from the catalog and applies it through the
//! backend. A request names a size and a refresh rate; only modes of exactly
//! that size qualify, and among those the ones closest to the requested rate
//! are tried first. When the OS refuses a mode the next candidate is tried, so
//! a display that rejects 59.94 Hz still gets 60 Hz. Nothing is changed when
//! every candidate is refused.

use super::{DisplayMode, ResolutionCatalog};
use crate::window::backend::{BackendError, BackendResult, DisplayBackend};

/// Applies display modes to outputs
pub struct ModeSwitcher<'a> {
    backend: &'a mut dyn DisplayBackend,
    catalog: &'a mut ResolutionCatalog,
}

impl<'a> ModeSwitcher<'a> {
    /// Borrow the backend and catalog for a switch
    pub fn new(backend: &'a mut dyn DisplayBackend, catalog: &'a mut ResolutionCatalog) -> Self {
        Self { backend, catalog }
    }

    /// Modes of exactly `width`x`height` on `output`, best match first
    ///
    /// A refresh rate of 0 asks for the desktop rate of the output. Ties keep
    /// the backend's order.
    pub fn candidates(
        &mut self,
        output: usize,
        width: u32,
        height: u32,
        refresh_rate_hz: f64,
    ) -> Vec<DisplayMode> {
        let target = if refresh_rate_hz > 0.0 {
            Some(refresh_rate_hz)
        } else {
            self.catalog.desktop_mode(output).map(|mode| mode.refresh_rate_hz)
        };

        let mut candidates: Vec<DisplayMode> = self
            .catalog
            .enumerate(&*self.backend, output)
            .filter(|mode| mode.has_size(width, height))
            .collect();

        if let Some(target) = target {
            candidates.sort_by(|a, b| {
                a.refresh_distance(target).total_cmp(&b.refresh_distance(target))
            });
        }
        candidates
    }

    /// Find the catalog mode that best matches `request`
    ///
    /// Falls back to the current mode of the output when the catalog has no
    /// modes for it at all.
    pub fn resolve(&mut self, request: &DisplayMode) -> Option<DisplayMode> {
        let output = request.output;
        if self.catalog.enumerate(&*self.backend, output).len() == 0 {
            log::debug!("No modes listed for output {output}, using its current mode");
            return self.catalog.current_mode(&*self.backend, output);
        }

        self.candidates(output, request.width, request.height, request.refresh_rate_hz)
            .into_iter()
            .next()
    }

    /// Switch `output` to `width`x`height` at the nearest accepted refresh rate
    ///
    /// Returns the mode now active. On error the output keeps its previous
    /// mode.
    pub fn switch(
        &mut self,
        output: usize,
        width: u32,
        height: u32,
        refresh_rate_hz: f64,
    ) -> BackendResult<DisplayMode> {
        let candidates = self.candidates(output, width, height, refresh_rate_hz);
        if candidates.is_empty() {
            return Err(BackendError::ModeUnsupported(format!(
                "{width}x{height}@{refresh_rate_hz:.2}Hz on output {output}"
            )));
        }

        let current = self.catalog.current_mode(&*self.backend, output);
        if let Some(current) = current.filter(|current| current.matches(&candidates[0])) {
            log::debug!("Output {output} already runs {current}");
            return Ok(current);
        }

        self.apply_first_accepted(&candidates)
    }

    /// Apply a mode chosen earlier, or the closest alternative of the same size
    pub fn apply(&mut self, mode: &DisplayMode) -> BackendResult<DisplayMode> {
        self.switch(mode.output, mode.width, mode.height, mode.refresh_rate_hz)
    }

    fn apply_first_accepted(&mut self, candidates: &[DisplayMode]) -> BackendResult<DisplayMode> {
        let mut last_error = None;

        for (attempt, candidate) in candidates.iter().enumerate() {
            match self.backend.apply_mode(candidate) {
                Ok(()) => {
                    if attempt > 0 {
                        log::info!(
                            "Output {} fell back to {candidate} after {attempt} rejected mode(s)",
                            candidate.output
                        );
                    } else {
                        log::info!("Output {} switched to {candidate}", candidate.output);
                    }
                    return Ok(*candidate);
                }
                Err(err) => {
                    log::debug!("Output {} rejected {candidate}: {err}", candidate.output);
                    last_error = Some(err);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| BackendError::ModeUnsupported("no candidates".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window::headless::{HeadlessBackend, HeadlessOutput};

    fn setup() -> (HeadlessBackend, ResolutionCatalog) {
        let backend = HeadlessBackend::new(vec![HeadlessOutput::new("TV")
            .with_mode(1920, 1080, 60.0)
            .with_mode(1920, 1080, 50.0)
            .with_mode(1920, 1080, 59.94)
            .with_mode(1920, 1080, 23.976)
            .with_mode(1280, 720, 60.0)]);
        let mut catalog = ResolutionCatalog::new();
        catalog.refresh(&backend);
        (backend, catalog)
    }

    #[test]
    fn test_candidates_ordered_by_refresh_distance() {
        let (mut backend, mut catalog) = setup();
        let mut switcher = ModeSwitcher::new(&mut backend, &mut catalog);

        let rates: Vec<f64> = switcher
            .candidates(0, 1920, 1080, 24.0)
            .iter()
            .map(|mode| mode.refresh_rate_hz)
            .collect();
        assert_eq!(rates, vec![23.976, 50.0, 59.94, 60.0]);
    }

    #[test]
    fn test_zero_refresh_prefers_desktop_rate() {
        let (mut backend, mut catalog) = setup();
        let mut switcher = ModeSwitcher::new(&mut backend, &mut catalog);

        let best = switcher.candidates(0, 1920, 1080, 0.0)[0];
        assert_eq!(best.refresh_rate_hz, 60.0);
    }

    #[test]
    fn test_rejected_rate_falls_back_to_nearest() {
        let (mut backend, mut catalog) = setup();
        let control = backend.control();
        control.reject_mode(DisplayMode::new(0, 1920, 1080, 59.94));

        let mut switcher = ModeSwitcher::new(&mut backend, &mut catalog);
        let applied = switcher.switch(0, 1920, 1080, 59.94).unwrap();

        assert_eq!(applied.refresh_rate_hz, 60.0);
        assert_eq!(control.current_mode(0), Some(DisplayMode::new(0, 1920, 1080, 60.0)));
    }

    #[test]
    fn test_unknown_size_leaves_mode_untouched() {
        let (mut backend, mut catalog) = setup();
        let control = backend.control();
        let mut switcher = ModeSwitcher::new(&mut backend, &mut catalog);

        let result = switcher.switch(0, 13377, 1, 60.0);

        assert!(matches!(result, Err(BackendError::ModeUnsupported(_))));
        assert_eq!(control.current_mode(0), Some(DisplayMode::new(0, 1920, 1080, 60.0)));
        assert_eq!(control.mode_switches(), 0);
    }

    #[test]
    fn test_switch_to_active_mode_is_noop() {
        let (mut backend, mut catalog) = setup();
        let control = backend.control();
        let mut switcher = ModeSwitcher::new(&mut backend, &mut catalog);

        let applied = switcher.switch(0, 1920, 1080, 60.0).unwrap();
        assert_eq!(applied, DisplayMode::new(0, 1920, 1080, 60.0));
        assert_eq!(control.mode_switches(), 0);
    }

    #[test]
    fn test_resolve_falls_back_to_current_mode_without_catalog() {
        let mut backend = HeadlessBackend::new(vec![HeadlessOutput::new("Panel").with_fixed_mode(1366, 768, 60.0)]);
        let mut catalog = ResolutionCatalog::new();
        catalog.refresh(&backend);
        let mut switcher = ModeSwitcher::new(&mut backend, &mut catalog);

        let resolved = switcher.resolve(&DisplayMode::new(0, 1920, 1080, 60.0));
        assert_eq!(resolved, Some(DisplayMode::new(0, 1366, 768, 60.0)));
    }
}
