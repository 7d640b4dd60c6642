//! Window system errors

use thiserror::Error;

use crate::window::backend::BackendError;

/// Errors surfaced by [`WindowSystem`](crate::window::WindowSystem)
///
/// Most lifecycle operations report failure as `false` and leave the previous
/// state in place; only construction and window creation return errors.
#[derive(Error, Debug)]
pub enum DisplayError {
    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// The native window could not be created
    #[error("Window creation failed")]
    WindowCreation(#[source] BackendError),

    /// The window's graphics surface could not be created
    #[error("Surface creation failed")]
    SurfaceCreation(#[source] BackendError),

    /// The device reset timer thread could not be started
    #[error("Timer thread could not be started: {0}")]
    TimerThread(#[from] std::io::Error),

    /// Other backend failure
    #[error(transparent)]
    Backend(#[from] BackendError),
}
