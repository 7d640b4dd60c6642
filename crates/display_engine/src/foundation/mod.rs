//! Foundation module - Core utilities and types
//!
//! This module provides fundamental utilities used throughout the engine:
//! - Logging utilities
//! - Delayed task scheduling on a dedicated timer thread

pub mod logging;
pub mod scheduler;

pub use scheduler::{TaskKey, TimerService};
