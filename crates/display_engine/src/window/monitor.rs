//! Screen-change monitoring
//!
//! Turns OS display reconfiguration notifications into device lost/reset
//! cycles. Notifications are classified by their change flags: a pure move or
//! desktop reshape only needs the surface resized, anything touching the
//! output topology or a mode restarts the device.
//!
//! Switching modes ourselves makes the OS report a change as well. The
//! [`ToggleGuard`] marks those windows of time so the monitor can tell its own
//! toggles apart from external changes.

use std::sync::Weak;
use std::time::{Duration, Instant};

use bitflags::bitflags;
use crossbeam::channel::{Receiver, TryRecvError};
use parking_lot::Mutex;

use super::system::Shared;

bitflags! {
    /// What changed in a display reconfiguration notification
    ///
    /// Values follow the CoreGraphics display reconfiguration flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DisplayChangeFlags: u32 {
        /// A reconfiguration is about to start
        const BEGIN_CONFIGURATION = 1 << 0;
        /// An output moved in desktop space
        const MOVED = 1 << 1;
        /// The main output changed
        const SET_MAIN = 1 << 2;
        /// An output changed mode
        const SET_MODE = 1 << 3;
        /// An output was connected
        const ADDED = 1 << 4;
        /// An output was disconnected
        const REMOVED = 1 << 5;
        /// An output was enabled
        const ENABLED = 1 << 8;
        /// An output was disabled
        const DISABLED = 1 << 9;
        /// An output started mirroring
        const MIRROR = 1 << 10;
        /// An output stopped mirroring
        const UNMIRROR = 1 << 11;
        /// The desktop shape changed
        const DESKTOP_SHAPE_CHANGED = 1 << 12;
        /// An output changed refresh rate
        const REFRESH_RATE_CHANGED = 1 << 16;
    }
}

/// How much of the display a notification affects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayChangeKind {
    /// No change reported
    None,
    /// Outputs moved or the desktop reshaped; the device is unaffected
    GeometryOnly,
    /// Outputs or modes changed; the device must be reset
    Topology,
}

impl DisplayChangeFlags {
    const GEOMETRY: Self = Self::MOVED.union(Self::DESKTOP_SHAPE_CHANGED);

    /// Classify a notification
    pub const fn kind(self) -> DisplayChangeKind {
        if self.is_empty() {
            DisplayChangeKind::None
        } else if Self::GEOMETRY.contains(self) {
            DisplayChangeKind::GeometryOnly
        } else {
            DisplayChangeKind::Topology
        }
    }
}

/// What the window system did with a display change notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayChangeOutcome {
    /// Nothing changed
    Ignored,
    /// Geometry-only change; the surface was resized
    Resized,
    /// Caused by our own full-screen toggle; no lost device announced
    Suppressed,
    /// Lost device announced (or extended) and a reset scheduled
    ResetScheduled,
}

#[derive(Debug, Default)]
struct ToggleState {
    active: bool,
    issued: u64,
    consumed: u64,
    released_at: Option<Instant>,
}

/// Marks display changes caused by our own full-screen toggles
///
/// Every `set(true)` issues a token. While the guard is set every
/// notification is suppressed. After it is cleared, the first notification
/// arriving within the grace period still consumes the outstanding token:
/// the OS may deliver the change a little after the toggle returned. Later
/// notifications are treated as external.
#[derive(Debug)]
pub struct ToggleGuard {
    state: Mutex<ToggleState>,
    grace: Duration,
}

impl ToggleGuard {
    /// Create a cleared guard
    pub fn new(grace: Duration) -> Self {
        Self {
            state: Mutex::new(ToggleState::default()),
            grace,
        }
    }

    /// Announce (`true`) or finish (`false`) an own toggle
    pub fn set(&self, toggling: bool) {
        let mut state = self.state.lock();
        if toggling {
            if !state.active {
                state.issued += 1;
                state.active = true;
            }
        } else if state.active {
            state.active = false;
            state.released_at = Some(Instant::now());
        }
    }

    /// Finish an own toggle that changed nothing
    ///
    /// Unlike `set(false)` no late notification is suppressed afterwards.
    pub fn cancel(&self) {
        let mut state = self.state.lock();
        state.active = false;
        state.consumed = state.issued;
    }

    /// Whether an own toggle is in progress
    pub fn is_set(&self) -> bool {
        self.state.lock().active
    }

    /// Whether the notification arriving now comes from our own toggle
    pub fn should_suppress(&self) -> bool {
        let mut state = self.state.lock();
        if state.active {
            state.consumed = state.issued;
            return true;
        }

        let late = state.consumed < state.issued
            && state
                .released_at
                .is_some_and(|released| released.elapsed() <= self.grace);
        state.consumed = state.issued;
        if late {
            log::debug!("Late display notification matched a finished full-screen toggle");
        }
        late
    }
}

/// Event reported by a platform backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformEvent {
    /// An output was plugged in
    OutputConnected {
        /// Output name
        name: String,
    },
    /// An output was unplugged
    OutputDisconnected {
        /// Output name
        name: String,
    },
    /// Raw display reconfiguration notification
    DisplayReconfigured(DisplayChangeFlags),
    /// The window moved
    WindowMoved {
        /// New left edge
        x: i32,
        /// New top edge
        y: i32,
    },
    /// The window was resized by the user or window manager
    WindowResized {
        /// New width
        width: u32,
        /// New height
        height: u32,
    },
    /// The pointer entered (`true`) or left the window
    CursorEntered(bool),
    /// The user asked to close the window
    CloseRequested,
}

/// Result of draining platform events
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpStatus {
    /// Events handled
    pub processed: usize,
    /// A close request was seen
    pub close_requested: bool,
    /// The event source is gone
    pub disconnected: bool,
}

/// Feeds platform events into a window system
///
/// Holds the window system weakly: once the system is dropped, events are
/// discarded.
#[derive(Clone)]
pub struct ScreenChangeMonitor {
    system: Weak<Shared>,
}

impl ScreenChangeMonitor {
    pub(crate) const fn new(system: Weak<Shared>) -> Self {
        Self { system }
    }

    /// Whether the window system still exists
    pub fn is_attached(&self) -> bool {
        self.system.strong_count() > 0
    }

    /// Handle one event; returns `false` when the window system is gone
    pub fn handle_event(&self, event: &PlatformEvent) -> bool {
        let Some(system) = self.system.upgrade() else {
            log::debug!("Dropping {event:?}: window system is gone");
            return false;
        };

        match event {
            PlatformEvent::OutputConnected { name } => {
                log::info!("Output '{name}' connected");
                system.check_display_changing(DisplayChangeFlags::ADDED);
            }
            PlatformEvent::OutputDisconnected { name } => {
                log::info!("Output '{name}' disconnected");
                system.check_display_changing(DisplayChangeFlags::REMOVED);
            }
            PlatformEvent::DisplayReconfigured(flags) => {
                system.check_display_changing(*flags);
            }
            PlatformEvent::WindowMoved { x, y } => system.on_move(*x, *y),
            PlatformEvent::WindowResized { width, height } => system.on_resize(*width, *height),
            PlatformEvent::CursorEntered(inside) => system.set_cursor_inside(*inside),
            PlatformEvent::CloseRequested => log::debug!("Close requested"),
        }
        true
    }

    /// Drain every queued event without blocking
    pub fn pump(&self, events: &Receiver<PlatformEvent>) -> PumpStatus {
        let mut status = PumpStatus::default();
        loop {
            match events.try_recv() {
                Ok(event) => {
                    status.close_requested |= event == PlatformEvent::CloseRequested;
                    if !self.handle_event(&event) {
                        break;
                    }
                    status.processed += 1;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    status.disconnected = true;
                    break;
                }
            }
        }
        status
    }
}
