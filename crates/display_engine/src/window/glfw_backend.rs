//! GLFW display backend
//!
//! GLFW must be driven from the thread that initialized it, while the window
//! system is shared between threads. [`GlfwBackend`] therefore spawns a
//! display thread that owns the `Glfw` context and every window, and forwards
//! each backend call to it as a job. The display thread polls GLFW between
//! jobs and reports window and monitor events as [`PlatformEvent`]s.
//!
//! GLFW changes video modes only through full-screen windows. A mode applied
//! while no window is full-screen on that output is kept pending and used the
//! next time a window goes full-screen there. Blanking other outputs is not
//! supported.
//!
//! macOS requires GLFW on the main thread, so this backend targets Linux and
//! Windows.

use std::collections::HashMap;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};

use super::backend::{
    BackendError, BackendResult, DisplayBackend, SurfaceId, WindowDescriptor, WindowGeometry,
    WindowId,
};
use super::monitor::PlatformEvent;
use crate::display::DisplayMode;

const POLL_INTERVAL: Duration = Duration::from_millis(5);

type Job = Box<dyn FnOnce(&mut DisplayThread) + Send>;

struct NativeWindow {
    handle: glfw::PWindow,
    events: glfw::GlfwReceiver<(f64, glfw::WindowEvent)>,
    fullscreen_on: Option<usize>,
    windowed: WindowGeometry,
}

impl NativeWindow {
    fn geometry(&self) -> WindowGeometry {
        let (x, y) = self.handle.get_pos();
        let (width, height) = self.handle.get_size();
        WindowGeometry::new(x, y, to_unsigned(width), to_unsigned(height))
    }
}

/// State owned by the display thread
struct DisplayThread {
    glfw: glfw::Glfw,
    windows: HashMap<u64, NativeWindow>,
    // Surface id -> window id
    surfaces: HashMap<u64, u64>,
    pending_modes: HashMap<usize, DisplayMode>,
    next_id: u64,
    events: Sender<PlatformEvent>,
    running: bool,
}

impl DisplayThread {
    fn init(events: Sender<PlatformEvent>) -> BackendResult<Self> {
        let mut glfw = glfw::init(glfw::fail_on_errors)
            .map_err(|err| BackendError::InitializationFailed(format!("{err:?}")))?;

        // The window system creates its own graphics surfaces
        glfw.window_hint(glfw::WindowHint::ClientApi(glfw::ClientApiHint::NoApi));
        glfw.window_hint(glfw::WindowHint::Resizable(true));

        let monitor_events = events.clone();
        glfw.set_monitor_callback(move |monitor: glfw::Monitor, event: glfw::MonitorEvent| {
            let name = monitor.get_name().unwrap_or_default();
            let event = match event {
                glfw::MonitorEvent::Connected => PlatformEvent::OutputConnected { name },
                glfw::MonitorEvent::Disconnected => PlatformEvent::OutputDisconnected { name },
            };
            let _ = monitor_events.send(event);
        });

        Ok(Self {
            glfw,
            windows: HashMap::new(),
            surfaces: HashMap::new(),
            pending_modes: HashMap::new(),
            next_id: 0,
            events,
            running: true,
        })
    }

    fn run(mut self, jobs: &Receiver<Job>) {
        while self.running {
            match jobs.recv_timeout(POLL_INTERVAL) {
                Ok(job) => job(&mut self),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
            self.glfw.poll_events();
            self.forward_window_events();
        }
        log::debug!("GLFW display thread exiting");
    }

    fn forward_window_events(&self) {
        for window in self.windows.values() {
            for (_, event) in glfw::flush_messages(&window.events) {
                let event = match event {
                    glfw::WindowEvent::Pos(x, y) => PlatformEvent::WindowMoved { x, y },
                    glfw::WindowEvent::Size(width, height) => PlatformEvent::WindowResized {
                        width: to_unsigned(width),
                        height: to_unsigned(height),
                    },
                    glfw::WindowEvent::CursorEnter(inside) => PlatformEvent::CursorEntered(inside),
                    glfw::WindowEvent::Close => PlatformEvent::CloseRequested,
                    _ => continue,
                };
                if self.events.send(event).is_err() {
                    return;
                }
            }
        }
    }

    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn window(&mut self, window: WindowId) -> BackendResult<&mut NativeWindow> {
        self.windows
            .get_mut(&window.raw())
            .ok_or(BackendError::UnknownWindow(window))
    }

    fn output_count(&mut self) -> usize {
        self.glfw.with_connected_monitors(|_, monitors| monitors.len())
    }

    fn output_name(&mut self, output: usize) -> Option<String> {
        self.glfw
            .with_connected_monitors(|_, monitors| monitors.get(output).and_then(|m| m.get_name()))
    }

    fn video_modes(&mut self, output: usize) -> Vec<DisplayMode> {
        self.glfw.with_connected_monitors(|_, monitors| {
            monitors
                .get(output)
                .map(|monitor| {
                    monitor
                        .get_video_modes()
                        .iter()
                        .map(|mode| to_display_mode(output, mode))
                        .collect()
                })
                .unwrap_or_default()
        })
    }

    fn current_mode(&mut self, output: usize) -> Option<DisplayMode> {
        if let Some(pending) = self.pending_modes.get(&output) {
            return Some(*pending);
        }
        self.glfw.with_connected_monitors(|_, monitors| {
            monitors
                .get(output)
                .and_then(|monitor| monitor.get_video_mode())
                .map(|mode| to_display_mode(output, &mode))
        })
    }

    fn apply_mode(&mut self, mode: &DisplayMode) -> BackendResult<()> {
        if mode.output >= self.output_count() {
            return Err(BackendError::InvalidOutput(mode.output));
        }

        let presenting = self
            .windows
            .iter()
            .find(|(_, window)| window.fullscreen_on == Some(mode.output))
            .map(|(id, _)| *id);
        match presenting {
            Some(window) => self.present_fullscreen(window, mode),
            None => {
                log::debug!("No full-screen window on output {}, keeping {mode} pending", mode.output);
                self.pending_modes.insert(mode.output, *mode);
                Ok(())
            }
        }
    }

    fn present_fullscreen(&mut self, window: u64, mode: &DisplayMode) -> BackendResult<()> {
        let Self { glfw, windows, pending_modes, .. } = self;
        let native = windows
            .get_mut(&window)
            .ok_or(BackendError::UnknownWindow(WindowId::from_raw(window)))?;
        if native.fullscreen_on.is_none() {
            native.windowed = native.geometry();
        }

        glfw.with_connected_monitors(|_, monitors| {
            let monitor = monitors
                .get(mode.output)
                .ok_or(BackendError::InvalidOutput(mode.output))?;
            let monitor: &glfw::Monitor = monitor;
            native.handle.set_monitor(
                glfw::WindowMode::FullScreen(monitor),
                0,
                0,
                mode.width,
                mode.height,
                Some(whole_hz(mode.refresh_rate_hz)),
            );
            Ok(())
        })?;

        native.fullscreen_on = Some(mode.output);
        pending_modes.remove(&mode.output);
        Ok(())
    }

    fn leave_fullscreen(&mut self, window: WindowId) -> BackendResult<()> {
        let native = self.window(window)?;
        let Some(output) = native.fullscreen_on.take() else {
            return Ok(());
        };
        let windowed = native.windowed;
        native.handle.set_monitor(
            glfw::WindowMode::Windowed,
            windowed.x,
            windowed.y,
            windowed.width,
            windowed.height,
            None,
        );
        self.pending_modes.remove(&output);
        Ok(())
    }

    fn create_window(&mut self, descriptor: &WindowDescriptor) -> BackendResult<WindowId> {
        let geometry = descriptor.geometry;
        let origin = self.glfw.with_connected_monitors(|_, monitors| {
            monitors.get(descriptor.output).map(|monitor| monitor.get_pos())
        });
        let Some((origin_x, origin_y)) = origin else {
            return Err(BackendError::InvalidOutput(descriptor.output));
        };

        let (mut handle, events) = self
            .glfw
            .create_window(
                geometry.width,
                geometry.height,
                &descriptor.title,
                glfw::WindowMode::Windowed,
            )
            .ok_or_else(|| BackendError::WindowCreationFailed(descriptor.title.clone()))?;

        handle.set_pos(origin_x + geometry.x, origin_y + geometry.y);
        handle.set_pos_polling(true);
        handle.set_size_polling(true);
        handle.set_close_polling(true);
        handle.set_cursor_enter_polling(true);

        let id = self.allocate_id();
        let mut native = NativeWindow {
            handle,
            events,
            fullscreen_on: None,
            windowed: geometry,
        };
        native.windowed = native.geometry();
        self.windows.insert(id, native);
        Ok(WindowId::from_raw(id))
    }

    fn output_of(&mut self, window: WindowId) -> Option<usize> {
        let Self { glfw, windows, .. } = self;
        let native = windows.get(&window.raw())?;
        if native.fullscreen_on.is_some() {
            return native.fullscreen_on;
        }

        let geometry = native.geometry();
        let center_x = geometry.x.saturating_add(to_signed(geometry.width / 2));
        let center_y = geometry.y.saturating_add(to_signed(geometry.height / 2));
        glfw.with_connected_monitors(|_, monitors| {
            monitors.iter().position(|monitor| {
                let (left, top) = monitor.get_pos();
                monitor.get_video_mode().is_some_and(|mode| {
                    (left..left.saturating_add(to_signed(mode.width))).contains(&center_x)
                        && (top..top.saturating_add(to_signed(mode.height))).contains(&center_y)
                })
            })
        })
    }
}

/// Display backend running GLFW on a dedicated thread
pub struct GlfwBackend {
    jobs: Sender<Job>,
    thread: Option<JoinHandle<()>>,
}

impl GlfwBackend {
    /// Start the display thread and initialize GLFW on it
    ///
    /// Returns the backend and the receiving end of its platform events; feed
    /// those to a [`ScreenChangeMonitor`](super::ScreenChangeMonitor).
    pub fn spawn() -> BackendResult<(Self, Receiver<PlatformEvent>)> {
        let (event_tx, event_rx) = unbounded();
        let (job_tx, job_rx) = unbounded::<Job>();
        let (ready_tx, ready_rx) = bounded(1);

        let thread = thread::Builder::new()
            .name("glfw-display".to_string())
            .spawn(move || match DisplayThread::init(event_tx) {
                Ok(display) => {
                    let _ = ready_tx.send(Ok(()));
                    display.run(&job_rx);
                }
                Err(err) => {
                    let _ = ready_tx.send(Err(err));
                }
            })
            .map_err(|err| BackendError::InitializationFailed(err.to_string()))?;

        ready_rx.recv().map_err(|_| BackendError::Disconnected)??;
        log::info!("GLFW display thread started");

        Ok((
            Self {
                jobs: job_tx,
                thread: Some(thread),
            },
            event_rx,
        ))
    }

    /// Run `job` on the display thread and wait for its result
    fn call<T, F>(&self, job: F) -> BackendResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut DisplayThread) -> T + Send + 'static,
    {
        let (reply_tx, reply_rx) = bounded(1);
        self.jobs
            .send(Box::new(move |display: &mut DisplayThread| {
                let _ = reply_tx.send(job(display));
            }))
            .map_err(|_| BackendError::Disconnected)?;
        reply_rx.recv().map_err(|_| BackendError::Disconnected)
    }
}

impl Drop for GlfwBackend {
    fn drop(&mut self) {
        let _ = self.jobs.send(Box::new(|display: &mut DisplayThread| display.running = false));
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("GLFW display thread panicked");
            }
        }
    }
}

impl DisplayBackend for GlfwBackend {
    fn output_count(&self) -> usize {
        self.call(DisplayThread::output_count).unwrap_or(0)
    }

    fn output_name(&self, output: usize) -> Option<String> {
        self.call(move |display| display.output_name(output)).ok().flatten()
    }

    fn video_modes(&self, output: usize) -> Vec<DisplayMode> {
        self.call(move |display| display.video_modes(output))
            .unwrap_or_default()
    }

    fn current_mode(&self, output: usize) -> Option<DisplayMode> {
        self.call(move |display| display.current_mode(output)).ok().flatten()
    }

    fn apply_mode(&mut self, mode: &DisplayMode) -> BackendResult<()> {
        let mode = *mode;
        self.call(move |display| display.apply_mode(&mode))?
    }

    fn set_outputs_blanked(&mut self, _keep: usize, _blanked: bool) -> BackendResult<()> {
        Err(BackendError::Unsupported("blanking outputs"))
    }

    fn create_window(&mut self, descriptor: &WindowDescriptor) -> BackendResult<WindowId> {
        let descriptor = descriptor.clone();
        self.call(move |display| display.create_window(&descriptor))?
    }

    fn destroy_window(&mut self, window: WindowId) -> BackendResult<()> {
        self.call(move |display| {
            display
                .windows
                .remove(&window.raw())
                .map(|_| ())
                .ok_or(BackendError::UnknownWindow(window))
        })?
    }

    fn create_surface(&mut self, window: WindowId) -> BackendResult<SurfaceId> {
        self.call(move |display| {
            display.window(window)?;
            let id = display.allocate_id();
            display.surfaces.insert(id, window.raw());
            Ok(SurfaceId::from_raw(id))
        })?
    }

    fn destroy_surface(&mut self, surface: SurfaceId) -> BackendResult<()> {
        self.call(move |display| {
            display
                .surfaces
                .remove(&surface.raw())
                .map(|_| ())
                .ok_or(BackendError::UnknownSurface(surface))
        })?
    }

    fn is_surface_valid(&self, surface: SurfaceId) -> bool {
        self.call(move |display| {
            display
                .surfaces
                .get(&surface.raw())
                .is_some_and(|window| display.windows.contains_key(window))
        })
        .unwrap_or(false)
    }

    fn resize_surface(&mut self, surface: SurfaceId, _width: u32, _height: u32) -> BackendResult<()> {
        // The framebuffer follows the window size
        self.call(move |display| {
            display
                .surfaces
                .get(&surface.raw())
                .filter(|window| display.windows.contains_key(window))
                .map(|_| ())
                .ok_or(BackendError::UnknownSurface(surface))
        })?
    }

    fn window_geometry(&self, window: WindowId) -> Option<WindowGeometry> {
        self.call(move |display| display.windows.get(&window.raw()).map(NativeWindow::geometry))
            .ok()
            .flatten()
    }

    fn set_window_geometry(&mut self, window: WindowId, geometry: WindowGeometry) -> BackendResult<()> {
        self.call(move |display| {
            let native = display.window(window)?;
            native.handle.set_pos(geometry.x, geometry.y);
            native.handle.set_size(to_signed(geometry.width), to_signed(geometry.height));
            if native.fullscreen_on.is_none() {
                native.windowed = geometry;
            }
            Ok(())
        })?
    }

    fn window_output(&self, window: WindowId) -> Option<usize> {
        self.call(move |display| display.output_of(window)).ok().flatten()
    }

    fn set_fullscreen(&mut self, window: WindowId, mode: Option<&DisplayMode>) -> BackendResult<()> {
        let mode = mode.copied();
        self.call(move |display| match mode {
            Some(mode) => {
                let target = display.pending_modes.get(&mode.output).copied().unwrap_or(mode);
                display.present_fullscreen(window.raw(), &target)
            }
            None => display.leave_fullscreen(window),
        })?
    }

    fn minimize(&mut self, window: WindowId) -> BackendResult<()> {
        self.call(move |display| display.window(window).map(|native| native.handle.iconify()))?
    }

    fn restore(&mut self, window: WindowId) -> BackendResult<()> {
        self.call(move |display| display.window(window).map(|native| native.handle.restore()))?
    }

    fn hide(&mut self, window: WindowId) -> BackendResult<()> {
        self.call(move |display| display.window(window).map(|native| native.handle.hide()))?
    }

    fn show(&mut self, window: WindowId, raise: bool) -> BackendResult<()> {
        self.call(move |display| {
            display.window(window).map(|native| {
                native.handle.show();
                if raise {
                    native.handle.focus();
                }
            })
        })?
    }
}

fn to_display_mode(output: usize, mode: &glfw::VidMode) -> DisplayMode {
    DisplayMode::new(output, mode.width, mode.height, f64::from(mode.refresh_rate))
}

fn to_unsigned(value: i32) -> u32 {
    u32::try_from(value).unwrap_or(0)
}

fn to_signed(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn whole_hz(refresh_rate_hz: f64) -> u32 {
    refresh_rate_hz.round().max(0.0) as u32
}
