//! Surface lifecycle demo
//!
//! Opens the main window, goes full-screen at a film refresh rate, survives a
//! display hot-plug and returns to the desktop. By default the outputs are
//! simulated; build with `--features glfw` and pass `--glfw` to drive a real
//! window.
//!
//! Usage: `surface_demo [config.toml|config.ron] [--glfw]`

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::unbounded;
use display_engine::foundation::logging;
use display_engine::prelude::*;
use display_engine::window::HeadlessControl;

const DEFAULT_CONFIG_PATH: &str = "display.toml";

/// Stand-in for a video renderer holding GPU objects
#[derive(Default)]
struct VideoRenderer {
    device_ready: AtomicBool,
    resets: AtomicUsize,
}

impl VideoRenderer {
    fn is_ready(&self) -> bool {
        self.device_ready.load(Ordering::Acquire)
    }
}

impl DisplayResource for VideoRenderer {
    fn on_lost_device(&self) {
        self.device_ready.store(false, Ordering::Release);
        log::info!("Renderer: releasing textures and swap chain");
    }

    fn on_reset_device(&self) {
        let resets = self.resets.fetch_add(1, Ordering::AcqRel) + 1;
        self.device_ready.store(true, Ordering::Release);
        log::info!("Renderer: device back, resources recreated (reset #{resets})");
    }
}

fn wait_for_device(renderer: &VideoRenderer, system: &WindowSystem) -> bool {
    let deadline = Instant::now() + system.config().settle_delay() * 4;
    while Instant::now() < deadline {
        if renderer.is_ready() && system.phase() == LifecyclePhase::Ready {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    false
}

fn run_simulated(config: DisplayConfig, renderer: &Arc<VideoRenderer>) -> Result<(), DisplayError> {
    let backend = HeadlessBackend::new(vec![HeadlessOutput::full_hd("Living Room TV")]);
    let control: HeadlessControl = backend.control();
    let system = WindowSystem::new(backend, config)?;
    system.register(renderer);
    renderer.device_ready.store(true, Ordering::Release);

    for (output, name) in system.connected_outputs().iter().enumerate() {
        let modes: Vec<String> = system.resolutions(output).map(|mode| mode.to_string()).collect();
        log::info!("Output {output} '{name}': {}", modes.join(", "));
    }

    let windowed = DisplayMode::new(0, system.config().window.width, system.config().window.height, 0.0);
    system.create_new_window(&system.config().window.title, false, &windowed)?;

    log::info!("Switching to full-screen for 23.976 Hz playback");
    let film = DisplayMode::new(0, 1920, 1080, 23.976);
    if !system.set_full_screen(true, &film, system.config().blank_other_displays) {
        log::warn!("Full-screen switch failed, staying windowed");
    }
    if !wait_for_device(renderer, &system) {
        log::warn!("Device did not come back after the mode switch");
    }

    log::info!("Simulating a projector being plugged in");
    control.add_output(HeadlessOutput::new("Projector").with_mode(1280, 720, 60.0));
    let (events, receiver) = unbounded();
    let monitor = system.screen_monitor();
    // Ignore send errors: the receiver lives until the end of this function
    let _ = events.send(PlatformEvent::OutputConnected {
        name: "Projector".to_string(),
    });
    let _ = events.send(PlatformEvent::CursorEntered(true));
    let status = monitor.pump(&receiver);
    log::info!("Pumped {} platform event(s)", status.processed);

    if !wait_for_device(renderer, &system) {
        log::warn!("Device did not come back after the hot-plug");
    }
    log::info!("Connected outputs: {}", system.connected_outputs().join(", "));

    if !system.set_full_screen(false, &windowed, false) {
        log::warn!("Could not leave full-screen");
    }
    wait_for_device(renderer, &system);

    system.unregister(renderer);
    system.shutdown();
    Ok(())
}

#[cfg(feature = "glfw")]
fn run_native(config: DisplayConfig, renderer: &Arc<VideoRenderer>) -> Result<(), DisplayError> {
    use display_engine::window::GlfwBackend;

    let (backend, events) = GlfwBackend::spawn()?;
    let system = WindowSystem::new(backend, config)?;
    system.register(renderer);
    renderer.device_ready.store(true, Ordering::Release);

    let window = &system.config().window;
    let resolution = DisplayMode::new(window.output, window.width, window.height, window.refresh_rate_hz);
    system.create_new_window(&window.title, window.fullscreen, &resolution)?;

    let monitor = system.screen_monitor();
    loop {
        let status = monitor.pump(&events);
        if status.close_requested || status.disconnected {
            break;
        }
        thread::sleep(Duration::from_millis(16));
    }

    system.unregister(renderer);
    system.shutdown();
    Ok(())
}

#[cfg(not(feature = "glfw"))]
fn run_native(_config: DisplayConfig, _renderer: &Arc<VideoRenderer>) -> Result<(), DisplayError> {
    log::error!("Built without the `glfw` feature");
    Err(DisplayError::Config("native backend not available".to_string()))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init_with_level("info");

    let args: Vec<String> = std::env::args().skip(1).collect();
    let native = args.iter().any(|arg| arg == "--glfw");
    let config_path = args
        .iter()
        .find(|arg| !arg.starts_with("--"))
        .map_or(DEFAULT_CONFIG_PATH, String::as_str);

    let config = DisplayConfig::load_or_default(config_path)?;
    config.validate().map_err(DisplayError::Config)?;
    log::info!("Settle delay {:?}", config.settle_delay());

    let renderer = Arc::new(VideoRenderer::default());
    if native {
        run_native(config, &renderer)?;
    } else {
        run_simulated(config, &renderer)?;
    }

    log::info!(
        "Done after {} device reset(s)",
        renderer.resets.load(Ordering::Acquire)
    );
    Ok(())
}
