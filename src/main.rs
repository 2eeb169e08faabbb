// =============================================================================
// VOLCANO - Windowing shim
// =============================================================================
//
// Owns the winit window and one `Volcano` handle, and routes window events
// into it:
//
//   resumed          -> create window, Volcano::create
//   Resized          -> Volcano::resize (rebuild deferred to the next draw)
//   any event        -> overlay GUI first; events it consumes stop there
//   RedrawRequested  -> overlay input, Volcano::draw, overlay output
//   KeyboardInput    -> quit / fullscreen / overlay / thread count
//   exiting          -> Volcano::destroy
//
// Any error out of the renderer is fatal: it is logged and the process exits
// with a failure status.
//
// =============================================================================

use anyhow::{anyhow, Context, Result};
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Arc;
use std::time::Instant;
use volcano::frame::{Extent, TickOutcome};
use volcano::{Config, CreateInfo, Volcano};
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Fullscreen, Window, WindowAttributes},
};

fn main() -> Result<()> {
    let mut config = Config::load();

    if let Err(e) = init_logging(&config) {
        eprintln!("Failed to initialise logging: {:#}", e);
    }
    log::info!("Starting volcano");
    config.flush_diagnostics();
    log::info!(
        "Window: {}x{} ({})",
        config.window.width,
        config.window.height,
        if config.window.fullscreen { "fullscreen" } else { "windowed" }
    );
    log::info!(
        "Present mode: {}, {} threads, {}x{} instances",
        config.graphics.present_mode,
        config.graphics.thread_count,
        config.graphics.instances_x,
        config.graphics.instances_y
    );

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    match app.fatal.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// env_logger at Info (Debug when verbose); RUST_LOG overrides. Optionally
/// piped into a freshly truncated log file.
fn init_logging(config: &Config) -> Result<()> {
    use env_logger::{Builder, Env, Target};
    use log::LevelFilter;

    let level = if config.debug.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    let mut builder = Builder::new();
    builder.filter_level(level);
    builder.parse_env(Env::default());

    if config.debug.log_to_file {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&config.debug.log_file)
            .with_context(|| format!("Failed to open log file {:?}", config.debug.log_file))?;
        writeln!(file, "=== volcano log ===")?;
        writeln!(file, "Started: {:?}", std::time::SystemTime::now())?;
        writeln!(file)?;
        builder.target(Target::Pipe(Box::new(file)));
    }

    builder.try_init()?;
    Ok(())
}

// =============================================================================
// KEY BINDINGS
// =============================================================================

struct KeyBindings {
    quit: Option<KeyCode>,
    fullscreen: Option<KeyCode>,
    overlay: Option<KeyCode>,
    more_threads: Option<KeyCode>,
    fewer_threads: Option<KeyCode>,
}

impl KeyBindings {
    fn from_config(config: &Config) -> Self {
        let controls = &config.controls;
        let bind = |name: &str| {
            let key = parse_key(name);
            if key.is_none() {
                log::warn!("Unknown key '{}', binding disabled", name);
            }
            key
        };
        Self {
            quit: bind(controls.quit_key.as_str()),
            fullscreen: bind(controls.fullscreen_key.as_str()),
            overlay: bind(controls.overlay_key.as_str()),
            more_threads: bind(controls.more_threads_key.as_str()),
            fewer_threads: bind(controls.fewer_threads_key.as_str()),
        }
    }
}

/// Map a winit `KeyCode` name ("F11", "Escape", "KeyO", "Equal") to the key.
fn parse_key(name: &str) -> Option<KeyCode> {
    let key = match name {
        "Escape" => KeyCode::Escape,
        "Space" => KeyCode::Space,
        "Enter" => KeyCode::Enter,
        "Tab" => KeyCode::Tab,
        "Backspace" => KeyCode::Backspace,
        "Equal" => KeyCode::Equal,
        "Minus" => KeyCode::Minus,
        "NumpadAdd" => KeyCode::NumpadAdd,
        "NumpadSubtract" => KeyCode::NumpadSubtract,
        "ArrowUp" => KeyCode::ArrowUp,
        "ArrowDown" => KeyCode::ArrowDown,
        "ArrowLeft" => KeyCode::ArrowLeft,
        "ArrowRight" => KeyCode::ArrowRight,
        "F1" => KeyCode::F1,
        "F2" => KeyCode::F2,
        "F3" => KeyCode::F3,
        "F4" => KeyCode::F4,
        "F5" => KeyCode::F5,
        "F6" => KeyCode::F6,
        "F7" => KeyCode::F7,
        "F8" => KeyCode::F8,
        "F9" => KeyCode::F9,
        "F10" => KeyCode::F10,
        "F11" => KeyCode::F11,
        "F12" => KeyCode::F12,
        _ => return parse_letter_or_digit(name),
    };
    Some(key)
}

fn parse_letter_or_digit(name: &str) -> Option<KeyCode> {
    const LETTERS: [KeyCode; 26] = [
        KeyCode::KeyA, KeyCode::KeyB, KeyCode::KeyC, KeyCode::KeyD, KeyCode::KeyE,
        KeyCode::KeyF, KeyCode::KeyG, KeyCode::KeyH, KeyCode::KeyI, KeyCode::KeyJ,
        KeyCode::KeyK, KeyCode::KeyL, KeyCode::KeyM, KeyCode::KeyN, KeyCode::KeyO,
        KeyCode::KeyP, KeyCode::KeyQ, KeyCode::KeyR, KeyCode::KeyS, KeyCode::KeyT,
        KeyCode::KeyU, KeyCode::KeyV, KeyCode::KeyW, KeyCode::KeyX, KeyCode::KeyY,
        KeyCode::KeyZ,
    ];
    const DIGITS: [KeyCode; 10] = [
        KeyCode::Digit0, KeyCode::Digit1, KeyCode::Digit2, KeyCode::Digit3, KeyCode::Digit4,
        KeyCode::Digit5, KeyCode::Digit6, KeyCode::Digit7, KeyCode::Digit8, KeyCode::Digit9,
    ];

    let single = |rest: &str| {
        let mut chars = rest.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Some(c),
            _ => None,
        }
    };

    if let Some(c) = name.strip_prefix("Key").and_then(single) {
        if c.is_ascii_uppercase() {
            return Some(LETTERS[(c as u8 - b'A') as usize]);
        }
    }
    if let Some(c) = name.strip_prefix("Digit").and_then(single) {
        if c.is_ascii_digit() {
            return Some(DIGITS[(c as u8 - b'0') as usize]);
        }
    }
    None
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// Field order matters for Drop: the renderer goes before the window it
/// presents to.
struct App {
    volcano: Option<Volcano>,
    /// Translates window events into overlay input.
    gui: Option<egui_winit::State>,
    window: Option<Arc<Window>>,
    config: Config,
    keys: KeyBindings,
    is_fullscreen: bool,
    /// First fatal error; reported from `main` once the loop has exited.
    fatal: Option<anyhow::Error>,

    frame_count: u32,
    last_fps_update: Instant,
    last_frame_time: Instant,
}

impl App {
    fn new(config: Config) -> Self {
        let now = Instant::now();
        Self {
            volcano: None,
            gui: None,
            window: None,
            keys: KeyBindings::from_config(&config),
            is_fullscreen: config.window.fullscreen,
            config,
            fatal: None,
            frame_count: 0,
            last_fps_update: now,
            last_frame_time: now,
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        log::error!("Fatal: {:#}", error);
        if let Some(mut volcano) = self.volcano.take() {
            if let Err(e) = volcano.destroy() {
                log::error!("Shutdown after fatal error failed: {:#}", e);
            }
        }
        self.fatal.get_or_insert(error);
        event_loop.exit();
    }

    fn init_renderer(&self, window: &Window) -> Result<Volcano> {
        let size = window.inner_size();
        let logical = size.to_logical::<u32>(window.scale_factor());
        let info = CreateInfo {
            window_size: Extent::new(logical.width, logical.height),
            framebuffer_size: Extent::new(size.width, size.height),
            resource_path: &self.config.scene.resource_path,
            verbose: self.config.debug.verbose,
            config: &self.config,
        };
        Volcano::create(window, &info)
    }

    fn render_frame(&mut self, event_loop: &ActiveEventLoop) {
        let Some(volcano) = self.volcano.as_mut().filter(|v| v.is_initialized()) else {
            return;
        };
        if let (Some(gui), Some(window)) = (self.gui.as_mut(), self.window.as_ref()) {
            volcano.queue_overlay_input(gui.take_egui_input(window));
        }
        let result = volcano.draw();
        if let (Some(gui), Some(window), Some(output)) =
            (self.gui.as_mut(), self.window.as_ref(), volcano.take_overlay_output())
        {
            gui.handle_platform_output(window, output);
        }

        match result {
            Ok(TickOutcome::Presented) => self.update_fps(),
            Ok(TickOutcome::Held | TickOutcome::OutOfDate) => {}
            Err(e) => self.fail(event_loop, e.context("Frame failed")),
        }
    }

    fn toggle_fullscreen(&mut self) {
        if let Some(ref window) = self.window {
            self.is_fullscreen = !self.is_fullscreen;

            if self.is_fullscreen {
                window.set_fullscreen(Some(Fullscreen::Borderless(None)));
                log::info!("Entered fullscreen mode");
            } else {
                window.set_fullscreen(None);
                log::info!("Exited fullscreen mode");
            }
            // winit follows up with a Resized event
        }
    }

    fn handle_key(&mut self, event_loop: &ActiveEventLoop, key: KeyCode) {
        let key = Some(key);
        if key == self.keys.quit {
            log::info!("Quit key pressed, exiting...");
            event_loop.exit();
        } else if key == self.keys.fullscreen {
            self.toggle_fullscreen();
        } else if let Some(volcano) = self.volcano.as_mut() {
            if key == self.keys.overlay {
                let visible = volcano.toggle_overlay();
                log::info!("Overlay {}", if visible { "shown" } else { "hidden" });
            } else if key == self.keys.more_threads {
                volcano.adjust_thread_count(1);
            } else if key == self.keys.fewer_threads {
                volcano.adjust_thread_count(-1);
            }
        }
    }

    fn update_fps(&mut self) {
        if !self.config.debug.show_fps {
            return;
        }

        let now = Instant::now();
        let frame_time = now.duration_since(self.last_frame_time).as_secs_f32();
        self.last_frame_time = now;
        self.frame_count += 1;

        let elapsed = now.duration_since(self.last_fps_update).as_secs_f32();
        if elapsed >= 1.0 {
            let fps = self.frame_count as f32 / elapsed;
            if let Some(ref window) = self.window {
                let mode = if self.is_fullscreen { "fullscreen" } else { "windowed" };
                window.set_title(&format!(
                    "{} - {:.0} FPS ({:.2}ms) [{}]",
                    self.config.window.title,
                    fps,
                    frame_time * 1000.0,
                    mode
                ));
            }
            self.frame_count = 0;
            self.last_fps_update = now;
        }
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let mut window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));
        if self.config.window.fullscreen {
            window_attributes = window_attributes.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                self.fail(event_loop, anyhow!(e).context("Failed to create window"));
                return;
            }
        };

        match self.init_renderer(&window) {
            Ok(volcano) => {
                self.gui = volcano.overlay_context().map(|ctx| {
                    egui_winit::State::new(
                        ctx,
                        egui::ViewportId::ROOT,
                        &*window,
                        Some(window.scale_factor() as f32),
                        None,
                        None,
                    )
                });
                self.volcano = Some(volcano);
            }
            Err(e) => {
                self.fail(event_loop, e.context("Failed to initialize renderer"));
                return;
            }
        }
        self.window = Some(window);
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        let consumed = match (self.gui.as_mut(), self.window.as_ref()) {
            (Some(gui), Some(window)) => gui.on_window_event(window, &event).consumed,
            _ => false,
        };

        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                event_loop.exit();
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
                if let Some(volcano) = self.volcano.as_mut() {
                    volcano.resize(size.width, size.height);
                }
            }

            WindowEvent::RedrawRequested => self.render_frame(event_loop),

            WindowEvent::KeyboardInput { event, .. } if !consumed => {
                if event.state.is_pressed() && !event.repeat {
                    if let PhysicalKey::Code(key) = event.physical_key {
                        self.handle_key(event_loop, key);
                    }
                }
            }

            _ => {}
        }
    }

    /// Request continuous redraws.
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        self.gui = None;
        if let Some(mut volcano) = self.volcano.take() {
            if let Err(e) = volcano.destroy() {
                log::error!("Failed to shut down renderer: {:#}", e);
                self.fatal.get_or_insert(e);
            }
        }
        log::info!("Cleanup complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_keys_parse() {
        assert_eq!(parse_key("F11"), Some(KeyCode::F11));
        assert_eq!(parse_key("Escape"), Some(KeyCode::Escape));
        assert_eq!(parse_key("Equal"), Some(KeyCode::Equal));
    }

    #[test]
    fn letters_and_digits_parse() {
        assert_eq!(parse_key("KeyA"), Some(KeyCode::KeyA));
        assert_eq!(parse_key("KeyZ"), Some(KeyCode::KeyZ));
        assert_eq!(parse_key("Digit7"), Some(KeyCode::Digit7));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert_eq!(parse_key("Keya"), None);
        assert_eq!(parse_key("KeyAB"), None);
        assert_eq!(parse_key("Digit"), None);
        assert_eq!(parse_key("Hyper"), None);
    }

    #[test]
    fn default_bindings_resolve() {
        let keys = KeyBindings::from_config(&Config::default());
        assert_eq!(keys.quit, Some(KeyCode::Escape));
        assert_eq!(keys.fullscreen, Some(KeyCode::F11));
        assert_eq!(keys.overlay, Some(KeyCode::F1));
        assert_eq!(keys.more_threads, Some(KeyCode::Equal));
        assert_eq!(keys.fewer_threads, Some(KeyCode::Minus));
    }
}
