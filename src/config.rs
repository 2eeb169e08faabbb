// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// Every section falls back to defaults, so a missing or partial config.toml
// still produces a runnable setup. Values that feed the frame core (thread
// count, instance grid) are clamped here, once, at load time.
//
// Loading runs before the logger exists, so anything worth reporting is kept
// as a `Diagnostic` and logged by the caller once logging is set up.

use anyhow::{Context, Result};
use ash::vk;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Bounds for the number of command-recording threads.
pub const MIN_THREAD_COUNT: usize = 2;
pub const MAX_THREAD_COUNT: usize = 32;

/// A message produced while loading, waiting for the logger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub level: log::Level,
    pub message: String,
}

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub scene: SceneConfig,
    pub debug: DebugConfig,
    pub controls: ControlsConfig,
    #[serde(skip)]
    pub diagnostics: Vec<Diagnostic>,
}

/// Window settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub fullscreen: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "volcano".to_string(),
            width: 1280,
            height: 720,
            fullscreen: false,
        }
    }
}

/// Graphics settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    pub present_mode: String,
    /// Clear the scene before drawing; off keeps the previous frame's color.
    pub clear_enabled: bool,
    pub clear_color: [f32; 4],
    /// Command-buffer threads, including the one reserved for the primary buffer.
    pub thread_count: usize,
    pub instances_x: u32,
    pub instances_y: u32,
    /// Upper bound for fence and image-acquire waits.
    pub frame_timeout_ms: u64,
}

impl GraphicsConfig {
    /// Clear color without alpha; the swapchain image is always opaque.
    pub fn clear_rgb(&self) -> [f32; 3] {
        let [r, g, b, _] = self.clear_color;
        [r, g, b]
    }
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            present_mode: "mailbox".to_string(),
            clear_enabled: true,
            clear_color: [0.4, 0.4, 0.5, 1.0],
            thread_count: 4,
            instances_x: 8,
            instances_y: 8,
            frame_timeout_ms: 5000,
        }
    }
}

/// Scene assets, relative to `resource_path`
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    pub resource_path: PathBuf,
    pub texture: String,
    /// Optional OBJ model; the built-in quad is drawn when unset.
    pub model: Option<String>,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            resource_path: PathBuf::from("./resources/"),
            texture: "images/checker.png".to_string(),
            model: None,
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    /// Print loader environment, layers and extensions during startup.
    pub verbose: bool,
    pub log_to_file: bool,
    pub log_file: String,
    pub show_fps: bool,
    pub show_overlay: bool,
    pub hot_reload_shaders: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            verbose: false,
            log_to_file: false,
            log_file: "volcano.log".to_string(),
            show_fps: true,
            show_overlay: true,
            hot_reload_shaders: false,
        }
    }
}

/// Control key bindings (winit `KeyCode` names)
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ControlsConfig {
    pub fullscreen_key: String,
    pub overlay_key: String,
    pub more_threads_key: String,
    pub fewer_threads_key: String,
    pub quit_key: String,
}

impl Default for ControlsConfig {
    fn default() -> Self {
        Self {
            fullscreen_key: "F11".to_string(),
            overlay_key: "F1".to_string(),
            more_threads_key: "Equal".to_string(),
            fewer_threads_key: "Minus".to_string(),
            quit_key: "Escape".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the path given as the first argument, or
    /// `config.toml`, falling back to defaults
    pub fn load() -> Self {
        let path = std::env::args()
            .nth(1)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("config.toml"));
        Self::load_or_default(&path)
    }

    /// Like `load_from_path`, but a read or parse failure yields defaults
    /// with a warning attached.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        Self::load_from_path(path).unwrap_or_else(|e| {
            let mut config = Config::default();
            config.note(
                log::Level::Warn,
                format!("Failed to load {:?}: {:#}. Using defaults.", path, e),
            );
            config
        })
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            let mut config = Config::default();
            config.note(
                log::Level::Info,
                format!("Config file not found at {:?}, using defaults", path),
            );
            return Ok(config);
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let mut config = Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        config.note(log::Level::Info, format!("Loaded configuration from {:?}", path));
        Ok(config)
    }

    /// Parse a TOML document and normalise the values the renderer depends on.
    pub fn parse(content: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(content)?;
        config.normalize();
        Ok(config)
    }

    fn normalize(&mut self) {
        let requested = self.graphics.thread_count;
        self.graphics.thread_count = clamp_thread_count(requested);
        if requested != self.graphics.thread_count {
            let message = format!(
                "thread_count {} out of range, using {}",
                requested, self.graphics.thread_count
            );
            self.note(log::Level::Warn, message);
        }
        self.graphics.instances_x = self.graphics.instances_x.max(1);
        self.graphics.instances_y = self.graphics.instances_y.max(1);
    }

    fn note(&mut self, level: log::Level, message: String) {
        self.diagnostics.push(Diagnostic { level, message });
    }

    /// Log and clear everything noted while loading. Call once the logger is up.
    pub fn flush_diagnostics(&mut self) {
        for diagnostic in self.diagnostics.drain(..) {
            log::log!(diagnostic.level, "{}", diagnostic.message);
        }
        log::debug!("Config: {:?}", self);
    }

    /// Get present mode as Vulkan enum
    pub fn get_present_mode(&self) -> vk::PresentModeKHR {
        match self.graphics.present_mode.to_lowercase().as_str() {
            "immediate" => vk::PresentModeKHR::IMMEDIATE,
            "mailbox" => vk::PresentModeKHR::MAILBOX,
            "fifo" => vk::PresentModeKHR::FIFO,
            "fifo_relaxed" => vk::PresentModeKHR::FIFO_RELAXED,
            _ => {
                log::warn!(
                    "Unknown present mode '{}', defaulting to FIFO",
                    self.graphics.present_mode
                );
                vk::PresentModeKHR::FIFO
            }
        }
    }

    pub fn frame_timeout(&self) -> Duration {
        Duration::from_millis(self.graphics.frame_timeout_ms)
    }
}

pub fn clamp_thread_count(count: usize) -> usize {
    count.clamp(MIN_THREAD_COUNT, MAX_THREAD_COUNT)
}
