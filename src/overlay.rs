// =============================================================================
// OVERLAY - Immediate-mode debug GUI drawn on top of the scene
// =============================================================================
//
// The overlay is a client of the frame core: it runs an egui frame on the
// driver thread and hands the tessellated output to the backend, which draws
// it into the primary buffer inside a second render pass. It never owns a
// surface, a pass or a command buffer.
//
// Widgets write into `OverlayControls`; the driver reads them back after each
// GUI frame, so a slider drag becomes an ordinary deferred rebuild request.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use egui::epaint::ClippedPrimitive;
use egui::{Color32, PlatformOutput, RawInput, TexturesDelta};

use crate::config::{MAX_THREAD_COUNT, MIN_THREAD_COUNT};
use crate::frame::Extent;

/// Frames kept for the graph.
pub const HISTORY_LEN: usize = 120;

const BAR_WIDTH: f32 = 2.0;
const PLOT_HEIGHT: f32 = 64.0;
/// Frame time that fills the plot height.
const GRAPH_CEILING_MS: f32 = 50.0;

pub const GREEN: Color32 = Color32::from_rgb(51, 217, 77);
pub const YELLOW: Color32 = Color32::from_rgb(242, 204, 51);
pub const RED: Color32 = Color32::from_rgb(230, 51, 51);

#[derive(Debug, Clone)]
pub struct FrameTimeHistory {
    samples: VecDeque<Duration>,
    capacity: usize,
}

impl Default for FrameTimeHistory {
    fn default() -> Self {
        Self::with_capacity(HISTORY_LEN)
    }
}

impl FrameTimeHistory {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, frame_time: Duration) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(frame_time);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Duration> {
        self.samples.iter()
    }

    pub fn average(&self) -> Option<Duration> {
        if self.samples.is_empty() {
            return None;
        }
        Some(self.samples.iter().sum::<Duration>() / self.samples.len() as u32)
    }
}

/// Bar colour for one frame time: green at 60 Hz or better, yellow down to 30 Hz.
pub fn bar_color(frame_time: Duration) -> Color32 {
    let ms = frame_time.as_secs_f32() * 1000.0;
    if ms < 16.7 {
        GREEN
    } else if ms < 33.4 {
        YELLOW
    } else {
        RED
    }
}

/// Bar height in points, never less than one so a fast frame stays visible.
pub fn bar_height(frame_time: Duration, plot_height: f32) -> f32 {
    let ms = frame_time.as_secs_f32() * 1000.0;
    ((ms / GRAPH_CEILING_MS).clamp(0.0, 1.0) * plot_height).max(1.0)
}

/// Values the GUI edits.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayControls {
    pub clear_enabled: bool,
    pub clear_color: [f32; 3],
    pub thread_count: usize,
}

impl OverlayControls {
    /// Clear value for the scene pass, or `None` to keep the previous contents.
    pub fn clear_value(&self) -> Option<[f32; 4]> {
        let [r, g, b] = self.clear_color;
        self.clear_enabled.then_some([r, g, b, 1.0])
    }
}

/// Read-only figures for the metrics window.
#[derive(Debug, Clone, Copy)]
pub struct OverlayStats {
    pub extent: Extent,
    pub instances: usize,
    pub segments: usize,
    pub frames: u64,
    pub rebuilds: u64,
}

/// Tessellated output of one GUI frame, in points.
#[derive(Debug, Clone)]
pub struct OverlayFrame {
    pub primitives: Vec<ClippedPrimitive>,
    pub pixels_per_point: f32,
}

pub struct Overlay {
    ctx: egui::Context,
    pub controls: OverlayControls,
    start: Instant,
    input: Option<RawInput>,
    platform_output: Option<PlatformOutput>,
    /// Texture changes not yet applied by the backend.
    textures: TexturesDelta,
}

impl Overlay {
    pub fn new(controls: OverlayControls) -> Self {
        Self {
            ctx: egui::Context::default(),
            controls,
            start: Instant::now(),
            input: None,
            platform_output: None,
            textures: TexturesDelta::default(),
        }
    }

    /// Shared with the windowing layer so it can translate events.
    pub fn context(&self) -> &egui::Context {
        &self.ctx
    }

    /// Input for the next GUI frame. A later call replaces an unused one.
    pub fn queue_input(&mut self, input: RawInput) {
        self.input = Some(input);
    }

    /// Cursor, clipboard and IME requests produced since the last call.
    pub fn take_platform_output(&mut self) -> Option<PlatformOutput> {
        self.platform_output.take()
    }

    pub fn has_texture_updates(&self) -> bool {
        !self.textures.is_empty()
    }

    pub fn take_texture_updates(&mut self) -> TexturesDelta {
        std::mem::take(&mut self.textures)
    }

    /// Run one GUI frame for a framebuffer of `extent` pixels.
    pub fn run(&mut self, extent: Extent, frame_times: &FrameTimeHistory, stats: &OverlayStats) -> OverlayFrame {
        let mut input = self.input.take().unwrap_or_default();
        if input.screen_rect.is_none() {
            // Without a window the framebuffer is the screen, one point per pixel.
            input.screen_rect = Some(egui::Rect::from_min_size(
                egui::Pos2::ZERO,
                egui::vec2(extent.width as f32, extent.height as f32),
            ));
        }
        if input.time.is_none() {
            input.time = Some(self.start.elapsed().as_secs_f64());
        }

        let controls = &mut self.controls;
        let output = self.ctx.run(input, |ctx| build_ui(ctx, controls, frame_times, stats));

        self.textures.append(output.textures_delta);
        match self.platform_output.as_mut() {
            Some(pending) => pending.append(output.platform_output),
            None => self.platform_output = Some(output.platform_output),
        }

        OverlayFrame {
            primitives: self.ctx.tessellate(output.shapes, output.pixels_per_point),
            pixels_per_point: output.pixels_per_point,
        }
    }
}

fn build_ui(ctx: &egui::Context, controls: &mut OverlayControls, frame_times: &FrameTimeHistory, stats: &OverlayStats) {
    egui::Window::new("Render Options")
        .default_pos([8.0, 8.0])
        .resizable(false)
        .show(ctx, |ui| {
            ui.checkbox(&mut controls.clear_enabled, "Clear Enable");
            ui.horizontal(|ui| {
                ui.color_edit_button_rgb(&mut controls.clear_color);
                ui.label("Clear Color");
            });
            ui.add(
                egui::Slider::new(&mut controls.thread_count, MIN_THREAD_COUNT..=MAX_THREAD_COUNT)
                    .text("Recording threads"),
            );
        });

    egui::Window::new("Metrics")
        .default_pos([8.0, 150.0])
        .resizable(false)
        .show(ctx, |ui| {
            match frame_times.average() {
                Some(average) => {
                    let ms = average.as_secs_f32() * 1000.0;
                    ui.label(format!("{:.2} ms/frame ({:.0} FPS)", ms, 1000.0 / ms.max(f32::EPSILON)));
                }
                None => {
                    ui.label("Waiting for frames");
                }
            }
            frame_time_plot(ui, frame_times);
            ui.separator();
            ui.label(format!("Framebuffer: {}", stats.extent));
            ui.label(format!("Instances: {}", stats.instances));
            ui.label(format!("Recording segments: {}", stats.segments));
            ui.label(format!("Frames: {}  Rebuilds: {}", stats.frames, stats.rebuilds));
        });
}

/// One bar per sample, newest on the right, sized to the history so it never
/// grows past its allocation.
fn frame_time_plot(ui: &mut egui::Ui, history: &FrameTimeHistory) {
    let size = egui::vec2(history.capacity() as f32 * BAR_WIDTH, PLOT_HEIGHT);
    let (rect, _) = ui.allocate_exact_size(size, egui::Sense::hover());
    let painter = ui.painter_at(rect);

    let first = history.capacity() - history.len();
    for (i, frame_time) in history.iter().enumerate() {
        let x = rect.left() + ((first + i) as f32 + 0.5) * BAR_WIDTH;
        let top = rect.bottom() - bar_height(*frame_time, PLOT_HEIGHT);
        painter.line_segment(
            [egui::pos2(x, rect.bottom()), egui::pos2(x, top)],
            egui::Stroke::new(BAR_WIDTH, bar_color(*frame_time)),
        );
    }
}
