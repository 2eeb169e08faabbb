// =============================================================================
// VOLCANO - Owned application handle used by the windowing shim
// =============================================================================
//
// create -> (queue_overlay_input? draw | resize | set_overlay_visible | adjust_thread_count)* -> destroy
//
// The shim owns exactly one `Volcano` and routes window events into it. There
// is no global state: everything hangs off this value.

use anyhow::{bail, Context, Result};
use std::path::Path;

use crate::backend::{BackendSettings, DeviceOptions, SurfaceFactory, VulkanBackend, VulkanDevice};
use crate::config::Config;
use crate::frame::{DriverSettings, Extent, FrameDriver, FrameParams, TickOutcome};
use crate::overlay::FrameTimeHistory;
use crate::scene::InstanceGrid;

/// Startup parameters handed over by the windowing shim.
pub struct CreateInfo<'a> {
    pub window_size: Extent,
    pub framebuffer_size: Extent,
    pub resource_path: &'a Path,
    pub verbose: bool,
    pub config: &'a Config,
}

pub struct Volcano {
    driver: Option<FrameDriver<VulkanBackend>>,
}

impl Volcano {
    /// One-time initialization. Errors are fatal to the caller.
    pub fn create(window: &dyn SurfaceFactory, info: &CreateInfo) -> Result<Self> {
        if !info.resource_path.is_dir() {
            bail!("Resource path {:?} is not a directory", info.resource_path);
        }
        let config = info.config;
        log::info!(
            "Creating renderer: window {}, framebuffer {}, resources {:?}",
            info.window_size,
            info.framebuffer_size,
            info.resource_path
        );

        let device = VulkanDevice::new(
            window,
            &DeviceOptions {
                app_name: &config.window.title,
                enable_validation: config.debug.validation_layers,
                verbose: info.verbose,
            },
        )?;

        let settings = BackendSettings {
            resource_path: info.resource_path.to_path_buf(),
            texture: config.scene.texture.clone(),
            model: config.scene.model.clone(),
            grid: InstanceGrid::new(config.graphics.instances_x, config.graphics.instances_y),
            present_mode: config.get_present_mode(),
            hot_reload_shaders: config.debug.hot_reload_shaders,
        };
        let backend = VulkanBackend::new(device, &settings).context("Failed to set up scene resources")?;

        let params = FrameParams {
            extent: info.framebuffer_size,
            thread_count: config.graphics.thread_count,
        };
        let driver = FrameDriver::new(
            backend,
            params,
            DriverSettings {
                timeout: config.frame_timeout(),
                overlay_visible: config.debug.show_overlay,
                clear_enabled: config.graphics.clear_enabled,
                clear_color: config.graphics.clear_rgb(),
            },
        )?;

        Ok(Self { driver: Some(driver) })
    }

    pub fn is_initialized(&self) -> bool {
        self.driver.as_ref().is_some_and(FrameDriver::is_live)
    }

    /// Advance one frame.
    pub fn draw(&mut self) -> Result<TickOutcome> {
        self.driver_mut()?.draw()
    }

    /// Request a rebuild at the new framebuffer size. Applied on the next `draw`.
    pub fn resize(&mut self, width: u32, height: u32) {
        if let Some(driver) = self.driver.as_mut() {
            driver.resize(width, height);
        }
    }

    pub fn set_overlay_visible(&mut self, visible: bool) {
        if let Some(driver) = self.driver.as_mut() {
            driver.set_overlay_visible(visible);
        }
    }

    /// Flip overlay visibility and return the new state.
    pub fn toggle_overlay(&mut self) -> bool {
        match self.driver.as_mut() {
            Some(driver) => {
                let visible = !driver.overlay_visible();
                driver.set_overlay_visible(visible);
                visible
            }
            None => false,
        }
    }

    /// Change the recording thread count by `delta`. Returns the clamped target.
    pub fn adjust_thread_count(&mut self, delta: isize) -> Option<usize> {
        let driver = self.driver.as_mut()?;
        let target = driver.target_thread_count().saturating_add_signed(delta);
        Some(driver.request_thread_count(target))
    }

    /// GUI context, for translating window events into overlay input.
    pub fn overlay_context(&self) -> Option<egui::Context> {
        self.driver.as_ref().map(|driver| driver.overlay().context().clone())
    }

    /// Input for the overlay's next frame.
    pub fn queue_overlay_input(&mut self, input: egui::RawInput) {
        if let Some(driver) = self.driver.as_mut() {
            driver.overlay_mut().queue_input(input);
        }
    }

    /// Cursor and clipboard requests from the overlay since the last call.
    pub fn take_overlay_output(&mut self) -> Option<egui::PlatformOutput> {
        self.driver.as_mut()?.overlay_mut().take_platform_output()
    }

    pub fn frame_times(&self) -> Option<&FrameTimeHistory> {
        self.driver.as_ref().map(FrameDriver::frame_times)
    }

    /// Drain in-flight frames and release everything. Safe to call twice.
    pub fn destroy(&mut self) -> Result<()> {
        if let Some(mut driver) = self.driver.take() {
            driver.destroy()?;
            // Backend and device drop here, after the frame resources
        }
        Ok(())
    }

    fn driver_mut(&mut self) -> Result<&mut FrameDriver<VulkanBackend>> {
        self.driver
            .as_mut()
            .context("draw called before create or after destroy")
    }
}

impl Drop for Volcano {
    fn drop(&mut self) {
        if let Err(e) = self.destroy() {
            log::error!("Failed to shut down renderer: {:#}", e);
        }
    }
}
