// Surface creation capability
//
// The renderer never branches on the windowing platform. Anything that can
// hand out raw window and display handles can produce a Vulkan surface, and
// ash-window picks the right platform extension for it.

use anyhow::{Context, Result};
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::ffi::c_char;

/// "Create a renderable surface from an opaque native window."
pub trait SurfaceFactory {
    /// Instance extensions the surface needs.
    fn required_extensions(&self) -> Result<&'static [*const c_char]>;

    /// Create the surface.
    ///
    /// # Safety
    /// The window must outlive the returned surface, and `instance` must have
    /// been created with [`SurfaceFactory::required_extensions`] enabled.
    unsafe fn create_surface(&self, entry: &ash::Entry, instance: &ash::Instance) -> Result<vk::SurfaceKHR>;
}

impl<W> SurfaceFactory for W
where
    W: HasWindowHandle + HasDisplayHandle,
{
    fn required_extensions(&self) -> Result<&'static [*const c_char]> {
        let display = self
            .display_handle()
            .context("Failed to get display handle")?
            .as_raw();
        ash_window::enumerate_required_extensions(display)
            .context("Windowing system has no Vulkan surface support")
    }

    unsafe fn create_surface(&self, entry: &ash::Entry, instance: &ash::Instance) -> Result<vk::SurfaceKHR> {
        let display = self
            .display_handle()
            .context("Failed to get display handle")?
            .as_raw();
        let window = self
            .window_handle()
            .context("Failed to get window handle")?
            .as_raw();

        ash_window::create_surface(entry, instance, display, window, None)
            .context("Failed to create window surface")
    }
}
