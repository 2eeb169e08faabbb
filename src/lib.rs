//! volcano: a Vulkan renderer that draws a grid of animated, textured
//! instances, recording each frame's draws across worker threads.
//!
//! [`frame`] holds the frame core (slot ring, recording fan-out, swapchain
//! lifecycle, per-tick driver) and is GPU-agnostic. [`backend`] implements it
//! on Vulkan. [`app::Volcano`] is the handle the windowing shim drives.

pub mod app;
pub mod backend;
pub mod config;
pub mod error;
pub mod frame;
pub mod overlay;
pub mod scene;

pub use app::{CreateInfo, Volcano};
pub use config::Config;
pub use error::{FrameError, FrameResult};
